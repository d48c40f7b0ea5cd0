//! Synchronizer Configuration Module
//!
//! Provides the deployment configuration loaded from TOML, replacing the
//! hardcoded endpoint, credentials and timing constants.
//!
//! ## Loading Order
//!
//! 1. `OWEN_SYNC_CONFIG` environment variable (path to TOML file)
//! 2. `sync_config.toml` in the current working directory
//! 3. Built-in defaults (see [`defaults`])
//!
//! `OWEN_LOGIN` / `OWEN_PASSWORD` override the credentials from any source.
//!
//! The loaded [`SyncConfig`] is passed explicitly into the synchronizer and
//! the dashboard; there is no process-wide instance.

mod sync_config;
pub mod defaults;

pub use sync_config::*;
