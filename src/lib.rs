//! OWEN Cloud Sync: cycle synchronizer for OWEN Cloud devices
//!
//! Polls a device's synchronization counter, detects genuine new measurement
//! cycles, acknowledges each one by toggling the device's new-cycle
//! indicator, and archives the parameter snapshot to CSV.
//!
//! ## Architecture
//!
//! - **cloud**: OWEN Cloud REST client behind the [`cloud::CloudApi`] trait
//! - **sync**: token cache, resolver, change detector, scheduler and the loop
//! - **storage**: CSV export, persisted device config, process lock
//! - **api**: read-only dashboard over the export and the live status
//! - **config**: TOML configuration with built-in defaults

pub mod api;
pub mod cloud;
pub mod config;
pub mod error;
pub mod storage;
pub mod sync;

pub use cloud::{CloudApi, CloudClient};
pub use config::SyncConfig;
pub use error::SyncError;
pub use storage::{CsvExporter, JsonConfigStore, ProcessLock, StoreError};
pub use sync::{PollPolicy, RunSummary, SharedStatus, SyncStatus, Synchronizer};
