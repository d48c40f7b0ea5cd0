//! OWEN Cloud access: REST client and wire types
//!
//! The synchronizer only talks to the cloud through the [`CloudApi`] trait,
//! so the core can be exercised against in-memory fakes.

pub mod client;
pub mod types;

pub use client::{CloudApi, CloudClient};
pub use types::{Device, DeviceId, ParamId, Parameter, ParameterWrite, WriteReceipt};
