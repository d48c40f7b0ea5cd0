//! Read-only status mirror published by the synchronizer for the dashboard.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::detector::CycleStats;
use super::indicator::IndicatorValue;
use crate::cloud::{DeviceId, ParamId};

/// Lifecycle of the synchronization loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    #[default]
    Starting,
    Running,
    /// Running, but with unresolved ids or failing fetches.
    Degraded,
    Stopping,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStatus {
    pub state: LoopState,
    pub device_id: Option<DeviceId>,
    pub sync_param_id: Option<ParamId>,
    pub indicator_param_id: Option<ParamId>,
    pub last_sync_value: Option<f64>,
    pub seconds_since_last_cycle: Option<f64>,
    pub in_active_window: bool,
    pub indicator_value: IndicatorValue,
    pub accepted_cycles: u64,
    pub rejected_changes: u64,
    pub write_failures: u64,
    pub token_renewals: u64,
    pub cycle_stats: Option<CycleStats>,
    pub consecutive_fetch_errors: u32,
    pub consecutive_missing_sync: u32,
    pub last_error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Written by the synchronizer only; everyone else takes read locks.
pub type SharedStatus = Arc<RwLock<SyncStatus>>;

pub fn shared_status() -> SharedStatus {
    Arc::new(RwLock::new(SyncStatus::default()))
}
