//! Poll scheduler: trades responsiveness for API load.
//!
//! Polls fast until the first cycle is seen and again inside the window where
//! the next cycle is expected; polls slowly everywhere else.

use std::time::{Duration, Instant};

use crate::config::defaults;

/// Timing and recovery policy of the synchronization loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Interval inside the active window and before the first cycle.
    pub active_interval: Duration,
    /// Interval everywhere else.
    pub idle_interval: Duration,
    /// Active window bounds, relative to the last accepted cycle (inclusive).
    pub active_window_start: Duration,
    pub active_window_end: Duration,
    /// Sync changes closer than this to the last accepted cycle are noise.
    pub min_cycle: Duration,
    /// Local validity window of an auth token.
    pub token_ttl: Duration,
    /// Consecutive fetch failures before a forced token renewal.
    pub max_fetch_errors: u32,
    /// Consecutive polls without the sync parameter before re-resolution.
    pub max_missing_sync: u32,
    /// Pause after an unexpected iteration failure.
    pub error_cooldown: Duration,
    /// Capacity of the cycle-duration history.
    pub cycle_history_len: usize,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            active_interval: Duration::from_millis(defaults::ACTIVE_INTERVAL_MS),
            idle_interval: Duration::from_secs(defaults::IDLE_INTERVAL_SECS),
            active_window_start: Duration::from_secs(defaults::ACTIVE_WINDOW_START_SECS),
            active_window_end: Duration::from_secs(defaults::ACTIVE_WINDOW_END_SECS),
            min_cycle: Duration::from_secs(defaults::MIN_CYCLE_SECS),
            token_ttl: Duration::from_secs(defaults::TOKEN_TTL_SECS),
            max_fetch_errors: defaults::MAX_FETCH_ERRORS,
            max_missing_sync: defaults::MAX_MISSING_SYNC,
            error_cooldown: Duration::from_secs(defaults::ERROR_COOLDOWN_SECS),
            cycle_history_len: defaults::CYCLE_HISTORY_LEN,
        }
    }
}

impl PollPolicy {
    /// Whether `elapsed` since the last accepted cycle falls in the active window.
    pub fn in_active_window(&self, elapsed: Duration) -> bool {
        self.active_window_start <= elapsed && elapsed <= self.active_window_end
    }
}

/// Compute the sleep before the next poll.
pub fn next_interval(
    policy: &PollPolicy,
    now: Instant,
    last_accepted: Option<Instant>,
) -> Duration {
    match last_accepted {
        None => policy.active_interval,
        Some(at) if policy.in_active_window(now.saturating_duration_since(at)) => {
            policy.active_interval
        }
        Some(_) => policy.idle_interval,
    }
}
