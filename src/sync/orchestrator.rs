//! Synchronization loop.
//!
//! One cooperative control flow: compute the interval, fetch a snapshot,
//! extract and debounce the sync value, toggle the indicator on an accepted
//! cycle, export, sleep. Cancellation is observed only at the sleep point,
//! so an in-flight request or write always completes.

use chrono::{Local, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::clock::Clock;
use super::detector::Detection;
use super::indicator::{IndicatorValue, IndicatorWriter};
use super::model::{numeric_value, DeviceConfig, ParameterSnapshot};
use super::resolver::resolve;
use super::scheduler::{next_interval, PollPolicy};
use super::snapshot::fetch_snapshot;
use super::state::CycleState;
use super::status::{shared_status, LoopState, SharedStatus};
use super::token::{AuthToken, Credentials, TokenCache};
use crate::cloud::CloudApi;
use crate::config::defaults::STATUS_LOG_PERIOD_SECS;
use crate::error::SyncError;
use crate::storage::{ConfigStore, ExportRow, ExportSink};

/// What the loop should do after one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Normal pause before the next poll.
    Sleep(Duration),
    /// Identifiers were just re-resolved; poll again without sleeping.
    RetryNow,
    /// The iteration failed unexpectedly; pause for the error cooldown.
    Cooldown(Duration),
}

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub iterations: u64,
    pub accepted_cycles: u64,
    pub rejected_changes: u64,
    pub write_failures: u64,
    pub token_renewals: u64,
}

// ============================================================================
// Synchronizer
// ============================================================================

/// Owns every piece of loop state: token cache, device config, cycle state.
///
/// Built with [`new()`](Synchronizer::new), prepared with
/// [`bootstrap()`](Synchronizer::bootstrap), then driven by
/// [`run()`](Synchronizer::run) or step by step with
/// [`step()`](Synchronizer::step).
pub struct Synchronizer<A, E, S> {
    api: A,
    export: E,
    store: S,
    policy: PollPolicy,
    clock: Arc<dyn Clock>,
    tokens: TokenCache,
    writer: IndicatorWriter,
    device: DeviceConfig,
    state: CycleState,
    status: SharedStatus,
    summary: RunSummary,
    last_status_log: Option<Instant>,
    last_error: Option<String>,
    export_ready: bool,
}

impl<A, E, S> Synchronizer<A, E, S>
where
    A: CloudApi,
    E: ExportSink,
    S: ConfigStore,
{
    pub fn new(
        api: A,
        export: E,
        store: S,
        credentials: Credentials,
        policy: PollPolicy,
        confirm_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            api,
            export,
            store,
            tokens: TokenCache::new(credentials, policy.token_ttl, Arc::clone(&clock)),
            writer: IndicatorWriter::new(confirm_timeout),
            device: DeviceConfig::default(),
            state: CycleState::new(policy.cycle_history_len, IndicatorValue::Zero),
            status: shared_status(),
            summary: RunSummary::default(),
            last_status_log: None,
            last_error: None,
            export_ready: false,
            policy,
            clock,
        }
    }

    /// Publish status into an externally owned mirror (the dashboard's).
    pub fn with_status(mut self, status: SharedStatus) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> SharedStatus {
        Arc::clone(&self.status)
    }

    pub fn device_config(&self) -> &DeviceConfig {
        &self.device
    }

    pub fn cycle_state(&self) -> &CycleState {
        &self.state
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    // ------------------------------------------------------------------------
    // Startup
    // ------------------------------------------------------------------------

    /// Acquire a token, validate or rediscover the device configuration,
    /// prepare the export and read the indicator baseline.
    ///
    /// Only an authentication failure is fatal here. A network failure during
    /// the first login is retried after the error cooldown; if `cancel` fires
    /// first this returns `Ok(())` and `run` exits immediately. An
    /// unresolvable device leaves the loop running in a degraded state.
    pub async fn bootstrap(&mut self, cancel: &CancellationToken) -> Result<(), SyncError> {
        let Some(token) = self.initial_token(cancel).await? else {
            info!("Startup cancelled before authentication");
            return Ok(());
        };

        let prior = match self.store.load() {
            Ok(prior) => prior,
            Err(e) => {
                warn!(error = %e, "Persisted device configuration unreadable, starting fresh");
                None
            }
        };

        let needs_resolution = match &prior {
            Some(config) if config.device_id.is_some() => self.verify_persisted(&token, config).await,
            _ => {
                info!("No persisted device configuration");
                true
            }
        };

        self.device = prior.clone().unwrap_or_default();
        if needs_resolution {
            match resolve(&self.api, &token, prior.as_ref()).await {
                Ok(config) => {
                    self.persist(&config);
                    self.device = config;
                }
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    error!(error = %e, "Device resolution failed, continuing with previous configuration");
                    self.last_error = Some(e.to_string());
                }
            }
        }

        if self.device.is_complete() {
            info!(
                device_id = ?self.device.device_id,
                sync_param_id = ?self.device.sync_param_id,
                indicator_param_id = ?self.device.indicator_param_id,
                parameters = self.device.parameter_ids.len(),
                "Device configuration ready"
            );
        } else {
            warn!(
                device_id = ?self.device.device_id,
                sync_param_id = ?self.device.sync_param_id,
                indicator_param_id = ?self.device.indicator_param_id,
                "Device configuration incomplete, running degraded"
            );
        }

        self.prepare_export();

        self.state.indicator = self.read_indicator_baseline(&token).await;
        info!(indicator = %self.state.indicator, "Indicator baseline read from device");

        self.publish(self.loop_state()).await;
        Ok(())
    }

    /// Log in, retrying network failures until success or cancellation.
    async fn initial_token(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<AuthToken>, SyncError> {
        loop {
            match self.tokens.acquire(&self.api, false).await {
                Ok(token) => {
                    self.summary.token_renewals = self.tokens.renewals();
                    return Ok(Some(token));
                }
                Err(e) if e.is_auth() => {
                    error!(error = %e, "Initial authentication failed");
                    self.last_error = Some(e.to_string());
                    self.publish(LoopState::Stopping).await;
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_secs = self.policy.error_cooldown.as_secs_f64(),
                        "Cloud unreachable at startup, retrying login"
                    );
                    self.last_error = Some(e.to_string());
                    self.publish(LoopState::Degraded).await;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.policy.error_cooldown) => {}
            }
        }
    }

    /// True when the persisted config no longer matches the device.
    async fn verify_persisted(&self, token: &AuthToken, config: &DeviceConfig) -> bool {
        match fetch_snapshot(&self.api, token, config).await {
            Ok(snapshot) => match config.sync_param_id {
                Some(id) if snapshot.contains(id) => {
                    info!("Persisted device configuration is valid");
                    false
                }
                _ => {
                    warn!("Persisted synchronization parameter not reported by device");
                    true
                }
            },
            Err(e) => {
                warn!(error = %e, "Check of persisted configuration failed");
                true
            }
        }
    }

    async fn read_indicator_baseline(&self, token: &AuthToken) -> IndicatorValue {
        let Some(param_id) = self.device.indicator_param_id else {
            return IndicatorValue::Zero;
        };
        match fetch_snapshot(&self.api, token, &self.device).await {
            Ok(snapshot) => IndicatorValue::from_remote(snapshot.get(param_id)),
            Err(e) => {
                warn!(error = %e, "Could not read indicator, assuming 0");
                IndicatorValue::Zero
            }
        }
    }

    /// Initialise the export once the parameter set is known.
    fn prepare_export(&mut self) {
        if self.export_ready || self.device.parameter_ids.is_empty() {
            return;
        }
        match self.export.initialize(&self.device) {
            Ok(()) => self.export_ready = true,
            Err(e) => error!(error = %e, "Failed to initialise export"),
        }
    }

    fn persist(&self, config: &DeviceConfig) {
        if let Err(e) = self.store.save(config) {
            error!(error = %e, "Failed to persist device configuration");
        }
    }

    // ------------------------------------------------------------------------
    // Main loop
    // ------------------------------------------------------------------------

    /// Poll until `cancel` fires. Returns `Err` only for a fatal
    /// authentication failure.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<RunSummary, SyncError> {
        info!(
            active_ms = self.policy.active_interval.as_millis() as u64,
            idle_secs = self.policy.idle_interval.as_secs(),
            min_cycle_secs = self.policy.min_cycle.as_secs(),
            "Synchronization loop started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let pause = match self.step().await {
                Ok(Step::RetryNow) => continue,
                Ok(Step::Sleep(d) | Step::Cooldown(d)) => d,
                Err(e) => {
                    error!(error = %e, "Unrecoverable authentication failure, stopping");
                    self.last_error = Some(e.to_string());
                    self.publish(LoopState::Stopping).await;
                    return Err(e);
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!(
            iterations = self.summary.iterations,
            cycles = self.summary.accepted_cycles,
            write_failures = self.summary.write_failures,
            "Synchronization loop stopped"
        );
        self.publish(LoopState::Stopping).await;
        Ok(self.summary)
    }

    /// Run one iteration of the loop body.
    pub async fn step(&mut self) -> Result<Step, SyncError> {
        self.summary.iterations += 1;
        let now = self.clock.now();
        let interval = next_interval(&self.policy, now, self.state.last_accepted);

        let token = match self.tokens.acquire(&self.api, false).await {
            Ok(token) => token,
            Err(e) if e.is_auth() => {
                error!(error = %e, "Token renewal rejected");
                return Err(e);
            }
            Err(e) => {
                self.note_fetch_error(e).await?;
                return Ok(Step::Sleep(interval));
            }
        };
        self.summary.token_renewals = self.tokens.renewals();

        if self.device.device_id.is_none() {
            return self.on_missing_sync(&token, interval).await;
        }

        let mut snapshot = match fetch_snapshot(&self.api, &token, &self.device).await {
            Ok(snapshot) => {
                self.state.consecutive_fetch_errors = 0;
                snapshot
            }
            Err(e) if e.is_auth() => {
                warn!(error = %e, "Token rejected while polling, renewing");
                self.renew_token().await?;
                return Ok(Step::Sleep(interval));
            }
            Err(e) => {
                self.note_fetch_error(e).await?;
                return Ok(Step::Sleep(interval));
            }
        };

        let raw = self
            .device
            .sync_param_id
            .and_then(|id| snapshot.get(id))
            .cloned();
        let Some(raw) = raw else {
            return self.on_missing_sync(&token, interval).await;
        };
        self.state.consecutive_missing_sync = 0;

        let value = match numeric_value(&raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Synchronization value is not numeric, skipping");
                self.last_error = Some(e.to_string());
                self.publish(self.loop_state()).await;
                return Ok(Step::Sleep(interval));
            }
        };

        let step = match self.state.observe_sync(value, now, self.policy.min_cycle) {
            Detection::Baseline => {
                info!(value, "Synchronization baseline recorded");
                Step::Sleep(interval)
            }
            Detection::Unchanged => Step::Sleep(interval),
            Detection::Rejected { elapsed } => {
                self.summary.rejected_changes += 1;
                debug!(
                    value,
                    baseline = ?self.state.last_sync_value,
                    elapsed_secs = elapsed.as_secs_f64(),
                    "Change too soon after last cycle, ignored"
                );
                Step::Sleep(interval)
            }
            Detection::Accepted { previous, duration } => {
                info!(previous, value, "New cycle detected");
                self.summary.accepted_cycles += 1;
                self.log_cycle_stats(duration);
                self.on_cycle(&token, &mut snapshot, now, interval).await
            }
        };

        self.log_idle_status(now);
        self.publish(self.loop_state()).await;
        Ok(step)
    }

    // ------------------------------------------------------------------------
    // Iteration branches
    // ------------------------------------------------------------------------

    /// Toggle the indicator and export the cycle.
    async fn on_cycle(
        &mut self,
        token: &AuthToken,
        snapshot: &mut ParameterSnapshot,
        accepted_at: Instant,
        interval: Duration,
    ) -> Step {
        let current = self.state.indicator;
        let target = current.toggled();

        let stale = match self.device.indicator_param_id {
            Some(param_id) => match self.writer.write(&self.api, token, param_id, target).await {
                Ok(receipt) => {
                    self.state.indicator = target;
                    snapshot.set(param_id, target.to_json());
                    let latency = self.clock.now().saturating_duration_since(accepted_at);
                    info!(
                        from = %current,
                        to = %target,
                        write_group = %receipt.write_group_id,
                        latency_ms = latency.as_millis() as u64,
                        "Indicator written"
                    );
                    false
                }
                Err(e) => {
                    if e.is_auth() {
                        self.tokens.invalidate();
                    }
                    warn!(error = %e, indicator = %current, "Indicator write failed, state not advanced");
                    self.summary.write_failures += 1;
                    self.last_error = Some(e.to_string());
                    snapshot.set(param_id, current.to_json());
                    true
                }
            },
            None => {
                let e = SyncError::Write("indicator parameter unresolved".to_string());
                warn!(error = %e, "Indicator write skipped");
                self.summary.write_failures += 1;
                self.last_error = Some(e.to_string());
                true
            }
        };

        self.prepare_export();
        let mut row = ExportRow::from_snapshot(&self.device, snapshot, Local::now());
        row.indicator_stale = stale;
        match self.export.append(&row) {
            Ok(()) => {
                debug!(columns = row.values.len(), indicator_stale = stale, "Cycle exported");
                Step::Sleep(interval)
            }
            Err(e) => {
                error!(error = %e, cooldown_secs = self.policy.error_cooldown.as_secs(), "Export failed, cooling down");
                self.last_error = Some(e.to_string());
                Step::Cooldown(self.policy.error_cooldown)
            }
        }
    }

    /// Count a missing sync parameter and re-resolve once the threshold is hit.
    async fn on_missing_sync(
        &mut self,
        token: &AuthToken,
        interval: Duration,
    ) -> Result<Step, SyncError> {
        self.state.consecutive_missing_sync += 1;
        let misses = self.state.consecutive_missing_sync;
        warn!(misses, sync_param_id = ?self.device.sync_param_id, "Synchronization parameter not in snapshot");

        if misses < self.policy.max_missing_sync {
            self.publish(self.loop_state()).await;
            return Ok(Step::Sleep(interval));
        }

        // A failed attempt waits for another full run of misses.
        self.state.consecutive_missing_sync = 0;
        let step = match resolve(&self.api, token, Some(&self.device)).await {
            Ok(config) => {
                self.persist(&config);
                self.device = config;
                self.prepare_export();
                info!("Identifiers re-resolved, fetching again");
                Step::RetryNow
            }
            Err(e) if e.is_auth() => {
                warn!(error = %e, "Token rejected during re-resolution, renewing");
                self.renew_token().await?;
                Step::Sleep(interval)
            }
            Err(e) => {
                warn!(error = %e, "Re-resolution failed, keeping previous configuration");
                self.last_error = Some(e.to_string());
                Step::Sleep(interval)
            }
        };
        self.publish(self.loop_state()).await;
        Ok(step)
    }

    async fn note_fetch_error(&mut self, err: SyncError) -> Result<(), SyncError> {
        self.state.consecutive_fetch_errors += 1;
        let consecutive = self.state.consecutive_fetch_errors;
        warn!(error = %err, consecutive, "Snapshot fetch failed");
        self.last_error = Some(err.to_string());

        if consecutive >= self.policy.max_fetch_errors {
            warn!(consecutive, "Too many consecutive fetch errors, forcing token renewal");
            self.state.consecutive_fetch_errors = 0;
            self.renew_token().await?;
        }
        self.publish(self.loop_state()).await;
        Ok(())
    }

    /// Forced renewal. A rejected login is fatal; a network failure is not.
    async fn renew_token(&mut self) -> Result<(), SyncError> {
        match self.tokens.acquire(&self.api, true).await {
            Ok(_) => {
                self.summary.token_renewals = self.tokens.renewals();
                Ok(())
            }
            Err(e) if e.is_auth() => {
                error!(error = %e, "Token renewal rejected");
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "Token renewal failed, will retry");
                self.last_error = Some(e.to_string());
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------------

    fn log_cycle_stats(&self, duration: Option<Duration>) {
        let (Some(duration), Some(stats)) = (duration, self.state.stats()) else {
            info!("First cycle observed, duration unknown");
            return;
        };
        info!(
            duration_secs = %format_args!("{:.1}", duration.as_secs_f64()),
            mean_secs = %format_args!("{:.1}", stats.mean_secs),
            range = %format_args!("{:.1}..{:.1}", stats.min_secs, stats.max_secs),
            samples = stats.count,
            next_cycle = %format_args!("{:.1} ± {:.1}s", stats.mean_secs, stats.spread_secs()),
            "Cycle statistics"
        );
    }

    fn log_idle_status(&mut self, now: Instant) {
        let due = self
            .last_status_log
            .map_or(true, |at| now.saturating_duration_since(at) >= Duration::from_secs(STATUS_LOG_PERIOD_SECS));
        if !due {
            return;
        }
        self.last_status_log = Some(now);

        match self.state.since_last_cycle(now) {
            Some(since) => info!(
                since_last_cycle_secs = since.as_secs(),
                active_window = self.policy.in_active_window(since),
                sync_value = ?self.state.last_sync_value,
                "Waiting for next cycle"
            ),
            None => info!(sync_value = ?self.state.last_sync_value, "Waiting for first cycle"),
        }
    }

    fn loop_state(&self) -> LoopState {
        if self.device.is_complete() && self.state.consecutive_fetch_errors == 0 {
            LoopState::Running
        } else {
            LoopState::Degraded
        }
    }

    async fn publish(&self, loop_state: LoopState) {
        let now = self.clock.now();
        let since = self.state.since_last_cycle(now);
        let mut status = self.status.write().await;
        status.state = loop_state;
        status.device_id = self.device.device_id;
        status.sync_param_id = self.device.sync_param_id;
        status.indicator_param_id = self.device.indicator_param_id;
        status.last_sync_value = self.state.last_sync_value;
        status.seconds_since_last_cycle = since.map(|d| d.as_secs_f64());
        status.in_active_window = since.is_some_and(|d| self.policy.in_active_window(d));
        status.indicator_value = self.state.indicator;
        status.accepted_cycles = self.summary.accepted_cycles;
        status.rejected_changes = self.summary.rejected_changes;
        status.write_failures = self.summary.write_failures;
        status.token_renewals = self.summary.token_renewals;
        status.cycle_stats = self.state.stats();
        status.consecutive_fetch_errors = self.state.consecutive_fetch_errors;
        status.consecutive_missing_sync = self.state.consecutive_missing_sync;
        status.last_error = self.last_error.clone();
        status.updated_at = Some(Utc::now());
    }
}
