//! Loop-lifetime cycle state, owned and mutated only by the orchestrator.

use std::time::{Duration, Instant};

use super::detector::{classify_change, CycleHistory, CycleStats, Detection};
use super::indicator::IndicatorValue;

/// Everything the loop remembers between polls. Never persisted.
#[derive(Debug, Clone)]
pub struct CycleState {
    pub last_sync_value: Option<f64>,
    pub last_accepted: Option<Instant>,
    pub history: CycleHistory,
    pub indicator: IndicatorValue,
    pub consecutive_fetch_errors: u32,
    pub consecutive_missing_sync: u32,
}

impl CycleState {
    pub fn new(history_len: usize, indicator: IndicatorValue) -> Self {
        Self {
            last_sync_value: None,
            last_accepted: None,
            history: CycleHistory::new(history_len),
            indicator,
            consecutive_fetch_errors: 0,
            consecutive_missing_sync: 0,
        }
    }

    /// Classify `value` and commit the outcome.
    ///
    /// `Baseline` records the value, `Accepted` advances both the value and
    /// the acceptance time and appends the duration, `Unchanged` and
    /// `Rejected` leave everything as it was.
    pub fn observe_sync(&mut self, value: f64, now: Instant, min_cycle: Duration) -> Detection {
        let detection = classify_change(self.last_sync_value, self.last_accepted, value, now, min_cycle);
        match detection {
            Detection::Baseline => self.last_sync_value = Some(value),
            Detection::Accepted { duration, .. } => {
                if let Some(d) = duration {
                    self.history.push(d);
                }
                self.last_accepted = Some(now);
                self.last_sync_value = Some(value);
            }
            Detection::Unchanged | Detection::Rejected { .. } => {}
        }
        detection
    }

    pub fn stats(&self) -> Option<CycleStats> {
        self.history.stats()
    }

    pub fn since_last_cycle(&self, now: Instant) -> Option<Duration> {
        self.last_accepted.map(|at| now.saturating_duration_since(at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: Duration = Duration::from_secs(50);

    #[test]
    fn rejected_change_keeps_baseline() {
        let t0 = Instant::now();
        let mut state = CycleState::new(10, IndicatorValue::Zero);

        state.observe_sync(5.0, t0, MIN);
        assert!(matches!(state.observe_sync(6.0, t0, MIN), Detection::Accepted { .. }));

        let at_10 = t0 + Duration::from_secs(10);
        assert!(matches!(state.observe_sync(7.0, at_10, MIN), Detection::Rejected { .. }));
        assert_eq!(state.last_sync_value, Some(6.0));
        assert_eq!(state.last_accepted, Some(t0));

        let at_55 = t0 + Duration::from_secs(55);
        assert_eq!(
            state.observe_sync(7.0, at_55, MIN),
            Detection::Accepted { previous: 6.0, duration: Some(Duration::from_secs(55)) }
        );
        assert_eq!(state.last_sync_value, Some(7.0));
        assert_eq!(state.history.stats().map(|s| s.count), Some(1));
    }

    #[test]
    fn reverted_value_is_unchanged() {
        let t0 = Instant::now();
        let mut state = CycleState::new(10, IndicatorValue::Zero);
        state.observe_sync(1.0, t0, MIN);
        state.observe_sync(2.0, t0, MIN);
        state.observe_sync(3.0, t0 + Duration::from_secs(5), MIN);
        assert_eq!(state.observe_sync(2.0, t0 + Duration::from_secs(6), MIN), Detection::Unchanged);
    }

    #[test]
    fn twelve_cycles_keep_ten_durations() {
        let mut now = Instant::now();
        let mut state = CycleState::new(10, IndicatorValue::Zero);
        state.observe_sync(0.0, now, MIN);
        // first accepted cycle carries no duration
        for i in 1..=13u64 {
            now += Duration::from_secs(50 + i);
            state.observe_sync(i as f64, now, MIN);
        }
        let stats = state.stats().unwrap();
        assert_eq!(stats.count, 10);
        // durations 52..=63 were recorded, 52 and 53 evicted
        assert_eq!(stats.min_secs, 54.0);
        assert_eq!(stats.max_secs, 63.0);
    }
}
