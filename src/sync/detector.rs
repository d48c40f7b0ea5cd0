//! Debounced change detector.
//!
//! A change of the synchronization counter is a new measurement cycle only if
//! at least `min_cycle` has passed since the last accepted cycle. A rejected
//! change does not advance the baseline, so the same pending transition is
//! re-evaluated on every poll until the window has passed or the value
//! reverts. A value that keeps oscillating inside the window therefore stalls
//! detection; that behaviour is kept deliberately.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Verdict for one observed sync value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Detection {
    /// First observation; recorded as the baseline.
    Baseline,
    /// Same value as the baseline.
    Unchanged,
    /// Changed too soon after the last accepted cycle; baseline kept.
    Rejected { elapsed: Duration },
    /// A genuine new cycle. `duration` is `None` for the first accepted cycle.
    Accepted {
        previous: f64,
        duration: Option<Duration>,
    },
}

/// Pure classification of `value` against the prior baseline.
pub fn classify_change(
    last_sync_value: Option<f64>,
    last_accepted: Option<Instant>,
    value: f64,
    now: Instant,
    min_cycle: Duration,
) -> Detection {
    let Some(previous) = last_sync_value else {
        return Detection::Baseline;
    };
    #[allow(clippy::float_cmp)]
    if value == previous {
        return Detection::Unchanged;
    }
    match last_accepted {
        Some(at) => {
            let elapsed = now.saturating_duration_since(at);
            if elapsed < min_cycle {
                Detection::Rejected { elapsed }
            } else {
                Detection::Accepted {
                    previous,
                    duration: Some(elapsed),
                }
            }
        }
        None => Detection::Accepted {
            previous,
            duration: None,
        },
    }
}

/// Rolling statistics over the retained cycle durations.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct CycleStats {
    pub count: usize,
    pub mean_secs: f64,
    pub min_secs: f64,
    pub max_secs: f64,
}

impl CycleStats {
    /// Spread between the fastest and slowest retained cycle.
    pub fn spread_secs(&self) -> f64 {
        self.max_secs - self.min_secs
    }
}

/// Bounded FIFO of the most recent cycle durations.
#[derive(Debug, Clone)]
pub struct CycleHistory {
    durations: VecDeque<Duration>,
    capacity: usize,
}

impl CycleHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            durations: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Append a duration, evicting the oldest once over capacity.
    pub fn push(&mut self, duration: Duration) {
        self.durations.push_back(duration);
        while self.durations.len() > self.capacity {
            self.durations.pop_front();
        }
    }

    pub fn stats(&self) -> Option<CycleStats> {
        if self.durations.is_empty() {
            return None;
        }
        let secs: Vec<f64> = self.durations.iter().map(Duration::as_secs_f64).collect();
        let sum: f64 = secs.iter().sum();
        Some(CycleStats {
            count: secs.len(),
            mean_secs: sum / secs.len() as f64,
            min_secs: secs.iter().copied().fold(f64::INFINITY, f64::min),
            max_secs: secs.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: Duration = Duration::from_secs(50);

    fn secs(base: Instant, s: u64) -> Instant {
        base + Duration::from_secs(s)
    }

    #[test]
    fn first_observation_is_baseline() {
        let t0 = Instant::now();
        assert_eq!(classify_change(None, None, 5.0, t0, MIN), Detection::Baseline);
    }

    #[test]
    fn equal_value_is_unchanged() {
        let t0 = Instant::now();
        assert_eq!(classify_change(Some(5.0), None, 5.0, t0, MIN), Detection::Unchanged);
        assert_eq!(
            classify_change(Some(5.0), Some(t0), 5.0, secs(t0, 300), MIN),
            Detection::Unchanged
        );
    }

    #[test]
    fn first_change_is_accepted_without_duration() {
        let t0 = Instant::now();
        assert_eq!(
            classify_change(Some(5.0), None, 6.0, t0, MIN),
            Detection::Accepted { previous: 5.0, duration: None }
        );
    }

    #[test]
    fn change_inside_min_cycle_is_rejected() {
        let t0 = Instant::now();
        assert_eq!(
            classify_change(Some(6.0), Some(t0), 7.0, secs(t0, 10), MIN),
            Detection::Rejected { elapsed: Duration::from_secs(10) }
        );
        assert!(matches!(
            classify_change(Some(6.0), Some(t0), 7.0, secs(t0, 49), MIN),
            Detection::Rejected { .. }
        ));
    }

    #[test]
    fn change_at_min_cycle_is_accepted_with_duration() {
        let t0 = Instant::now();
        assert_eq!(
            classify_change(Some(6.0), Some(t0), 7.0, secs(t0, 50), MIN),
            Detection::Accepted { previous: 6.0, duration: Some(MIN) }
        );
    }

    #[test]
    fn history_evicts_oldest_beyond_capacity() {
        let mut history = CycleHistory::new(10);
        for s in 1..=12u64 {
            history.push(Duration::from_secs(s));
        }
        let stats = history.stats().unwrap();
        assert_eq!(stats.count, 10);
        assert_eq!(stats.min_secs, 3.0);
        assert_eq!(stats.max_secs, 12.0);
        assert!((stats.mean_secs - 7.5).abs() < 1e-9);
    }

    #[test]
    fn empty_history_has_no_stats() {
        assert!(CycleHistory::new(10).stats().is_none());
    }
}
