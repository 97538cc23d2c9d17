//! Sliding Rate Window
//!
//! Pure bookkeeping for a sliding-window rate limit. Holds the admission
//! timestamps that fall inside `[now - window, now]` and answers how long a
//! caller must wait before the next admission.
//!
//! The window never reads a clock itself; every operation takes `now` so the
//! async limiter and property tests can drive it with any time source.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::ConfigurationError;

/// Sliding window of admission timestamps for one upstream.
#[derive(Debug, Clone)]
pub struct RateWindow {
    max_requests: usize,
    window: Duration,
    timestamps: VecDeque<Instant>,
}

impl RateWindow {
    /// Create an empty window.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] if `max_requests` is zero or the window
    /// is empty.
    pub fn new(
        name: &str,
        max_requests: usize,
        window: Duration,
    ) -> Result<Self, ConfigurationError> {
        if max_requests == 0 {
            return Err(ConfigurationError::ZeroCapacity {
                name: name.to_string(),
            });
        }
        if window.is_zero() {
            return Err(ConfigurationError::ZeroWindow {
                name: name.to_string(),
                window,
            });
        }

        Ok(Self {
            max_requests,
            window,
            timestamps: VecDeque::with_capacity(max_requests),
        })
    }

    /// Maximum admissions per window.
    #[must_use]
    pub const fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Window length.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Drop timestamps that have slid out of the window.
    ///
    /// A timestamp exactly `window` old is expired: the slot it occupied is
    /// free again at `oldest + window`.
    pub fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Time until the next admission is allowed, or `None` if a slot is free.
    ///
    /// Prunes first, so the answer always reflects `now`.
    pub fn wait_time(&mut self, now: Instant) -> Option<Duration> {
        self.prune(now);

        if self.timestamps.len() < self.max_requests {
            return None;
        }

        self.timestamps
            .front()
            .map(|&oldest| self.window.saturating_sub(now.saturating_duration_since(oldest)))
    }

    /// Admit at `now` if a slot is free, recording the timestamp.
    ///
    /// Returns the remaining wait otherwise.
    pub fn try_admit(&mut self, now: Instant) -> Result<(), Duration> {
        match self.wait_time(now) {
            None => {
                self.timestamps.push_back(now);
                Ok(())
            }
            Some(wait) => Err(wait),
        }
    }

    /// Number of admissions still inside the window at `now`.
    pub fn in_window(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.timestamps.len()
    }

    /// Timestamps currently held, oldest first.
    pub fn timestamps(&self) -> impl Iterator<Item = &Instant> {
        self.timestamps.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn window(max: usize, ms: u64) -> RateWindow {
        RateWindow::new("test", max, Duration::from_millis(ms)).unwrap()
    }

    #[test]
    fn zero_capacity_is_a_configuration_error() {
        let err = RateWindow::new("binance", 0, Duration::from_secs(1)).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::ZeroCapacity {
                name: "binance".to_string()
            }
        );
    }

    #[test]
    fn zero_window_is_a_configuration_error() {
        let err = RateWindow::new("binance", 5, Duration::ZERO).unwrap_err();
        assert!(matches!(err, ConfigurationError::ZeroWindow { .. }));
    }

    #[test]
    fn admits_until_full() {
        let mut w = window(3, 1000);
        let t0 = Instant::now();

        assert!(w.try_admit(t0).is_ok());
        assert!(w.try_admit(t0).is_ok());
        assert!(w.try_admit(t0).is_ok());
        assert_eq!(w.try_admit(t0), Err(Duration::from_millis(1000)));
    }

    #[test]
    fn wait_is_measured_from_oldest_timestamp() {
        let mut w = window(2, 1000);
        let t0 = Instant::now();

        w.try_admit(t0).unwrap();
        w.try_admit(t0 + Duration::from_millis(300)).unwrap();

        let wait = w.wait_time(t0 + Duration::from_millis(400));
        assert_eq!(wait, Some(Duration::from_millis(600)));
    }

    #[test]
    fn prune_frees_slots_exactly_at_window_boundary() {
        let mut w = window(1, 1000);
        let t0 = Instant::now();

        w.try_admit(t0).unwrap();
        assert!(w.wait_time(t0 + Duration::from_millis(999)).is_some());
        assert!(w.wait_time(t0 + Duration::from_millis(1000)).is_none());
        assert_eq!(w.in_window(t0 + Duration::from_millis(1000)), 0);
    }

    #[test]
    fn admission_into_full_window_is_rejected() {
        let mut w = window(1, 1000);
        let t0 = Instant::now();

        assert!(w.try_admit(t0).is_ok());
        assert_eq!(w.try_admit(t0), Err(Duration::from_millis(1000)));
        assert_eq!(w.in_window(t0), 1);
    }

    proptest! {
        /// Simulates callers that arrive faster than the limit allows and
        /// admits each one at the earliest legal instant. The Nth admission
        /// must never precede `admissions[N - max] + window`.
        #[test]
        fn nth_admission_respects_window(
            max in 1usize..8,
            window_ms in 10u64..5_000,
            gaps in proptest::collection::vec(0u64..50, 1..64),
        ) {
            let mut w = RateWindow::new("prop", max, Duration::from_millis(window_ms)).unwrap();
            let base = Instant::now();
            let mut arrival = base;
            let mut clock = base;
            let mut admissions: Vec<Instant> = Vec::new();

            for gap in gaps {
                arrival += Duration::from_millis(gap);
                clock = clock.max(arrival);
                loop {
                    match w.try_admit(clock) {
                        Ok(()) => break,
                        Err(wait) => clock += wait,
                    }
                }
                admissions.push(clock);
            }

            for n in max..admissions.len() {
                let bound = admissions[n - max] + Duration::from_millis(window_ms);
                prop_assert!(admissions[n] >= bound);
            }
        }

        /// The window never holds more than `max` timestamps.
        #[test]
        fn never_exceeds_capacity(
            max in 1usize..8,
            offsets in proptest::collection::vec(0u64..2_000, 1..64),
        ) {
            let mut w = RateWindow::new("prop", max, Duration::from_millis(1_000)).unwrap();
            let base = Instant::now();
            let mut sorted = offsets;
            sorted.sort_unstable();

            for offset in sorted {
                let now = base + Duration::from_millis(offset);
                let _ = w.try_admit(now);
                prop_assert!(w.in_window(now) <= max);
            }
        }
    }
}
