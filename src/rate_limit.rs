//! Publisher rate limits: a minimum spacing derived from requests/second plus a
//! per-minute budget, enforced both per 60-second window and over any rolling
//! 60 seconds.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use time::{Duration, OffsetDateTime};

use crate::clock::Clock;
use crate::error::ConfigError;

const WINDOW: Duration = Duration::seconds(60);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimits {
    pub requests_per_second: f64,
    pub requests_per_minute: u32,
}

impl RateLimits {
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Below 0.001 the spacing (1/rps) stops being a meaningful duration.
        if !self.requests_per_second.is_finite() || self.requests_per_second < 0.001 {
            return Err(ConfigError::Invalid {
                field: "requests_per_second",
                message: format!(
                    "must be a positive number of at least 0.001, got {}",
                    self.requests_per_second
                ),
            });
        }
        if self.requests_per_minute == 0 {
            return Err(ConfigError::Invalid {
                field: "requests_per_minute",
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    fn min_interval(&self) -> Duration {
        Duration::seconds_f64(1.0 / self.requests_per_second)
    }
}

#[derive(Debug, Clone, Default)]
struct RateWindow {
    /// Time of the first call counted in the current window.
    window_start: Option<OffsetDateTime>,
    count_in_window: u32,
    last_request_time: Option<OffsetDateTime>,
    /// The last `requests_per_minute` calls, oldest first.
    recent: VecDeque<OffsetDateTime>,
}

impl RateWindow {
    fn reset(&mut self) {
        self.window_start = None;
        self.count_in_window = 0;
    }
}

/// Blocks callers so outbound requests stay within [`RateLimits`].
#[derive(Debug)]
pub struct RateLimiter {
    limits: RateLimits,
    min_interval: Duration,
    window: Mutex<RateWindow>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Fails when the limits would make pacing impossible (zero or negative rates).
    pub fn new(limits: RateLimits, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        limits.validate()?;

        Ok(Self {
            limits,
            min_interval: limits.min_interval(),
            window: Mutex::new(RateWindow::default()),
            clock,
        })
    }

    pub fn limits(&self) -> RateLimits {
        self.limits
    }

    /// Waits until the next request may go out, then records it.
    pub fn acquire(&self) {
        let mut w = self.window.lock();
        let mut now = self.clock.now();

        if let Some(start) = w.window_start {
            if now - start >= WINDOW {
                w.reset();
            }
        }

        if w.count_in_window >= self.limits.requests_per_minute {
            if let Some(start) = w.window_start {
                let remaining = WINDOW - (now - start);
                if remaining.is_positive() {
                    tracing::info!(
                        "minute rate limit reached, sleeping for {:.1}s",
                        remaining.as_seconds_f64()
                    );
                    self.clock.sleep(remaining.unsigned_abs());
                    now = self.clock.now();
                }
            }
            w.reset();
        }

        let budget = self.limits.requests_per_minute as usize;
        if w.recent.len() >= budget {
            if let Some(&oldest) = w.recent.front() {
                let wait = WINDOW - (now - oldest);
                if wait.is_positive() {
                    tracing::info!(
                        "rolling minute budget used, sleeping for {:.1}s",
                        wait.as_seconds_f64()
                    );
                    self.clock.sleep(wait.unsigned_abs());
                    now = self.clock.now();
                }
            }
            while w.recent.len() >= budget {
                w.recent.pop_front();
            }
        }

        if let Some(last) = w.last_request_time {
            let deficit = self.min_interval - (now - last);
            if deficit.is_positive() {
                self.clock.sleep(deficit.unsigned_abs());
                now = self.clock.now();
            }
        }

        w.window_start.get_or_insert(now);
        w.last_request_time = Some(now);
        w.count_in_window += 1;
        w.recent.push_back(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(rps: f64, rpm: u32) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let limits = RateLimits {
            requests_per_second: rps,
            requests_per_minute: rpm,
        };
        let limiter = RateLimiter::new(limits, clock.clone()).expect("valid limits");

        (limiter, clock)
    }

    #[test]
    fn rejects_non_positive_rates() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());

        for rps in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let limits = RateLimits {
                requests_per_second: rps,
                requests_per_minute: 10,
            };
            assert!(RateLimiter::new(limits, clock.clone()).is_err(), "rps={rps}");
        }

        let limits = RateLimits {
            requests_per_second: 1.0,
            requests_per_minute: 0,
        };
        assert!(RateLimiter::new(limits, clock).is_err());
    }

    #[test]
    fn first_call_does_not_wait() {
        let (limiter, clock) = limiter(3.0, 50);

        limiter.acquire();

        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn successive_calls_are_spaced_by_the_minimum_interval() {
        for rps in [0.5, 2.0, 3.0, 10.0] {
            let (limiter, clock) = limiter(rps, 10_000);
            let min = Duration::seconds_f64(1.0 / rps);
            let mut stamps = Vec::new();

            for _ in 0..20 {
                limiter.acquire();
                stamps.push(clock.now());
            }

            for pair in stamps.windows(2) {
                // Float rounding in `seconds_f64` may shave off a nanosecond.
                assert!(pair[1] - pair[0] >= min - Duration::nanoseconds(1), "rps={rps}");
            }
        }
    }

    #[test]
    fn no_sleep_when_caller_is_already_slow() {
        let (limiter, clock) = limiter(2.0, 50);

        limiter.acquire();
        clock.advance(std::time::Duration::from_secs(1));
        limiter.acquire();

        assert!(clock.sleeps().is_empty());
    }

    fn busiest_minute(stamps: &[OffsetDateTime]) -> usize {
        stamps
            .iter()
            .enumerate()
            .map(|(i, start)| {
                stamps[i..]
                    .iter()
                    .take_while(|t| **t - *start < WINDOW)
                    .count()
            })
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn per_minute_budget_is_never_exceeded() {
        let (limiter, clock) = limiter(1000.0, 5);
        let mut stamps = Vec::new();

        for _ in 0..23 {
            limiter.acquire();
            stamps.push(clock.now());
        }

        assert!(busiest_minute(&stamps) <= 5);
    }

    #[test]
    fn bursts_straddling_a_window_boundary_stay_within_budget() {
        let (limiter, clock) = limiter(1000.0, 5);
        let mut stamps = Vec::new();

        limiter.acquire();
        stamps.push(clock.now());
        clock.advance(std::time::Duration::from_millis(59_900));
        for _ in 0..4 {
            limiter.acquire();
            stamps.push(clock.now());
        }
        clock.advance(std::time::Duration::from_millis(100));
        for _ in 0..5 {
            limiter.acquire();
            stamps.push(clock.now());
        }

        assert_eq!(busiest_minute(&stamps), 5);
        assert!(
            clock.sleeps().iter().any(|d| *d > std::time::Duration::from_secs(50)),
            "the second burst must wait for the rolling minute"
        );
    }

    #[test]
    fn window_resets_after_a_minute_of_idleness() {
        let (limiter, clock) = limiter(1000.0, 2);

        limiter.acquire();
        limiter.acquire();
        clock.advance(std::time::Duration::from_secs(61));
        let before = clock.sleeps().len();
        limiter.acquire();

        assert_eq!(clock.sleeps().len(), before);
    }
}
