//! Bounded retry with a pluggable backoff, shared by the HTTP gateway and batch submission.

use std::fmt::Display;
use std::time::Duration;

use crate::clock::Clock;

/// Delay schedule between attempts. `attempt` is zero-based: the delay after the
/// first failure is `delay(0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base * 2^attempt`.
    Exponential { base: Duration },
    Fixed(Duration),
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Exponential { base } => base.saturating_mul(2u32.saturating_pow(attempt)),
            Backoff::Fixed(d) => d,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl Default for RetryPolicy {
    /// Three attempts, sleeping 1s then 2s.
    fn default() -> Self {
        Self::exponential(3)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Doubling backoff starting at one second.
    pub fn exponential(max_attempts: u32) -> Self {
        Self::new(
            max_attempts,
            Backoff::Exponential {
                base: Duration::from_secs(1),
            },
        )
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The final attempt is never followed by a sleep.
    ///
    /// `op` receives the zero-based attempt number.
    pub fn run<T, E, F, P>(&self, clock: &dyn Clock, mut op: F, retryable: P) -> Result<T, E>
    where
        E: Display,
        F: FnMut(u32) -> Result<T, E>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(v) => return Ok(v),
                Err(e) => {
                    let last = attempt + 1 >= self.max_attempts;
                    if last || !retryable(&e) {
                        return Err(e);
                    }

                    let delay = self.backoff.delay(attempt);
                    tracing::warn!(
                        "attempt {}/{} failed: {e}; retrying in {:?}",
                        attempt + 1,
                        self.max_attempts,
                        delay
                    );
                    clock.sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}
