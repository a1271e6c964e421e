//! # Exponential Backoff
//!
//! Retry delays for keys that failed transiently. Each failure doubles the
//! delay, starting at the configured base and capped at the configured
//! maximum. A random jitter of up to 10% is added so keys that failed
//! together (e.g. during a hub outage) do not retry in lockstep.
//!
//! Default sequence with a 500ms base and 5m cap: 0.5s, 1s, 2s, 4s, ... 256s, 300s (max).

use rand::Rng;
use std::time::Duration;

/// Exponential backoff calculator
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay returned for the first failure
    base: Duration,
    /// Next delay before jitter
    current: Duration,
    /// Upper bound, jitter included
    max: Duration,
    /// Maximum jitter as a fraction of the current delay
    jitter: f64,
}

impl ExponentialBackoff {
    /// Create a new backoff starting at `base` and capped at `max`
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            current: base,
            max,
            jitter: 0.1,
        }
    }

    /// Same backoff without jitter
    #[cfg(test)]
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let delay = self.current;
        self.current = std::cmp::min(self.current.saturating_mul(2), self.max);

        let jitter = if self.jitter > 0.0 {
            delay.mul_f64(rand::thread_rng().gen_range(0.0..self.jitter))
        } else {
            Duration::ZERO
        };
        std::cmp::min(delay + jitter, self.max)
    }

    /// Reset the backoff to the initial state
    #[cfg(test)]
    pub fn reset(&mut self) {
        self.current = self.base;
    }

    /// Calculate the delay (without jitter) for a given error count (stateless)
    ///
    /// `error_count` is 1 for the first failure.
    #[cfg(test)]
    #[must_use]
    pub fn calculate_for_error_count(error_count: u32, base: Duration, max: Duration) -> Duration {
        let exponent = error_count.saturating_sub(1).min(31);
        std::cmp::min(base.saturating_mul(1u32 << exponent), max)
    }
}
