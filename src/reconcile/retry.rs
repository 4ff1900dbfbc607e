//! Backoff schedule for submission retries

use rand::Rng;
use std::time::Duration;

/// Exponential backoff bounded by `max_delay`.
///
/// `jitter` is a fraction in `0.0..=1.0`; each delay is scaled by a random
/// factor in `1 - jitter ..= 1 + jitter` (still capped at `max_delay`).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based): base, 2x base, 4x base...
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(20);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        if self.jitter > 0.0 {
            let spread = self.jitter.min(1.0);
            let factor = rand::thread_rng().gen_range((1.0 - spread)..=(1.0 + spread));
            delay.mul_f64(factor).min(self.max_delay)
        } else {
            delay
        }
    }

    /// Backoff for `retry`, stretched to honor a server-provided Retry-After.
    pub fn delay_with_hint(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let delay = self.delay_for(retry);
        retry_after.map_or(delay, |hint| hint.max(delay))
    }
}
