//! Exponential reconnect backoff with jitter.

use std::time::Duration;

use crate::config::BackoffConfig;
use crate::error::TransportError;

/// Reconnect delay policy.
///
/// Delay for attempt `n` is `min_delay * multiplier^n`, capped at
/// `max_delay`, then spread by ±`jitter` and capped again.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next reconnect; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.jittered(base)
    }

    /// Delay for a given transport failure.
    ///
    /// A rate-limit hint is honored as-is; everything else uses the
    /// exponential policy. Both advance the attempt counter.
    pub fn delay_for(&mut self, err: &TransportError) -> Duration {
        match err {
            TransportError::RateLimited {
                retry_after: Some(hint),
            } => {
                self.attempt = self.attempt.saturating_add(1);
                *hint
            }
            _ => self.next_delay(),
        }
    }

    /// Back to `min_delay` after a healthy connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        let min = self.config.min_delay_ms as f64;
        let max = self.config.max_delay_ms as f64;
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = min * self.config.multiplier.powi(exp);
        let capped = if scaled.is_finite() { scaled.min(max) } else { max };
        Duration::from_millis(capped as u64)
    }

    fn jittered(&self, base: Duration) -> Duration {
        let jitter = self.config.jitter;
        if jitter <= 0.0 {
            return base;
        }
        let millis = base.as_millis() as f64;
        let factor = 1.0 + rand::random_range(-jitter..=jitter);
        let spread = (millis * factor).clamp(1.0, self.config.max_delay_ms as f64);
        Duration::from_millis(spread as u64)
    }
}
