//! Retry ceiling and backoff

use rand::Rng;
use std::time::Duration;

/// Attempts before an item is given up on
pub const MAX_ATTEMPTS: u32 = 20;

/// Delay before the first retry
pub const BASE_DELAY: Duration = Duration::from_millis(400);

/// Growth factor per attempt
pub const BACKOFF: f64 = 1.6;

/// Upper bound (exclusive) of the random jitter added to every delay
pub const JITTER: Duration = Duration::from_millis(200);

/// `delay = base * factor^(attempts-1) + uniform(0, jitter)`.
///
/// Delays are bounded by the attempt ceiling, not by a delay cap.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: f64,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: BASE_DELAY,
            factor: BACKOFF,
            jitter: JITTER,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor.max(1.0);
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// The deterministic part of the delay after `attempts` failures
    pub fn base_backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1) as i32;
        self.base_delay.mul_f64(self.factor.powi(exponent))
    }

    pub fn backoff(&self, attempts: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
        };
        self.base_backoff(attempts) + jitter
    }
}
