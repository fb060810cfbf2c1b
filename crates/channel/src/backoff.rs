//! Retry policy with capped exponential back-off.

use std::time::Duration;

use fl_domain::config::ChannelConfig;

/// Controls how a connection cycle retries after a recoverable close.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Maximum delay between attempts (cap).
    pub max_delay: Duration,
    /// Multiplier applied per retry.
    pub backoff_factor: f64,
    /// Connection attempts a cycle may make before it gives up.
    pub retry_limit: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            retry_limit: 5,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &ChannelConfig) -> Self {
        Self {
            base_delay: cfg.base_delay(),
            max_delay: cfg.max_delay(),
            retry_limit: cfg.retry_limit.max(1),
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-indexed):
    /// `min(base * factor^(retry - 1), max)`.
    ///
    /// No jitter: there is one connection per process, so there is no
    /// herd to spread, and delays stay non-decreasing.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_ms = self.base_delay.as_millis() as f64;
        let delay_ms = base_ms * self.backoff_factor.powi(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// Whether `failures` consecutive failed attempts exhaust the budget.
    pub fn is_exhausted(&self, failures: u32) -> bool {
        failures >= self.retry_limit
    }
}

/// Fixed-budget retry for a single outbound message.
#[derive(Debug, Clone)]
pub struct SendRetry {
    pub attempts: u32,
    /// Delay after the first failed send; doubles afterwards.
    pub delay: Duration,
}

impl Default for SendRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

impl SendRetry {
    pub fn from_config(cfg: &ChannelConfig) -> Self {
        Self {
            attempts: cfg.send_attempts.max(1),
            delay: cfg.send_retry_delay(),
        }
    }

    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        self.delay * 2u32.saturating_pow(failed_attempt.saturating_sub(1))
    }
}
