//! Uniform retry policy applied at the orchestrator boundary

use crate::config::RetryConfig;
use std::time::Duration;

/// Retry behavior as one explicit value object
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
}

impl RetryPolicy {
    /// Delay before re-running attempt `attempt + 1` (zero-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.powi(attempt as i32);
        self.base_delay.mul_f64(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            backoff_factor: cfg.backoff_factor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_grow_by_backoff_factor() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
        };
        assert_eq!(policy.delay(0), Duration::from_millis(500));
        assert_eq!(policy.delay(1), Duration::from_millis(1000));
        assert_eq!(policy.delay(2), Duration::from_millis(2000));
    }
}
