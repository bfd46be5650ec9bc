use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry budget and exponential backoff schedule for failed publishes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// A row is dead-lettered once `retry_count` reaches this value.
    pub max_retries: u32,
    pub base: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base: Duration::from_secs(1),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Retry immediately, without any backoff delay.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base: Duration::ZERO,
            multiplier: 1.0,
            max_backoff: Duration::ZERO,
        }
    }

    /// Whether a row that has now failed `retry_count` times gets another attempt.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Delay before the next attempt after the `retry_count`-th failure:
    /// `base * multiplier^(retry_count - 1)`, capped at `max_backoff`.
    pub fn backoff_for(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.max(1) - 1;
        let exponent = i32::try_from(exponent).unwrap_or(i32::MAX);
        let raw_ms = self.base.as_millis() as f64 * self.multiplier.powi(exponent);
        let max_ms = self.max_backoff.as_millis() as f64;
        if !raw_ms.is_finite() || raw_ms >= max_ms {
            return self.max_backoff;
        }
        Duration::from_millis(raw_ms.round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially() {
        let policy = RetryPolicy {
            max_retries: 5,
            base: Duration::from_millis(100),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(10),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(800));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy {
            max_retries: 50,
            base: Duration::from_secs(1),
            multiplier: 3.0,
            max_backoff: Duration::from_secs(30),
        };
        assert_eq!(policy.backoff_for(10), Duration::from_secs(30));
        assert_eq!(policy.backoff_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn zero_retry_count_uses_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(0), policy.base);
    }

    #[test]
    fn retry_budget() {
        let policy = RetryPolicy::new(3);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn immediate_has_no_delay() {
        let policy = RetryPolicy::immediate(3);
        assert_eq!(policy.backoff_for(2), Duration::ZERO);
    }
}
