//! Retry policy for failed delivery attempts.

use chrono::{DateTime, Duration, Utc};

use campaign_core::config::RetryConfig;

const MAX_BACKOFF_EXPONENT: u32 = 20;
/// Longest wait between attempts (30 days).
const MAX_BACKOFF_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed per record, including the first. 1 disables
    /// retries.
    pub max_attempts: u32,
    /// Base delay; attempt `n` waits `backoff_secs * 2^(n-1)`.
    pub backoff_secs: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_secs: config.backoff_secs,
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff_secs: 0,
        }
    }

    /// Whether a record with `failed_attempts` failures gets another try.
    pub fn should_retry(&self, failed_attempts: usize) -> bool {
        (failed_attempts as u64) < u64::from(self.max_attempts)
    }

    pub fn backoff(&self, failed_attempts: usize) -> Duration {
        let exponent = (failed_attempts.max(1) as u32 - 1).min(MAX_BACKOFF_EXPONENT);
        let secs = self
            .backoff_secs
            .saturating_mul(1u64 << exponent)
            .min(MAX_BACKOFF_SECS);
        Duration::seconds(secs as i64)
    }

    pub fn next_attempt_at(&self, now: DateTime<Utc>, failed_attempts: usize) -> DateTime<Utc> {
        now + self.backoff(failed_attempts)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_does_not_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.should_retry(1));
    }

    #[test]
    fn exponential_backoff() {
        let policy = RetryPolicy {
            max_attempts: 4,
            backoff_secs: 60,
        };
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(3));
        assert!(!policy.should_retry(4));
        assert_eq!(policy.backoff(1), Duration::seconds(60));
        assert_eq!(policy.backoff(2), Duration::seconds(120));
        assert_eq!(policy.backoff(3), Duration::seconds(240));
    }

    #[test]
    fn zero_max_attempts_is_clamped() {
        let policy = RetryPolicy::from_config(&RetryConfig {
            max_attempts: 0,
            backoff_secs: 10,
        });
        assert_eq!(policy.max_attempts, 1);
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: u32::MAX,
            backoff_secs: u64::MAX,
        };
        assert_eq!(policy.backoff(500), Duration::days(30));
    }
}
