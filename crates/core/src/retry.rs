//! Fetch error taxonomy and retry policy.
//!
//! Transient errors (timeouts, connection resets, HTTP 5xx/429) are
//! retried with exponential backoff and jitter; everything else fails the
//! task immediately. HTTP 429 is remote throttling and additionally feeds
//! back into the rate limiter (handled by the worker, see `engine`).

use rand::Rng;
use std::time::Duration;
use thiserror::Error;

use crate::config::EngineConfig;

/// Errors from fetching one media item.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request timeout")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("Response body error: {0}")]
    Body(String),

    #[error("Disk write failed: {0}")]
    DiskWrite(String),

    #[error("Empty response body")]
    EmptyBody,

    #[error("Malformed media: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Whether this error is worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::Connection(_) | FetchError::Body(_) => true,
            FetchError::Status(status) => *status >= 500 || *status == 429,
            FetchError::DiskWrite(_) | FetchError::EmptyBody | FetchError::Malformed(_) => {
                false
            }
        }
    }

    /// Whether the remote told us to slow down.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::Status(429))
    }
}

/// Outcome of consulting the retry policy.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Wait this long, then try again.
    Retry(Duration),
    /// The task is done failing.
    GiveUp,
}

/// Exponential backoff with jitter, bounded by a maximum attempt count.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    pub fn from_engine_config(config: &EngineConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.retry_base_ms),
            Duration::from_millis(config.retry_max_delay_ms),
        )
    }

    /// Decide whether to retry after a failed attempt.
    ///
    /// `attempt` is the number of attempts made so far (1 after the first
    /// failure). Permanent errors and exhausted attempts give up.
    pub fn decide(&self, error: &FetchError, attempt: u32) -> RetryDecision {
        if !error.is_transient() || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.delay_for(attempt))
    }

    /// `min(max_delay, base * 2^attempt)` scaled by uniform 0.5–1.5.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        exp.mul_f64(jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(500), Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(FetchError::Timeout.is_transient());
        assert!(FetchError::Connection("reset".into()).is_transient());
        assert!(FetchError::Status(500).is_transient());
        assert!(FetchError::Status(503).is_transient());
        assert!(FetchError::Status(429).is_transient());
        assert!(FetchError::Body("reset mid-stream".into()).is_transient());

        assert!(!FetchError::Status(404).is_transient());
        assert!(!FetchError::Status(403).is_transient());
        assert!(!FetchError::DiskWrite("no space".into()).is_transient());
        assert!(!FetchError::EmptyBody.is_transient());
        assert!(!FetchError::Malformed("bad descriptor".into()).is_transient());
    }

    #[test]
    fn test_rate_limited_flag() {
        assert!(FetchError::Status(429).is_rate_limited());
        assert!(!FetchError::Status(500).is_rate_limited());
        assert!(!FetchError::Timeout.is_rate_limited());
    }

    #[test]
    fn test_permanent_error_gives_up_immediately() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(&FetchError::Status(404), 1),
            RetryDecision::GiveUp
        );
        assert_eq!(
            policy.decide(&FetchError::DiskWrite("denied".into()), 1),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_attempt_bound() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_secs(1));

        assert!(matches!(
            policy.decide(&FetchError::Timeout, 1),
            RetryDecision::Retry(_)
        ));
        assert!(matches!(
            policy.decide(&FetchError::Timeout, 2),
            RetryDecision::Retry(_)
        ));
        // Third failure of a 3-attempt policy is terminal.
        assert_eq!(policy.decide(&FetchError::Timeout, 3), RetryDecision::GiveUp);
    }

    #[test]
    fn test_delay_grows_and_is_capped() {
        let policy =
            RetryPolicy::new(10, Duration::from_millis(100), Duration::from_millis(800));

        // Jitter is 0.5-1.5x, so bounds are deterministic.
        for attempt in 1..=6 {
            let RetryDecision::Retry(delay) = policy.decide(&FetchError::Timeout, attempt)
            else {
                panic!("expected retry");
            };
            let uncapped = 100u64 * 2u64.pow(attempt);
            let expected = uncapped.min(800);
            assert!(delay >= Duration::from_millis(expected / 2));
            assert!(delay <= Duration::from_millis(expected * 3 / 2 + 1));
        }
    }

    #[test]
    fn test_from_engine_config() {
        let config = EngineConfig {
            max_attempts: 7,
            retry_base_ms: 250,
            retry_max_delay_ms: 10_000,
            ..Default::default()
        };
        let policy = RetryPolicy::from_engine_config(&config);
        assert_eq!(policy.max_attempts, 7);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(10));
    }
}
