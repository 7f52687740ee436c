//! Opt-in retry of source reads.
//!
//! A failed page fetch is fatal by default. Operators can allow a bounded
//! number of retries (`options.max_retries`); each retry is logged at `warn`
//! and, once the budget is spent, the last error propagates unchanged.
//! Rate-limit responses wait at least as long as the store asked.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Retry budget and backoff shape.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt. `0` disables retrying.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay, including rate-limit waits.
    pub max_delay: Duration,
    /// Factor applied to the delay after every retry.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

impl RetryPolicy {
    /// No retries: the first failure propagates.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Exponential backoff from 500ms, capped at 60s.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }

    /// Backoff delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()))
    }

    /// Delay before retrying after `error`, honoring rate-limit hints.
    fn delay_after(&self, error: &Error, attempt: u32) -> Duration {
        let backoff = self.delay_for_attempt(attempt);
        match error {
            Error::RateLimit(secs) => Duration::from_secs(*secs).min(self.max_delay).max(backoff),
            _ => backoff,
        }
    }
}

/// Whether retrying `error` could succeed.
///
/// Rate limits, IO failures and connection-level trouble (timeouts, resets,
/// 5xx) are transient. Authentication, configuration and row-level errors
/// are not.
pub fn is_transient(error: &Error) -> bool {
    match error {
        Error::RateLimit(_) | Error::Io(_) => true,
        Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        Error::SourceConnection(msg) | Error::Extraction(msg) => {
            let msg = msg.to_lowercase();
            [
                "timeout",
                "timed out",
                "connection refused",
                "connection reset",
                "request failed",
                "temporar",
                " 500",
                " 502",
                " 503",
                " 504",
            ]
            .iter()
            .any(|pattern| msg.contains(pattern))
        }
        _ => false,
    }
}

/// Runs `operation`, retrying transient failures within the policy budget.
///
/// # Errors
///
/// Returns the first non-transient error, or the last error once
/// `max_retries` retries have failed.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, operation_name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation = operation_name, retries = attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if attempt < policy.max_retries && is_transient(&error) => {
                attempt += 1;
                let delay = policy.delay_after(&error, attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying after transient error"
                );
                sleep(delay).await;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    // ==================== RetryPolicy Tests ====================

    #[test]
    fn test_default_policy_never_retries() {
        // Arrange & Act
        let policy = RetryPolicy::default();

        // Assert
        assert_eq!(policy.max_retries, 0);
        assert_eq!(policy, RetryPolicy::disabled());
    }

    #[test]
    fn test_delay_grows_exponentially_and_caps() {
        // Arrange
        let policy = RetryPolicy {
            max_retries: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        };

        // Act & Assert
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(5));
    }

    #[test]
    fn test_rate_limit_hint_is_honored_within_cap() {
        // Arrange
        let policy = RetryPolicy::with_max_retries(3);

        // Act
        let short = policy.delay_after(&Error::RateLimit(7), 1);
        let long = policy.delay_after(&Error::RateLimit(600), 1);

        // Assert
        assert_eq!(short, Duration::from_secs(7));
        assert_eq!(long, Duration::from_secs(60));
    }

    // ==================== is_transient Tests ====================

    #[test]
    fn test_transient_errors() {
        assert!(is_transient(&Error::RateLimit(60)));
        assert!(is_transient(&Error::SourceConnection(
            "MongoDB error 503: Service Unavailable".to_string()
        )));
        assert!(is_transient(&Error::SourceConnection(
            "MongoDB API request failed: operation timed out".to_string()
        )));
        assert!(is_transient(&Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset"
        ))));
    }

    #[test]
    fn test_permanent_errors() {
        assert!(!is_transient(&Error::Authentication("bad key".to_string())));
        assert!(!is_transient(&Error::SourceConnection(
            "MongoDB error 404: no such app".to_string()
        )));
        assert!(!is_transient(&Error::Config("missing url".to_string())));
        assert!(!is_transient(&Error::row_transform("tickets", "t1", "tags", "is not valid JSON")));
    }

    // ==================== with_retry Tests ====================

    #[tokio::test]
    async fn test_disabled_policy_propagates_first_failure() {
        // Arrange
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        // Act
        let result: Result<u32> = with_retry(&RetryPolicy::disabled(), "fetch", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::RateLimit(1))
            }
        })
        .await;

        // Assert
        assert!(matches!(result, Err(Error::RateLimit(1))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        // Arrange
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        // Act
        let result = with_retry(&fast_policy(3), "fetch", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::SourceConnection("connection reset by peer".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        // Assert
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_budget_returns_last_error() {
        // Arrange
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        // Act
        let result: Result<()> = with_retry(&fast_policy(2), "fetch", || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::SourceConnection(format!("timeout #{}", n)))
            }
        })
        .await;

        // Assert
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(result.unwrap_err().to_string().contains("timeout #2"));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        // Arrange
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        // Act
        let result: Result<()> = with_retry(&fast_policy(5), "fetch", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::Authentication("HTTP 401".to_string()))
            }
        })
        .await;

        // Assert
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
