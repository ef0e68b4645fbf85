//! Boundary-facing retry helper for operations that can fail with a
//! transient network error. Not used by the routing decision itself (which
//! never touches the network) but exposed for the embedding application's
//! provider calls.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{error, info};

/// Attempt budget and delay schedule for [`with_retry`]. The `Default`
/// reproduces the reference values exactly; embedders can override either
/// field to tune backoff without forking the crate.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: usize,
    /// Delay before each retry, indexed by retry number (not total attempt
    /// number) — `delays[0]` is the wait before the second attempt.
    pub delays: Vec<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delays: vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000),
            ],
        }
    }
}

/// Something `with_retry` can classify as retryable or not. Implemented for
/// any error type that can report an error code, an HTTP status, and a type
/// tag, matching the several shapes a retryable error can take (`err.code`,
/// `err.error.code`, `err.type`, stringified `err.status`).
pub trait RetryClassifiable {
    /// A machine-readable error code, e.g. `"ECONNRESET"`.
    fn error_code(&self) -> Option<&str>;
    /// An HTTP status code, if this error carries one.
    fn http_status(&self) -> Option<u16>;
    /// A type tag, e.g. `"rate_limit_exceeded"`.
    fn error_type(&self) -> Option<&str>;
}

const RETRYABLE_CODES: &[&str] = &[
    "ECONNRESET",
    "ETIMEDOUT",
    "ECONNREFUSED",
    "rate_limit_exceeded",
];
const RETRYABLE_STATUSES: &[u16] = &[429, 500, 502, 503, 504];

/// True when `err` matches one of the retryable identifiers: a known error
/// code, a known error type tag, or one of the retryable HTTP statuses.
pub fn is_retryable<E: RetryClassifiable>(err: &E) -> bool {
    if let Some(code) = err.error_code() {
        if RETRYABLE_CODES.contains(&code) {
            return true;
        }
    }
    if let Some(t) = err.error_type() {
        if RETRYABLE_CODES.contains(&t) {
            return true;
        }
    }
    if let Some(status) = err.http_status() {
        if RETRYABLE_STATUSES.contains(&status) {
            return true;
        }
    }
    false
}

/// Runs `fn_`, retrying up to `config.max_attempts` times on a retryable
/// error with the configured delay schedule. Non-retryable errors fail
/// immediately. On final failure the last error is returned unchanged.
/// Retry attempts log at `info`; the final failure logs at `error`.
pub async fn with_retry<T, E, F, Fut>(config: &RetryConfig, label: &str, mut fn_: F) -> Result<T, E>
where
    E: RetryClassifiable + fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match fn_().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let retryable = is_retryable(&e);
                let attempts_left = config.max_attempts.saturating_sub(attempt);
                if !retryable || attempts_left == 0 {
                    error!(label, attempt, error = %e, "operation failed, not retrying further");
                    return Err(e);
                }
                let delay = config
                    .delays
                    .get(attempt - 1)
                    .copied()
                    .unwrap_or_else(|| config.delays.last().copied().unwrap_or(Duration::ZERO));
                info!(label, attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying after transient error");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct FakeError {
        code: Option<&'static str>,
        status: Option<u16>,
    }

    impl fmt::Display for FakeError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "fake error {:?} {:?}", self.code, self.status)
        }
    }

    impl RetryClassifiable for FakeError {
        fn error_code(&self) -> Option<&str> {
            self.code
        }
        fn http_status(&self) -> Option<u16> {
            self.status
        }
        fn error_type(&self) -> Option<&str> {
            None
        }
    }

    #[test]
    fn classifies_known_codes_and_statuses_as_retryable() {
        assert!(is_retryable(&FakeError {
            code: Some("ECONNRESET"),
            status: None
        }));
        assert!(is_retryable(&FakeError {
            code: None,
            status: Some(503)
        }));
        assert!(!is_retryable(&FakeError {
            code: Some("EINVAL"),
            status: Some(400)
        }));
    }

    #[tokio::test]
    async fn retries_up_to_max_attempts_then_fails() {
        let config = RetryConfig {
            max_attempts: 3,
            delays: vec![Duration::ZERO, Duration::ZERO, Duration::ZERO],
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result: Result<(), FakeError> = with_retry(&config, "test-op", || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FakeError {
                    code: Some("ETIMEDOUT"),
                    status: None,
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_fails_immediately() {
        let config = RetryConfig::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result: Result<(), FakeError> = with_retry(&config, "test-op", || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FakeError {
                    code: Some("EINVAL"),
                    status: None,
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_without_retry_when_first_attempt_ok() {
        let config = RetryConfig::default();
        let result: Result<i32, FakeError> = with_retry(&config, "test-op", || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }
}
