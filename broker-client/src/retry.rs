//! Bounded exponential-backoff retry policy for broker calls.

use std::time::Duration;

use reqwest::StatusCode;

/// Tunables for C2's retry policy (`API_RETRY_ATTEMPTS`, `API_RETRY_DELAY`,
/// `API_RETRY_BACKOFF`).
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum attempts per call, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each retry.
    pub backoff_multiplier: f64,
    /// Hard per-request timeout.
    pub request_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Whether an HTTP status warrants a retry under the standard policy.
/// 429 and 5xx are retryable; any other 4xx fails fast.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Parse a `Retry-After` header value (seconds or HTTP-date) into a delay.
/// Only the seconds form is honoured; an HTTP-date or missing header falls
/// back to `None` so the caller uses the standard backoff computation.
pub fn retry_after_delay(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn retry_after_parses_seconds() {
        assert_eq!(retry_after_delay("5"), Some(Duration::from_secs(5)));
        assert_eq!(retry_after_delay("not-a-number"), None);
    }
}
