//! Bounded retry with exponential backoff for blocking HTTP calls.
//!
//! The policy is a plain value handed to every network-calling component, so
//! retry behavior stays out of the business logic.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{RequestBuilder, Response};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 2_000,
        }
    }
}

pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Exponential backoff delay for the given 1-based attempt, capped at
/// `max_delay_ms`, with a small additive jitter. A `Retry-After` value from
/// the server takes precedence (capped at 30s).
pub fn backoff_delay(
    attempt: u32,
    policy: &RetryPolicy,
    retry_after: Option<&reqwest::header::HeaderValue>,
) -> Duration {
    if let Some(value) = retry_after.and_then(|v| v.to_str().ok())
        && let Ok(secs) = value.parse::<u64>()
    {
        return Duration::from_secs(secs.min(30));
    }

    let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
    let base = policy
        .base_delay_ms
        .saturating_mul(exponent)
        .min(policy.max_delay_ms);
    let jitter = (std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0))
        % 150;
    Duration::from_millis(base.saturating_add(jitter))
}

/// Send a request, retrying transient failures (429/408/5xx and transport
/// errors) up to `policy.max_attempts` times. Non-retryable statuses are
/// returned to the caller for classification.
pub fn send_with_retry(
    request: RequestBuilder,
    policy: &RetryPolicy,
) -> Result<Response, reqwest::Error> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        // Bodies built from byte buffers are always cloneable; fall back to a
        // single un-retried send if not.
        let Some(cloned) = request.try_clone() else {
            return request.send();
        };

        match cloned.send() {
            Ok(response) => {
                let status = response.status();
                if is_retryable_status(status) && attempt < attempts {
                    let delay = backoff_delay(
                        attempt,
                        policy,
                        response.headers().get(reqwest::header::RETRY_AFTER),
                    );
                    log::warn!(
                        "retry {}/{} after status {} (sleep {:?})",
                        attempt,
                        attempts,
                        status,
                        delay
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                    continue;
                }
                return Ok(response);
            }
            Err(err) => {
                if (err.is_timeout() || err.is_connect()) && attempt < attempts {
                    let delay = backoff_delay(attempt, policy, None);
                    log::warn!(
                        "retry {}/{} after transport error: {} (sleep {:?})",
                        attempt,
                        attempts,
                        err,
                        delay
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                    continue;
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(is_retryable_status(StatusCode::REQUEST_TIMEOUT));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::OK));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        let d1 = backoff_delay(1, &policy, None);
        let d3 = backoff_delay(3, &policy, None);
        assert!(d1 >= Duration::from_millis(250));
        assert!(d1 < Duration::from_millis(250 + 150));
        // attempt 3 => 250 * 4 = 1000ms base
        assert!(d3 >= Duration::from_millis(1000));
        // attempt 10 hits the cap
        let d10 = backoff_delay(10, &policy, None);
        assert!(d10 < Duration::from_millis(2_000 + 150));
    }

    #[test]
    fn retry_after_header_wins() {
        let policy = RetryPolicy::default();
        let header = reqwest::header::HeaderValue::from_static("5");
        assert_eq!(
            backoff_delay(1, &policy, Some(&header)),
            Duration::from_secs(5)
        );
        // unparseable header falls back to exponential backoff
        let bad = reqwest::header::HeaderValue::from_static("soon");
        assert!(backoff_delay(1, &policy, Some(&bad)) < Duration::from_secs(1));
    }
}
