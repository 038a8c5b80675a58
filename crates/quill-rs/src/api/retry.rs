//! Retry with exponential backoff for transient API failures.
//!
//! The client reports failures as strings (`"OpenRouter API HTTP 503: ..."`,
//! `"request failed: ..."`), so classification works on message text. Rate
//! limits, 5xx responses and network failures are retried; client errors
//! (400, 401, 403, 404, 422) never are.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Backoff settings for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `0` means fail immediately.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Scale each delay by a pseudo-random factor in `[0.5, 1.0)`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(750),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.initial_delay.as_secs_f64() * self.multiplier.powi(exp);
        let capped = raw.min(self.max_delay.as_secs_f64());
        if self.jitter {
            Duration::from_secs_f64(capped * jitter_factor(attempt))
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

/// Cheap pseudo-random factor in `[0.5, 1.0)` from the clock and attempt.
fn jitter_factor(attempt: u32) -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.subsec_nanos());
    let mixed = nanos.wrapping_mul(2_654_435_761).wrapping_add(attempt.wrapping_mul(40_503));
    0.5 + f64::from(mixed % 1000) / 2000.0
}

/// How an error string should be treated by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rate limit, server error or network failure.
    Transient,
    /// The request itself is wrong; retrying cannot help.
    Permanent,
    /// Anything else. Not retried.
    Unknown,
}

/// Classify an error message produced by the API client.
pub fn classify_error(error: &str) -> ErrorClass {
    const PERMANENT: &[&str] = &["HTTP 400", "HTTP 401", "HTTP 403", "HTTP 404", "HTTP 422"];
    const TRANSIENT_STATUS: &[&str] = &["HTTP 429", "HTTP 500", "HTTP 502", "HTTP 503", "HTTP 504"];
    const TRANSIENT_TEXT: &[&str] = &[
        "request failed:",
        "failed to read response",
        "connection reset",
        "connection refused",
        "timed out",
        "broken pipe",
    ];

    if PERMANENT.iter().any(|p| error.contains(p)) {
        return ErrorClass::Permanent;
    }
    if TRANSIENT_STATUS.iter().any(|p| error.contains(p)) {
        return ErrorClass::Transient;
    }
    let lower = error.to_lowercase();
    if TRANSIENT_TEXT.iter().any(|p| lower.contains(p)) {
        ErrorClass::Transient
    } else {
        ErrorClass::Unknown
    }
}

/// Run `call` until it succeeds, fails with a non-transient error, or the
/// policy's retries are exhausted.
pub async fn retry_transient<T, F, Fut>(policy: &RetryPolicy, mut call: F) -> Result<T, String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < policy.max_retries && classify_error(&e) == ErrorClass::Transient => {
                let delay = policy.backoff(attempt);
                warn!(
                    "Transient API error (attempt {}/{}): {e}. Retrying in {delay:?}",
                    attempt + 1,
                    policy.max_retries,
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn instant_policy(retries: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(retries)
            .with_initial_delay(Duration::ZERO)
            .with_jitter(false)
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(2),
            ..RetryPolicy::default().with_jitter(false)
        };
        assert!(policy.backoff(1) > policy.backoff(0));
        assert_eq!(policy.backoff(20), Duration::from_secs(2));
    }

    #[test]
    fn jitter_never_exceeds_plain_delay() {
        let plain = RetryPolicy::default().with_jitter(false);
        let jittered = RetryPolicy::default();
        for attempt in 0..5 {
            assert!(jittered.backoff(attempt) <= plain.backoff(attempt));
        }
    }

    #[test]
    fn classifies_client_errors() {
        assert_eq!(classify_error("OpenRouter API HTTP 429: slow down"), ErrorClass::Transient);
        assert_eq!(classify_error("OpenRouter API HTTP 503: overloaded"), ErrorClass::Transient);
        assert_eq!(classify_error("request failed: connection reset"), ErrorClass::Transient);
        assert_eq!(classify_error("OpenRouter API HTTP 401: unauthorized"), ErrorClass::Permanent);
        assert_eq!(classify_error("failed to parse response: eof"), ErrorClass::Unknown);
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_transient(&instant_policy(3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("OpenRouter API HTTP 502: bad gateway".to_string())
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry_transient(&instant_policy(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("OpenRouter API HTTP 400: bad request".to_string()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry_transient(&instant_policy(2), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("request failed: timed out".to_string()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
