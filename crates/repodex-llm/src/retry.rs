use std::future::Future;
use std::time::Duration;

use crate::error::LlmError;

/// Attempt budget and backoff schedule for transient provider failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    /// Upper bound for a single attempt.
    pub request_timeout: Duration,
    /// Longest wait between attempts, `Retry-After` hints included.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            request_timeout: Duration::from_secs(30),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Exponential backoff: `base * 2^attempt`, saturating.
#[must_use]
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1_u32.checked_shl(attempt).unwrap_or(u32::MAX))
}

/// Parse the `Retry-After` header value as seconds.
pub(crate) fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    let val = response.headers().get("retry-after")?;
    let secs = val.to_str().ok()?.parse::<u64>().ok()?;
    Some(Duration::from_secs(secs))
}

/// Run `f` until it succeeds, fails permanently, or the attempt budget is spent.
///
/// Each attempt is bounded by `policy.request_timeout`. A `RateLimited` error
/// carrying a `Retry-After` hint waits for that long instead of the computed
/// backoff. No wait exceeds `policy.max_delay`, since callers may hold a
/// concurrency permit across retries.
///
/// # Errors
///
/// Returns the last error once `policy.max_attempts` attempts have failed, or the
/// first non-transient error immediately.
pub async fn retry_transient<T, F, Fut>(
    provider_name: &str,
    policy: &RetryPolicy,
    mut f: F,
) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        let outcome = match tokio::time::timeout(policy.request_timeout, f()).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(policy.request_timeout)),
        };

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        attempt += 1;
        if !err.is_transient() || attempt >= attempts {
            return Err(err);
        }

        let delay = match &err {
            LlmError::RateLimited {
                retry_after: Some(hint),
            } => *hint,
            _ => backoff_delay(policy.base_backoff, attempt - 1),
        }
        .min(policy.max_delay);
        tracing::warn!(
            provider = provider_name,
            attempt,
            max_attempts = attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "transient embedding failure, retrying: {err}"
        );
        tokio::time::sleep(delay).await;
    }
}
