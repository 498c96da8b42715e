//! Retry with exponential backoff for transient service failures
//!
//! Only network-level outages and rate limits are retried; validation and
//! service-reported errors fail immediately. The multipart engine never
//! retries on its own, it relies on this layer.

use crate::config::RetryConfig;
use crate::error::BlobError;
use std::future::Future;
use std::time::Duration;

/// Run `op` up to `retry.max_attempts` times, sleeping between attempts.
///
/// The backoff doubles each attempt, capped at `max_backoff_ms`; a
/// rate-limit response with a `retry-after` hint overrides the computed
/// backoff.
pub async fn with_retry<T, F, Fut>(
    retry: &RetryConfig,
    operation: &str,
    mut op: F,
) -> Result<T, BlobError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BlobError>>,
{
    let max_attempts = retry.max_attempts.max(1);
    let mut backoff = Duration::from_millis(retry.initial_backoff_ms);
    let max_backoff = Duration::from_millis(retry.max_backoff_ms);

    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = match &e {
                    BlobError::RateLimited {
                        retry_after: Some(after),
                    } => *after,
                    _ => backoff,
                };

                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );

                tokio::time::sleep(delay).await;
                backoff = (backoff * 2).min(max_backoff);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
