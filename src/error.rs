//! Error types shared across the client and the multipart engine.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by blob operations
#[derive(Error, Debug)]
pub enum BlobError {
    /// Rejected before any request was sent (bad pathname, content type,
    /// part size below the service minimum, too many parts). Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// The caller-supplied cancellation token fired. Distinct from service
    /// failures so callers can avoid alarming the end user.
    #[error("upload aborted by caller")]
    Aborted,

    /// The backing service is unreachable or returned 5xx after all retry
    /// attempts were exhausted.
    #[error("blob service unavailable, please retry later")]
    ServiceUnavailable,

    /// The service rejected the request with 429.
    #[error("rate limited by blob service")]
    RateLimited { retry_after: Option<Duration> },

    /// A structured error reported by the service.
    #[error("blob service error ({code}): {message}")]
    Api { code: String, message: String },

    /// Transport-level failure that is not a network outage (e.g. a
    /// malformed response body). Not retried.
    #[error("transport error: {0}")]
    Transport(String),

    /// The input stream failed mid-read.
    #[error("stream read error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violation in the memory budget.
    #[error("memory budget error: {0}")]
    Budget(String),

    /// A multipart session failed after it was created on the service.
    /// Carries the upload id and key so the caller can clean up the
    /// orphaned partial upload.
    #[error("multipart upload {upload_id} (key: {key}) failed: {source}")]
    Session {
        upload_id: String,
        key: String,
        #[source]
        source: Box<BlobError>,
    },
}

impl BlobError {
    /// Attach session context to an error, without double-wrapping.
    pub(crate) fn in_session(self, upload_id: &str, key: &str) -> BlobError {
        match self {
            BlobError::Session { .. } => self,
            other => BlobError::Session {
                upload_id: upload_id.to_string(),
                key: key.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// True when the failure was caused by caller cancellation.
    pub fn is_aborted(&self) -> bool {
        match self {
            BlobError::Aborted => true,
            BlobError::Session { source, .. } => source.is_aborted(),
            _ => false,
        }
    }

    /// True for failures the HTTP client may retry.
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(
            self,
            BlobError::ServiceUnavailable | BlobError::RateLimited { .. }
        )
    }

    /// Coarse label used for the error counter metric.
    pub fn kind(&self) -> &'static str {
        match self {
            BlobError::Validation(_) => "validation",
            BlobError::Aborted => "aborted",
            BlobError::ServiceUnavailable => "service_unavailable",
            BlobError::RateLimited { .. } => "rate_limited",
            BlobError::Api { .. } => "api",
            BlobError::Transport(_) => "transport",
            BlobError::Io(_) => "io",
            BlobError::Budget(_) => "budget",
            BlobError::Session { source, .. } => source.kind(),
        }
    }
}
