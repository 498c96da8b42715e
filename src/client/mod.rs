//! Blob service HTTP client
//!
//! Implements the three multipart wire operations (create, upload part,
//! complete) against the JSON/HTTP blob API. The engine consumes the
//! [`MultipartApi`] trait so tests can substitute an in-memory service;
//! [`BlobApiClient`] is the production implementation with bearer-token
//! auth and retry-with-backoff for transient failures.
//!
//! # Wire protocol
//!
//! | Operation | Request | Headers |
//! |-----------|---------|---------|
//! | create    | `POST {base}/mpu?pathname=…` | `x-mpu-action: create` |
//! | upload    | `POST {base}/mpu/{pathname}` | `x-mpu-action: upload`, `x-mpu-key`, `x-mpu-upload-id`, `x-mpu-part-number` |
//! | complete  | `POST {base}/mpu/{pathname}` | `x-mpu-action: complete`, `x-mpu-key`, `x-mpu-upload-id`, JSON part list body |
//!
//! Responses are JSON; errors come back as `{"error": {"code", "message"}}`.

use crate::config::ServiceConfig;
use crate::error::BlobError;
use crate::multipart::CompletedPart;
use crate::progress::ProgressCallback;
use async_trait::async_trait;
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod retry;

pub use retry::with_retry;

/// Characters percent-encoded in the `x-mpu-key` header. Keys may contain
/// arbitrary utf8 but HTTP header values must stay us-ascii.
const KEY_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Server-side identity of one multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub upload_id: String,
    pub key: String,
    pub pathname: String,
}

/// Response of the create call.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUploadResponse {
    pub upload_id: String,
    pub key: String,
}

#[derive(Debug, Clone, Deserialize)]
struct UploadPartResponse {
    etag: String,
}

/// Metadata of the finalized object, returned by the complete call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobObject {
    pub url: String,
    #[serde(default)]
    pub download_url: Option<String>,
    pub pathname: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub content_disposition: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    code: String,
    #[serde(default)]
    message: Option<String>,
}

/// Per-upload options supplied by the caller.
#[derive(Clone, Default)]
pub struct UploadOptions {
    /// Forwarded as `x-content-type` at create time
    pub content_type: Option<String>,
    /// Body length when knowable, used for progress reporting
    pub content_length: Option<u64>,
    /// Cooperative cancellation for the whole session
    pub cancel: Option<CancellationToken>,
    /// Invoked as bytes are acknowledged by the service
    pub progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadOptions")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .field("cancel", &self.cancel.is_some())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// The remote collaborator consumed by the multipart engine.
///
/// Implementations own their retry policy; the engine treats any returned
/// error as fatal to the session.
#[async_trait]
pub trait MultipartApi: Send + Sync {
    /// Register a new multipart upload, returning its id and storage key.
    async fn create_upload(
        &self,
        pathname: &str,
        options: &UploadOptions,
    ) -> Result<CreateUploadResponse, BlobError>;

    /// Upload one part, returning its etag.
    async fn upload_part(
        &self,
        session: &UploadSession,
        part_number: u32,
        payload: Bytes,
    ) -> Result<String, BlobError>;

    /// Finalize the upload. `parts` must be sorted ascending by part number.
    async fn complete_upload(
        &self,
        session: &UploadSession,
        parts: &[CompletedPart],
    ) -> Result<BlobObject, BlobError>;
}

/// HTTP client for the blob service.
pub struct BlobApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    retry: crate::config::RetryConfig,
}

impl BlobApiClient {
    pub fn new(config: &ServiceConfig) -> Result<Self, BlobError> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_seconds {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http = builder
            .build()
            .map_err(|e| BlobError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            retry: config.retry.clone(),
        })
    }

    fn mpu_url(&self, pathname: &str) -> String {
        format!("{}/mpu/{}", self.base_url, pathname)
    }

    fn encoded_key(key: &str) -> String {
        utf8_percent_encode(key, KEY_ENCODE_SET).to_string()
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, BlobError> {
        let status = response.status();

        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| BlobError::Transport(format!("invalid response body: {e}")));
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();

        Err(map_api_error(status.as_u16(), &body, retry_after))
    }

    fn map_send_error(e: reqwest::Error) -> BlobError {
        // connection-level failures are what the service-unavailable
        // retry path is for
        if e.is_connect() || e.is_timeout() || e.is_request() {
            BlobError::ServiceUnavailable
        } else {
            BlobError::Transport(e.to_string())
        }
    }
}

/// Map a non-2xx response to the error taxonomy.
fn map_api_error(status: u16, body: &str, retry_after: Option<u64>) -> BlobError {
    if let Ok(parsed) = serde_json::from_str::<ApiErrorBody>(body) {
        let message = parsed.error.message.unwrap_or_default();
        return match parsed.error.code.as_str() {
            "service_unavailable" | "internal_server_error" | "unknown_error" => {
                BlobError::ServiceUnavailable
            }
            "rate_limited" => BlobError::RateLimited {
                retry_after: retry_after.map(Duration::from_secs),
            },
            "bad_request" => BlobError::Validation(message),
            code => BlobError::Api {
                code: code.to_string(),
                message,
            },
        };
    }

    match status {
        429 => BlobError::RateLimited {
            retry_after: retry_after.map(Duration::from_secs),
        },
        500..=599 => BlobError::ServiceUnavailable,
        400 => BlobError::Validation(format!("bad request: {body}")),
        _ => BlobError::Api {
            code: format!("http_{status}"),
            message: body.to_string(),
        },
    }
}

#[async_trait]
impl MultipartApi for BlobApiClient {
    #[tracing::instrument(
        name = "blob.mpu.create",
        skip(self, options),
        fields(blob.pathname = %pathname),
        err
    )]
    async fn create_upload(
        &self,
        pathname: &str,
        options: &UploadOptions,
    ) -> Result<CreateUploadResponse, BlobError> {
        if pathname.is_empty() {
            return Err(BlobError::Validation("pathname is required".into()));
        }

        let response: CreateUploadResponse = with_retry(&self.retry, "mpu_create", || async move {
            let mut request = self
                .http
                .post(format!("{}/mpu", self.base_url))
                .query(&[("pathname", pathname)])
                .bearer_auth(&self.token)
                .header("x-mpu-action", "create");

            if let Some(content_type) = &options.content_type {
                request = request.header("x-content-type", content_type);
            }

            let response = request.send().await.map_err(Self::map_send_error)?;
            Self::decode(response).await
        })
        .await?;

        tracing::info!(
            upload_id = %response.upload_id,
            key = %response.key,
            "created multipart upload"
        );

        Ok(response)
    }

    #[tracing::instrument(
        name = "blob.mpu.upload_part",
        skip(self, session, payload),
        fields(
            blob.upload_id = %session.upload_id,
            blob.part_number = part_number,
            upload.bytes = payload.len()
        ),
        err
    )]
    async fn upload_part(
        &self,
        session: &UploadSession,
        part_number: u32,
        payload: Bytes,
    ) -> Result<String, BlobError> {
        let response: UploadPartResponse = with_retry(&self.retry, "mpu_upload_part", || {
            // Bytes clones are reference counted, retries do not copy the payload
            let payload = payload.clone();
            async move {
                let response = self
                    .http
                    .post(self.mpu_url(&session.pathname))
                    .bearer_auth(&self.token)
                    .header("x-mpu-action", "upload")
                    .header("x-mpu-key", Self::encoded_key(&session.key))
                    .header("x-mpu-upload-id", &session.upload_id)
                    .header("x-mpu-part-number", part_number.to_string())
                    .body(payload)
                    .send()
                    .await
                    .map_err(Self::map_send_error)?;
                Self::decode(response).await
            }
        })
        .await?;

        tracing::debug!(etag = %response.etag, "uploaded part");

        Ok(response.etag)
    }

    #[tracing::instrument(
        name = "blob.mpu.complete",
        skip(self, session, parts),
        fields(
            blob.upload_id = %session.upload_id,
            blob.parts_count = parts.len()
        ),
        err
    )]
    async fn complete_upload(
        &self,
        session: &UploadSession,
        parts: &[CompletedPart],
    ) -> Result<BlobObject, BlobError> {
        let blob: BlobObject = with_retry(&self.retry, "mpu_complete", || async move {
            let response = self
                .http
                .post(self.mpu_url(&session.pathname))
                .bearer_auth(&self.token)
                .header("content-type", "application/json")
                .header("x-mpu-action", "complete")
                .header("x-mpu-key", Self::encoded_key(&session.key))
                .header("x-mpu-upload-id", &session.upload_id)
                .json(&parts)
                .send()
                .await
                .map_err(Self::map_send_error)?;
            Self::decode(response).await
        })
        .await?;

        tracing::info!(url = %blob.url, "completed multipart upload");

        Ok(blob)
    }
}
