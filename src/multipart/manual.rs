//! Manual multipart uploader
//!
//! For callers that do their own slicing (resumable uploads, parts
//! arriving from elsewhere): create a session, push numbered parts at
//! will, then complete with the collected acknowledgments. The automatic
//! engine in [`coordinator`](crate::multipart::coordinator) remains the
//! recommended path for plain streams.

use crate::client::{BlobObject, MultipartApi, UploadOptions, UploadSession};
use crate::error::BlobError;
use crate::multipart::{CompletedPart, MAX_PARTS};
use bytes::Bytes;
use std::sync::Arc;

/// A handle for one manually driven multipart upload session.
pub struct MultipartUploader<A: MultipartApi> {
    api: Arc<A>,
    session: UploadSession,
}

impl<A: MultipartApi> MultipartUploader<A> {
    /// Register a new multipart upload for `pathname`.
    pub async fn create(
        api: Arc<A>,
        pathname: &str,
        options: UploadOptions,
    ) -> Result<Self, BlobError> {
        let created = api.create_upload(pathname, &options).await?;

        Ok(Self {
            api,
            session: UploadSession {
                upload_id: created.upload_id,
                key: created.key,
                pathname: pathname.to_string(),
            },
        })
    }

    pub fn upload_id(&self) -> &str {
        &self.session.upload_id
    }

    pub fn key(&self) -> &str {
        &self.session.key
    }

    /// Upload one part. Part numbers are the caller's responsibility and
    /// must be unique and contiguous from 1 by completion time.
    pub async fn upload_part(
        &self,
        part_number: u32,
        payload: Bytes,
    ) -> Result<CompletedPart, BlobError> {
        if part_number == 0 || part_number > MAX_PARTS {
            return Err(BlobError::Validation(format!(
                "part number must be between 1 and {MAX_PARTS}"
            )));
        }
        if payload.is_empty() {
            return Err(BlobError::Validation("part payload may not be empty".into()));
        }

        let etag = self
            .api
            .upload_part(&self.session, part_number, payload)
            .await
            .map_err(|e| e.in_session(&self.session.upload_id, &self.session.key))?;

        Ok(CompletedPart { part_number, etag })
    }

    /// Finalize the upload with every acknowledged part. Parts are sorted
    /// by part number before they are sent.
    pub async fn complete(&self, mut parts: Vec<CompletedPart>) -> Result<BlobObject, BlobError> {
        if parts.is_empty() {
            return Err(BlobError::Validation(
                "cannot complete a multipart upload without parts".into(),
            ));
        }

        parts.sort_by_key(|p| p.part_number);

        self.api
            .complete_upload(&self.session, &parts)
            .await
            .map_err(|e| e.in_session(&self.session.upload_id, &self.session.key))
    }
}
