//! Upload coordinator
//!
//! Owns one multipart upload end-to-end: creates the session, wires the
//! slicer to the uploader, collects acknowledgments, decides completion
//! and finalizes. Completion is structural rather than polled: the slicer
//! dropping its sender marks stream exhaustion, the uploader returning
//! marks the queue drained and zero in-flight calls, and only then does
//! the acknowledgment channel close and the complete call go out.

use crate::client::{BlobObject, MultipartApi, UploadOptions, UploadSession};
use crate::config::UploadConfig;
use crate::error::BlobError;
use crate::metrics;
use crate::multipart::memory::MemoryBudget;
use crate::multipart::slicer::StreamSlicer;
use crate::multipart::uploader::{PartUploader, StateCell, UploadedPart};
use crate::multipart::{CompletedPart, SessionState};
use crate::progress::ProgressReporter;
use bytes::Bytes;
use futures::Stream;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Drives multipart uploads against a [`MultipartApi`] collaborator.
pub struct UploadCoordinator<A: MultipartApi> {
    api: Arc<A>,
    config: UploadConfig,
}

impl<A: MultipartApi> UploadCoordinator<A> {
    pub fn new(api: Arc<A>, config: UploadConfig) -> Self {
        Self { api, config }
    }

    /// Upload `body` to `pathname` as a multipart upload.
    ///
    /// Any failure after the session was created is returned as
    /// [`BlobError::Session`] carrying the upload id and key, so the
    /// orphaned partial upload can be cleaned up manually.
    #[tracing::instrument(
        name = "blob.mpu.upload",
        skip(self, body, options),
        fields(blob.pathname = %pathname),
        err
    )]
    pub async fn upload<S>(
        &self,
        pathname: &str,
        body: S,
        options: UploadOptions,
    ) -> Result<BlobObject, BlobError>
    where
        S: Stream<Item = Result<Bytes, BlobError>> + Unpin,
    {
        let started = Instant::now();

        let created = self.api.create_upload(pathname, &options).await.map_err(|e| {
            metrics::record_upload_failure(e.kind());
            e
        })?;

        let session = UploadSession {
            upload_id: created.upload_id,
            key: created.key,
            pathname: pathname.to_string(),
        };

        let state = StateCell::new();
        // a child token lets caller-side aborts propagate while internal
        // teardown leaves the caller's token untouched
        let cancel = match &options.cancel {
            Some(token) => token.child_token(),
            None => CancellationToken::new(),
        };

        let result = self
            .run_session(&session, body, &options, state.clone(), cancel.clone())
            .await;

        match result {
            Ok((blob, total_bytes, parts_count)) => {
                state.advance(SessionState::Completed);
                metrics::record_upload_success(total_bytes, parts_count);
                metrics::record_upload_duration(started.elapsed().as_secs_f64());

                tracing::info!(
                    upload_id = %session.upload_id,
                    total_bytes,
                    parts = parts_count,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "multipart upload completed"
                );

                Ok(blob)
            }
            Err(e) => {
                // stop dispatch and abort in-flight calls; idempotent
                cancel.cancel();
                state.advance(SessionState::Cancelled);
                metrics::record_upload_failure(e.kind());

                tracing::warn!(
                    upload_id = %session.upload_id,
                    key = %session.key,
                    error = %e,
                    "multipart upload cancelled"
                );

                Err(e.in_session(&session.upload_id, &session.key))
            }
        }
    }

    async fn run_session<S>(
        &self,
        session: &UploadSession,
        body: S,
        options: &UploadOptions,
        state: Arc<StateCell>,
        cancel: CancellationToken,
    ) -> Result<(BlobObject, u64, usize), BlobError>
    where
        S: Stream<Item = Result<Bytes, BlobError>> + Unpin,
    {
        let budget = MemoryBudget::new(self.config.max_bytes_in_memory());
        let (parts_tx, parts_rx) = mpsc::channel(self.config.max_concurrent_uploads.max(1));
        let (acks_tx, mut acks_rx) =
            mpsc::channel::<UploadedPart>(self.config.max_concurrent_uploads.max(1));

        let slicer = StreamSlicer::new(body, self.config.part_size, budget.clone());
        let uploader = PartUploader::new(
            self.api.clone(),
            session.clone(),
            self.config.max_concurrent_uploads,
            budget,
            state.clone(),
            cancel.clone(),
        );

        let progress = ProgressReporter::new(options.progress.clone(), options.content_length);

        let collect = async {
            let mut parts: Vec<CompletedPart> = Vec::new();
            let mut loaded = 0u64;
            while let Some(ack) = acks_rx.recv().await {
                loaded += ack.size as u64;
                progress.report(loaded);
                parts.push(ack.part);
            }
            Ok::<_, BlobError>(parts)
        };

        // first failure drops the other two futures, which aborts any
        // in-flight requests
        let (total_bytes, (), mut parts) = tokio::try_join!(
            slicer.run(parts_tx, cancel.clone()),
            uploader.run(parts_rx, acks_tx),
            collect,
        )?;

        if parts.is_empty() {
            return Err(BlobError::Validation(
                "cannot multipart upload an empty body".into(),
            ));
        }

        // acknowledgments arrive out of order, the service wants them sorted
        parts.sort_by_key(|p| p.part_number);

        state.advance(SessionState::Completing);
        let blob = self.api.complete_upload(session, &parts).await?;

        progress.complete(total_bytes);

        Ok((blob, total_bytes, parts.len()))
    }
}
