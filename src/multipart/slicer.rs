//! Stream slicer
//!
//! Consumes an input byte stream and emits fixed-size parts. Each emitted
//! part holds exactly `part_size` bytes except the final flush of the
//! stream, which may be shorter but never empty. Reading is gated by the
//! [`MemoryBudget`]: when the budget fills up the slicer suspends and
//! resumes from exactly where it left off once space frees up.

use crate::error::BlobError;
use crate::multipart::memory::MemoryBudget;
use crate::multipart::{PendingPart, MAX_PARTS};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Slices one input stream into sequentially numbered parts.
///
/// The run loop is owned by a single task, which is what makes repeated
/// suspension (budget waits, stream reads) safe without extra guards.
pub struct StreamSlicer<S> {
    stream: S,
    part_size: usize,
    budget: Arc<MemoryBudget>,
    buf: BytesMut,
    next_part_number: u32,
}

impl<S> StreamSlicer<S>
where
    S: Stream<Item = Result<Bytes, BlobError>> + Unpin,
{
    pub fn new(stream: S, part_size: usize, budget: Arc<MemoryBudget>) -> Self {
        Self {
            stream,
            part_size,
            budget,
            buf: BytesMut::new(),
            next_part_number: 1,
        }
    }

    /// Pump the stream until it is exhausted, sending every full part on
    /// `parts`. Dropping the sender on return is the stream-exhausted
    /// signal for the uploader.
    ///
    /// Returns the total number of bytes read. A stream read failure
    /// propagates without emitting the partially accumulated part.
    pub async fn run(
        mut self,
        parts: mpsc::Sender<PendingPart>,
        cancel: CancellationToken,
    ) -> Result<u64, BlobError> {
        let mut total_bytes = 0u64;

        loop {
            // backpressure: no reads while the budget is full
            tokio::select! {
                _ = cancel.cancelled() => return Err(BlobError::Aborted),
                _ = self.budget.wait_for_space() => {}
            }

            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(BlobError::Aborted),
                chunk = self.stream.next() => chunk,
            };

            match chunk {
                None => break,
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "slicer: stream read failed");
                    return Err(e);
                }
                Some(Ok(chunk)) => {
                    self.budget.reserve(chunk.len())?;
                    total_bytes += chunk.len() as u64;
                    self.buf.extend_from_slice(&chunk);

                    while self.buf.len() >= self.part_size {
                        let payload = self.buf.split_to(self.part_size).freeze();
                        self.emit(payload, &parts).await?;
                    }
                }
            }
        }

        // final undersized part, only when bytes remain
        if !self.buf.is_empty() {
            let payload = self.buf.split().freeze();
            self.emit(payload, &parts).await?;
        }

        tracing::debug!(
            total_bytes,
            parts = self.next_part_number - 1,
            "slicer: stream consumed"
        );

        Ok(total_bytes)
    }

    async fn emit(
        &mut self,
        payload: Bytes,
        parts: &mpsc::Sender<PendingPart>,
    ) -> Result<(), BlobError> {
        if self.next_part_number > MAX_PARTS {
            return Err(BlobError::Validation(format!(
                "upload exceeds the maximum of {MAX_PARTS} parts, increase part_size"
            )));
        }

        let part = PendingPart {
            part_number: self.next_part_number,
            payload,
        };
        self.next_part_number += 1;

        tracing::trace!(part_number = part.part_number, size = part.payload.len(), "slicer: emit part");

        // the receiver only disappears when the session is torn down
        parts.send(part).await.map_err(|_| BlobError::Aborted)
    }
}

/// Adapt an [`AsyncRead`](tokio::io::AsyncRead) (e.g. a file) into the
/// chunk stream the slicer consumes.
pub fn reader_stream<R>(reader: R) -> impl Stream<Item = Result<Bytes, BlobError>> + Unpin
where
    R: tokio::io::AsyncRead + Unpin,
{
    tokio_util::io::ReaderStream::new(reader).map(|chunk| chunk.map_err(BlobError::from))
}
