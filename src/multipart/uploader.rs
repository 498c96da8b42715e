//! Concurrency-gated part dispatcher
//!
//! Pulls sliced parts off the engine channel into a FIFO queue and keeps
//! up to `max_concurrent` remote upload calls in flight. Dispatch order is
//! ascending part number; completion order is whatever the network gives
//! back. Payload bytes are returned to the memory budget the moment the
//! remote call resolves, success or failure.

use crate::client::{MultipartApi, UploadSession};
use crate::error::BlobError;
use crate::multipart::memory::MemoryBudget;
use crate::multipart::{CompletedPart, PendingPart, SessionState};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Acknowledged part plus its payload size, for progress accounting.
#[derive(Debug, Clone)]
pub struct UploadedPart {
    pub part: CompletedPart,
    pub size: usize,
}

/// Shared, observable session state.
///
/// Written by the uploader (Uploading/Draining) and the coordinator
/// (Created/Completing/terminal states); terminal states stick.
#[derive(Debug)]
pub struct StateCell(Mutex<SessionState>);

impl StateCell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(SessionState::Created)))
    }

    pub fn advance(&self, next: SessionState) {
        let mut state = self.0.lock();
        if *state == next || state.is_terminal() {
            return;
        }
        tracing::debug!(from = ?*state, to = ?next, "session state");
        *state = next;
    }

    pub fn get(&self) -> SessionState {
        *self.0.lock()
    }
}

/// Uploads queued parts with bounded concurrency.
pub struct PartUploader<A: MultipartApi> {
    api: Arc<A>,
    session: UploadSession,
    max_concurrent: usize,
    budget: Arc<MemoryBudget>,
    state: Arc<StateCell>,
    cancel: CancellationToken,
}

impl<A: MultipartApi> PartUploader<A> {
    pub fn new(
        api: Arc<A>,
        session: UploadSession,
        max_concurrent: usize,
        budget: Arc<MemoryBudget>,
        state: Arc<StateCell>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            session,
            max_concurrent: max_concurrent.max(1),
            budget,
            state,
            cancel,
        }
    }

    /// Drain `parts` until the slicer closes the channel and every
    /// in-flight upload has been acknowledged. Each acknowledgment is
    /// forwarded on `acks`.
    ///
    /// The first part failure aborts the run; parts still queued are never
    /// dispatched and in-flight calls are dropped by the caller's
    /// cancellation.
    pub async fn run(
        &self,
        mut parts: mpsc::Receiver<PendingPart>,
        acks: mpsc::Sender<UploadedPart>,
    ) -> Result<(), BlobError> {
        let mut pending: VecDeque<PendingPart> = VecDeque::new();
        let mut in_flight = FuturesUnordered::new();
        let mut stream_open = true;

        loop {
            // fill idle capacity, FIFO keeps dispatch in part order
            while in_flight.len() < self.max_concurrent {
                match pending.pop_front() {
                    Some(part) => {
                        // once the stream closed the session is Draining;
                        // a late dispatch must not move it back
                        if stream_open {
                            self.state.advance(SessionState::Uploading);
                        }
                        in_flight.push(self.upload_one(part));
                    }
                    None => break,
                }
            }

            if !stream_open && pending.is_empty() && in_flight.is_empty() {
                return Ok(());
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(BlobError::Aborted),
                received = parts.recv(), if stream_open => match received {
                    Some(part) => pending.push_back(part),
                    None => {
                        stream_open = false;
                        if !pending.is_empty() || !in_flight.is_empty() {
                            self.state.advance(SessionState::Draining);
                        }
                    }
                },
                Some(done) = in_flight.next(), if !in_flight.is_empty() => {
                    let uploaded = done?;
                    // collector going away means the session is torn down
                    acks.send(uploaded).await.map_err(|_| BlobError::Aborted)?;
                }
            }
        }
    }

    async fn upload_one(&self, part: PendingPart) -> Result<UploadedPart, BlobError> {
        let part_number = part.part_number;
        let size = part.payload.len();

        tracing::trace!(part_number, size, "uploader: dispatch part");

        let result = self
            .api
            .upload_part(&self.session, part_number, part.payload)
            .await;

        // the payload left memory either way
        self.budget.release(size);

        let etag = result?;

        Ok(UploadedPart {
            part: CompletedPart { part_number, etag },
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{BlobObject, CreateUploadResponse, UploadOptions};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// In-memory service that tracks concurrency and dispatch order.
    #[derive(Default)]
    struct MockApi {
        active: AtomicUsize,
        max_active: AtomicUsize,
        dispatched: Mutex<Vec<u32>>,
        delay: Option<Duration>,
        fail_part: Option<u32>,
    }

    #[async_trait]
    impl MultipartApi for MockApi {
        async fn create_upload(
            &self,
            _pathname: &str,
            _options: &UploadOptions,
        ) -> Result<CreateUploadResponse, BlobError> {
            Ok(CreateUploadResponse {
                upload_id: "upload-1".into(),
                key: "key-1".into(),
            })
        }

        async fn upload_part(
            &self,
            _session: &UploadSession,
            part_number: u32,
            _payload: Bytes,
        ) -> Result<String, BlobError> {
            self.dispatched.lock().push(part_number);

            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.fail_part == Some(part_number) {
                return Err(BlobError::ServiceUnavailable);
            }

            Ok(format!("\"etag-{part_number}\""))
        }

        async fn complete_upload(
            &self,
            _session: &UploadSession,
            _parts: &[CompletedPart],
        ) -> Result<BlobObject, BlobError> {
            unreachable!("uploader never completes")
        }
    }

    fn session() -> UploadSession {
        UploadSession {
            upload_id: "upload-1".into(),
            key: "key-1".into(),
            pathname: "file.bin".into(),
        }
    }

    async fn run_uploader(
        api: Arc<MockApi>,
        max_concurrent: usize,
        parts: Vec<PendingPart>,
    ) -> (Result<(), BlobError>, Vec<UploadedPart>) {
        let budget = MemoryBudget::new(usize::MAX);
        let uploader = PartUploader::new(
            api,
            session(),
            max_concurrent,
            budget,
            StateCell::new(),
            CancellationToken::new(),
        );

        let (parts_tx, parts_rx) = mpsc::channel(64);
        let (acks_tx, mut acks_rx) = mpsc::channel(64);

        for part in parts {
            parts_tx.send(part).await.unwrap();
        }
        drop(parts_tx);

        let collector = tokio::spawn(async move {
            let mut acked = Vec::new();
            while let Some(ack) = acks_rx.recv().await {
                acked.push(ack);
            }
            acked
        });

        let result = uploader.run(parts_rx, acks_tx).await;
        let acked = collector.await.unwrap();
        (result, acked)
    }

    fn make_parts(n: u32) -> Vec<PendingPart> {
        (1..=n)
            .map(|part_number| PendingPart {
                part_number,
                payload: Bytes::from(vec![part_number as u8; 8]),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_concurrency_stays_bounded() {
        let api = Arc::new(MockApi {
            delay: Some(Duration::from_millis(10)),
            ..Default::default()
        });

        let (result, acked) = run_uploader(api.clone(), 3, make_parts(10)).await;

        result.unwrap();
        assert_eq!(acked.len(), 10);
        assert!(
            api.max_active.load(Ordering::SeqCst) <= 3,
            "in-flight uploads exceeded the limit"
        );
    }

    #[tokio::test]
    async fn test_dispatch_order_is_ascending() {
        let api = Arc::new(MockApi::default());

        let (result, _) = run_uploader(api.clone(), 1, make_parts(5)).await;

        result.unwrap();
        assert_eq!(*api.dispatched.lock(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_part_failure_stops_dispatching() {
        let api = Arc::new(MockApi {
            fail_part: Some(2),
            ..Default::default()
        });

        let (result, _) = run_uploader(api.clone(), 1, make_parts(5)).await;

        assert!(matches!(result, Err(BlobError::ServiceUnavailable)));
        // parts 3..5 were queued but must never reach the service
        assert_eq!(*api.dispatched.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_budget_released_after_each_ack() {
        let budget = MemoryBudget::new(1024);
        budget.reserve(40).unwrap(); // five 8-byte parts

        let api = Arc::new(MockApi::default());
        let uploader = PartUploader::new(
            api,
            session(),
            2,
            budget.clone(),
            StateCell::new(),
            CancellationToken::new(),
        );

        let (parts_tx, parts_rx) = mpsc::channel(16);
        let (acks_tx, mut acks_rx) = mpsc::channel(16);
        for part in make_parts(5) {
            parts_tx.send(part).await.unwrap();
        }
        drop(parts_tx);

        let drain = tokio::spawn(async move { while acks_rx.recv().await.is_some() {} });
        uploader.run(parts_rx, acks_tx).await.unwrap();
        drain.await.unwrap();

        assert_eq!(budget.used(), 0);
    }

    #[tokio::test]
    async fn test_state_never_leaves_draining_once_stream_closes() {
        // slow uploads with max_concurrent 1 so part 2 is still queued
        // when the channel closes
        let api = Arc::new(MockApi {
            delay: Some(Duration::from_millis(20)),
            ..Default::default()
        });
        let state = StateCell::new();
        let uploader = PartUploader::new(
            api,
            session(),
            1,
            MemoryBudget::new(usize::MAX),
            state.clone(),
            CancellationToken::new(),
        );

        let (parts_tx, parts_rx) = mpsc::channel(16);
        let (acks_tx, mut acks_rx) = mpsc::channel(16);
        for part in make_parts(2) {
            parts_tx.send(part).await.unwrap();
        }
        drop(parts_tx);

        let drain = tokio::spawn(async move { while acks_rx.recv().await.is_some() {} });
        uploader.run(parts_rx, acks_tx).await.unwrap();
        drain.await.unwrap();

        // part 2 was dispatched after the close, which must not move the
        // session back to Uploading
        assert_eq!(state.get(), SessionState::Draining);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let api = Arc::new(MockApi::default());
        let uploader = PartUploader::new(
            api.clone(),
            session(),
            2,
            MemoryBudget::new(usize::MAX),
            StateCell::new(),
            cancel,
        );

        let (_parts_tx, parts_rx) = mpsc::channel::<PendingPart>(4);
        let (acks_tx, _acks_rx) = mpsc::channel(4);

        let result = uploader.run(parts_rx, acks_tx).await;
        assert!(matches!(result, Err(BlobError::Aborted)));
        assert!(api.dispatched.lock().is_empty());
    }
}
