//! Memory budget for in-flight multipart payloads
//!
//! Bounds how many unacknowledged bytes may sit in memory at once,
//! regardless of stream size or upload latency. The slicer reserves space
//! before buffering a chunk and the uploader releases it as soon as the
//! remote acknowledgment comes back, success or failure.

use crate::error::BlobError;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

/// Tracks bytes currently held in memory for one upload session.
///
/// Pure bookkeeping, never performs I/O. Shared between the slicer
/// (reserve) and the uploader (release) via [`Arc`].
#[derive(Debug)]
pub struct MemoryBudget {
    max_bytes: usize,
    used: Mutex<usize>,
    space_freed: Notify,
}

impl MemoryBudget {
    pub fn new(max_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            max_bytes,
            used: Mutex::new(0),
            space_freed: Notify::new(),
        })
    }

    /// True while another chunk may be buffered. Callers must check this
    /// before calling [`reserve`](Self::reserve).
    pub fn has_space(&self) -> bool {
        *self.used.lock() < self.max_bytes
    }

    /// Bytes currently reserved.
    pub fn used(&self) -> usize {
        *self.used.lock()
    }

    /// Account for `n` buffered bytes.
    ///
    /// A single reservation may push usage past `max_bytes` (the last
    /// chunk read before the budget filled up is accepted whole); further
    /// reservations are rejected until space frees up.
    pub fn reserve(&self, n: usize) -> Result<(), BlobError> {
        let mut used = self.used.lock();

        if *used >= self.max_bytes {
            return Err(BlobError::Budget(
                "reserve called with no memory space left".into(),
            ));
        }

        *used += n;
        Ok(())
    }

    /// Return `n` bytes to the budget and wake one waiter if this made
    /// space available again.
    pub fn release(&self, n: usize) {
        let mut used = self.used.lock();
        let before = *used;
        *used = used.saturating_sub(n);
        let freed = before >= self.max_bytes && *used < self.max_bytes;
        drop(used);

        tracing::trace!(released = n, "memory budget: freed space");

        if freed {
            self.space_freed.notify_one();
        }
    }

    /// Suspend until [`has_space`](Self::has_space) is true.
    pub async fn wait_for_space(&self) {
        loop {
            if self.has_space() {
                return;
            }
            self.space_freed.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_reserve_and_release() {
        let budget = MemoryBudget::new(10);
        assert!(budget.has_space());

        budget.reserve(4).unwrap();
        budget.reserve(4).unwrap();
        assert_eq!(budget.used(), 8);
        assert!(budget.has_space());

        budget.reserve(4).unwrap();
        assert_eq!(budget.used(), 12);
        assert!(!budget.has_space());

        budget.release(4);
        assert_eq!(budget.used(), 8);
        assert!(budget.has_space());
    }

    #[test]
    fn test_reserve_without_space_fails() {
        let budget = MemoryBudget::new(4);
        budget.reserve(4).unwrap();

        let err = budget.reserve(1).unwrap_err();
        assert!(matches!(err, BlobError::Budget(_)));
        // failed reserve must not change accounting
        assert_eq!(budget.used(), 4);
    }

    #[test]
    fn test_release_never_underflows() {
        let budget = MemoryBudget::new(10);
        budget.reserve(2).unwrap();
        budget.release(5);
        assert_eq!(budget.used(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_space_wakes_on_release() {
        let budget = MemoryBudget::new(2);
        budget.reserve(2).unwrap();

        let waiter = {
            let budget = budget.clone();
            tokio::spawn(async move {
                budget.wait_for_space().await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        budget.release(1);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake after release")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_space_returns_immediately_when_free() {
        let budget = MemoryBudget::new(2);
        // must not hang
        tokio::time::timeout(Duration::from_millis(100), budget.wait_for_space())
            .await
            .unwrap();
    }
}
