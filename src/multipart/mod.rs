//! Multipart upload engine
//!
//! Takes an arbitrarily large byte stream, slices it into fixed-size parts,
//! uploads the parts concurrently under a bounded memory budget and
//! finalizes the upload once every part has been acknowledged.
//!
//! Pipeline:
//!
//! ```text
//! input stream -> StreamSlicer -> parts channel -> PartUploader -> remote
//!                      ^                               |
//!                      |     MemoryBudget (release)    v
//!                      +------- backpressure ---- acknowledgment
//! ```
//!
//! The [`coordinator::UploadCoordinator`] owns the wiring and the session
//! state machine.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub mod coordinator;
pub mod manual;
pub mod memory;
pub mod slicer;
pub mod uploader;

/// Minimum part size accepted by the service (5MB)
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Default part size (8MB, same default as the aws cli)
pub const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

/// Default number of concurrently in-flight part uploads
pub const DEFAULT_CONCURRENT_UPLOADS: usize = 8;

/// Maximum parts allowed per upload
pub const MAX_PARTS: u32 = 10_000;

/// One slice of the upload body, waiting to be sent.
///
/// Exactly `part_size` bytes, except the final part of a stream which may
/// be shorter (never empty).
#[derive(Debug, Clone)]
pub struct PendingPart {
    /// 1-based, assigned in stream order
    pub part_number: u32,
    pub payload: Bytes,
}

/// Acknowledgment for one uploaded part.
///
/// The complete call requires these sorted ascending by `part_number`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Lifecycle of one multipart upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Create call returned an upload id and key
    Created,
    /// The slicer is pumping and parts are being dispatched
    Uploading,
    /// Stream exhausted, waiting for in-flight and queued parts to drain
    Draining,
    /// All parts acknowledged, complete call in progress
    Completing,
    /// Terminal success
    Completed,
    /// Terminal failure or abort
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_part_wire_shape() {
        let part = CompletedPart {
            part_number: 3,
            etag: "\"abc\"".into(),
        };

        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["partNumber"], 3);
        assert_eq!(json["etag"], "\"abc\"");
    }

    #[test]
    fn test_terminal_states() {
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Cancelled.is_terminal());
        assert!(!SessionState::Draining.is_terminal());
    }
}
