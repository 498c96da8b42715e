//! Upload progress reporting
//!
//! Progress is reported per acknowledged part. When the total body length
//! is unknown (streamed input) `total` mirrors `loaded`, which keeps the
//! numbers practical for display. 100% is withheld until the service has
//! finalized the upload, even when every byte is already acknowledged.

use std::sync::Arc;

/// One progress event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UploadProgress {
    /// Bytes acknowledged by the service
    pub loaded: u64,
    /// Full body length when knowable, otherwise `loaded`
    pub total: u64,
    /// 0..=100, rounded to two decimals; reaches 100 only on completion
    pub percentage: f64,
}

/// Caller-supplied progress hook.
pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// Internal emitter owned by the coordinator.
pub(crate) struct ProgressReporter {
    callback: Option<ProgressCallback>,
    total_hint: Option<u64>,
}

impl ProgressReporter {
    pub(crate) fn new(callback: Option<ProgressCallback>, total_hint: Option<u64>) -> Self {
        Self {
            callback,
            total_hint,
        }
    }

    /// Report interim progress; percentage is clamped below 100.
    pub(crate) fn report(&self, loaded: u64) {
        self.emit(loaded, false);
    }

    /// Report final progress after the complete call resolved.
    pub(crate) fn complete(&self, loaded: u64) {
        self.emit(loaded, true);
    }

    fn emit(&self, loaded: u64, done: bool) {
        let Some(callback) = &self.callback else {
            return;
        };

        let total = self.total_hint.unwrap_or(loaded).max(loaded);
        let mut percentage = if total == 0 {
            0.0
        } else {
            ((loaded as f64 / total as f64) * 100.0 * 100.0).round() / 100.0
        };

        // hold 100% back until server-side finalization
        if done {
            percentage = 100.0;
        } else if percentage >= 100.0 {
            percentage = 99.0;
        }

        callback(UploadProgress {
            loaded,
            total,
            percentage,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<UploadProgress>>>) {
        let events: Arc<Mutex<Vec<UploadProgress>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let callback: ProgressCallback = Arc::new(move |p| sink.lock().push(p));
        (callback, events)
    }

    #[test]
    fn test_percentage_with_known_total() {
        let (cb, events) = recorder();
        let reporter = ProgressReporter::new(Some(cb), Some(200));

        reporter.report(50);
        reporter.report(150);

        let events = events.lock();
        assert_eq!(events[0].percentage, 25.0);
        assert_eq!(events[0].total, 200);
        assert_eq!(events[1].percentage, 75.0);
    }

    #[test]
    fn test_hundred_percent_withheld_until_done() {
        let (cb, events) = recorder();
        let reporter = ProgressReporter::new(Some(cb), Some(100));

        reporter.report(100);
        reporter.complete(100);

        let events = events.lock();
        assert_eq!(events[0].percentage, 99.0);
        assert_eq!(events[1].percentage, 100.0);
    }

    #[test]
    fn test_unknown_total_mirrors_loaded() {
        let (cb, events) = recorder();
        let reporter = ProgressReporter::new(Some(cb), None);

        reporter.report(1234);

        let events = events.lock();
        assert_eq!(events[0].total, 1234);
        assert_eq!(events[0].percentage, 99.0);
    }

    #[test]
    fn test_no_callback_is_silent() {
        let reporter = ProgressReporter::new(None, Some(10));
        reporter.report(5);
        reporter.complete(10);
    }
}
