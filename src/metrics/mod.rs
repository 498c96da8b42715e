//! Metrics module
//!
//! Prometheus metrics for the multipart engine. The host application owns
//! exposition; [`export`] returns the text encoding of the default
//! registry for embedding into an existing metrics endpoint.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Histogram,
    TextEncoder,
};

lazy_static! {
    // Upload metrics
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "blobpart_uploads_total",
        "Total number of multipart uploads",
        &["status"]
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "blobpart_upload_bytes_total",
        "Total bytes uploaded"
    ).unwrap();

    pub static ref UPLOAD_DURATION: Histogram = register_histogram!(
        "blobpart_upload_duration_seconds",
        "End-to-end multipart upload duration in seconds",
        vec![0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]
    ).unwrap();

    pub static ref MULTIPART_PARTS: Histogram = register_histogram!(
        "blobpart_multipart_parts",
        "Number of parts per multipart upload",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "blobpart_errors_total",
        "Total errors",
        &["type"]
    ).unwrap();
}

/// Record a successful multipart upload
pub fn record_upload_success(bytes: u64, parts: usize) {
    UPLOADS_TOTAL.with_label_values(&["success"]).inc();
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
    MULTIPART_PARTS.observe(parts as f64);
}

/// Record a failed multipart upload
pub fn record_upload_failure(error_kind: &str) {
    UPLOADS_TOTAL.with_label_values(&["failure"]).inc();
    ERRORS_TOTAL.with_label_values(&[error_kind]).inc();
}

/// Record end-to-end upload duration
pub fn record_upload_duration(duration_secs: f64) {
    UPLOAD_DURATION.observe(duration_secs);
}

/// Text encoding of the default registry
pub fn export() -> String {
    let encoder = TextEncoder::new();
    encoder
        .encode_to_string(&prometheus::gather())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_export() {
        record_upload_success(1024, 3);
        record_upload_failure("service_unavailable");
        record_upload_duration(0.25);

        let exported = export();
        assert!(exported.contains("blobpart_uploads_total"));
        assert!(exported.contains("blobpart_upload_bytes_total"));
        assert!(exported.contains("blobpart_errors_total"));
    }
}
