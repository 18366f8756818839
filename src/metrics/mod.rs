//! Metrics module
//!
//! Provides Prometheus metrics for chunked uploads.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec,
    register_int_gauge, Counter, CounterVec, Encoder, Histogram, HistogramVec, IntGauge,
    TextEncoder,
};

lazy_static! {
    // Upload metrics
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "chunk_uploadr_uploads_total",
        "Total number of chunked uploads",
        &["mode", "status"]
    ).unwrap();

    pub static ref UPLOAD_CHUNKS: Histogram = register_histogram!(
        "chunk_uploadr_upload_chunks",
        "Number of ordered chunk tokens returned per upload",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 50000.0]
    ).unwrap();

    // Chunk metrics
    pub static ref CHUNKS_TOTAL: CounterVec = register_counter_vec!(
        "chunk_uploadr_chunks_total",
        "Total chunk uploads",
        &["sink", "status"]
    ).unwrap();

    pub static ref CHUNK_BYTES_TOTAL: Counter = register_counter!(
        "chunk_uploadr_chunk_bytes_total",
        "Total bytes uploaded in chunks"
    ).unwrap();

    pub static ref CHUNK_DURATION: HistogramVec = register_histogram_vec!(
        "chunk_uploadr_chunk_duration_seconds",
        "Chunk upload duration in seconds",
        &["sink"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0]
    ).unwrap();

    pub static ref CHUNKS_IN_FLIGHT: IntGauge = register_int_gauge!(
        "chunk_uploadr_chunks_in_flight",
        "Chunk uploads currently running"
    ).unwrap();

    // Page blob metrics
    pub static ref SPARSE_BYTES_SKIPPED: Counter = register_counter!(
        "chunk_uploadr_sparse_bytes_skipped_total",
        "Bytes of all-zero pages that were not uploaded"
    ).unwrap();
}

/// Holds one slot of an in-flight gauge until dropped, unwinding included.
pub struct InFlightGuard {
    gauge: IntGauge,
}

impl InFlightGuard {
    pub fn enter(gauge: &IntGauge) -> Self {
        gauge.inc();
        Self {
            gauge: gauge.clone(),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

/// Record a completed chunk upload
pub fn record_chunk_success(sink: &str, bytes: u64, duration_secs: f64) {
    CHUNKS_TOTAL.with_label_values(&[sink, "success"]).inc();
    CHUNK_BYTES_TOTAL.inc_by(bytes as f64);
    CHUNK_DURATION
        .with_label_values(&[sink])
        .observe(duration_secs);
}

/// Record a failed chunk upload
pub fn record_chunk_failure(sink: &str) {
    CHUNKS_TOTAL.with_label_values(&[sink, "failure"]).inc();
}

/// Record all-zero pages skipped by the page sink
pub fn record_sparse_skip(bytes: u64) {
    SPARSE_BYTES_SKIPPED.inc_by(bytes as f64);
}

/// Record a finished upload
///
/// # Arguments
/// * `mode` - `"chunks"` or `"substream"`
/// * `chunks` - Number of ordered tokens returned
/// * `success` - Whether every chunk succeeded
pub fn record_upload(mode: &str, chunks: usize, success: bool) {
    let status = if success { "success" } else { "failure" };
    UPLOADS_TOTAL.with_label_values(&[mode, status]).inc();
    if success {
        UPLOAD_CHUNKS.observe(chunks as f64);
    }
}

/// Render all registered metrics in the Prometheus text format
pub fn render() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_chunk_success() {
        record_chunk_success("block_staging", 1024, 0.01);
        // Just verify it doesn't panic
    }

    #[test]
    fn test_record_chunk_failure() {
        record_chunk_failure("page_range");
        // Just verify it doesn't panic
    }

    #[test]
    fn test_record_upload() {
        record_upload("chunks", 3, true);
        record_upload("substream", 0, false);
        // Just verify it doesn't panic
    }

    #[test]
    fn test_in_flight_guard_releases_on_panic() {
        let gauge = IntGauge::new("test_in_flight", "Test gauge").unwrap();

        let guard = InFlightGuard::enter(&gauge);
        assert_eq!(gauge.get(), 1);
        drop(guard);
        assert_eq!(gauge.get(), 0);

        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = InFlightGuard::enter(&gauge);
            panic!("backend blew up");
        }));
        assert!(unwound.is_err());
        assert_eq!(gauge.get(), 0);
    }

    #[test]
    fn test_render_contains_registered_metrics() {
        record_sparse_skip(512);
        let text = render();
        assert!(text.contains("chunk_uploadr_sparse_bytes_skipped_total"));
    }
}
