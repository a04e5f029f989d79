//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use metrics::{
    counter, describe_counter, describe_histogram, histogram, Unit,
};
use std::time::Instant;

/// Metrics prefix for all Chalkline metrics
pub const METRICS_PREFIX: &str = "chalkline";

/// SLO-aligned histogram buckets for request latency (in seconds)
/// Targets: P50 < 50ms, P99 < 150ms
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001,  // 1ms
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms - P50 target
    0.075,  // 75ms
    0.100,  // 100ms
    0.150,  // 150ms - P99 target
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
];

/// Buckets for collaborator calls (vision and extraction run much slower)
pub const COLLABORATOR_BUCKETS: &[f64] = &[
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 60s
    120.0,  // 2m
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Pipeline metrics
    describe_counter!(
        format!("{}_pages_processed_total", METRICS_PREFIX),
        Unit::Count,
        "Total pages run through OCR, labelled by outcome"
    );

    describe_counter!(
        format!("{}_blocks_created_total", METRICS_PREFIX),
        Unit::Count,
        "Total blocks persisted, labelled by origin"
    );

    describe_counter!(
        format!("{}_approvals_total", METRICS_PREFIX),
        Unit::Count,
        "Total review verdicts, labelled by verdict"
    );

    describe_counter!(
        format!("{}_recalculations_total", METRICS_PREFIX),
        Unit::Count,
        "Batch status recalculations, labelled by outcome"
    );

    // Extraction metrics
    describe_counter!(
        format!("{}_extraction_jobs_total", METRICS_PREFIX),
        Unit::Count,
        "Total extraction jobs processed, labelled by target and outcome"
    );

    describe_counter!(
        format!("{}_knowledge_points_total", METRICS_PREFIX),
        Unit::Count,
        "Total knowledge points persisted"
    );

    // Collaborator metrics
    describe_histogram!(
        format!("{}_vision_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Vision parse latency in seconds"
    );

    describe_histogram!(
        format!("{}_extraction_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Knowledge extraction latency in seconds"
    );

    // Queue metrics
    describe_counter!(
        format!("{}_queue_messages_processed_total", METRICS_PREFIX),
        Unit::Count,
        "Total queue messages processed"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record one page OCR outcome ("completed" or "failed")
pub fn record_page_ocr(outcome: &str, duration_secs: f64) {
    counter!(
        format!("{}_pages_processed_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_vision_duration_seconds", METRICS_PREFIX)
    )
    .record(duration_secs);
}

/// Record blocks persisted from one source ("parsed" or "manual")
pub fn record_blocks_created(count: usize, origin: &str) {
    counter!(
        format!("{}_blocks_created_total", METRICS_PREFIX),
        "origin" => origin.to_string()
    )
    .increment(count as u64);
}

/// Record one review verdict ("approved", "rejected", "deleted")
pub fn record_approval(verdict: &str) {
    counter!(
        format!("{}_approvals_total", METRICS_PREFIX),
        "verdict" => verdict.to_string()
    )
    .increment(1);
}

/// Record one recalculation pass ("advanced", "unchanged", "discarded")
pub fn record_recalculation(outcome: &str) {
    counter!(
        format!("{}_recalculations_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record one extraction job, its outcome, and how long it ran
pub fn record_extraction_job(target: &str, outcome: &str, duration_secs: f64) {
    counter!(
        format!("{}_extraction_jobs_total", METRICS_PREFIX),
        "target" => target.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_extraction_duration_seconds", METRICS_PREFIX)
    )
    .record(duration_secs);
}

/// Record knowledge points persisted for one job
pub fn record_knowledge_points(count: usize) {
    counter!(
        format!("{}_knowledge_points_total", METRICS_PREFIX)
    )
    .increment(count as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets() {
        // Verify buckets are sorted and contain SLO targets
        let mut prev = 0.0;
        for &bucket in LATENCY_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }

        // P50 target (50ms) should be in buckets
        assert!(LATENCY_BUCKETS.contains(&0.050));
        // P99 target (150ms) should be in buckets
        assert!(LATENCY_BUCKETS.contains(&0.150));
    }

    #[test]
    fn test_collaborator_buckets_sorted() {
        let mut prev = 0.0;
        for &bucket in COLLABORATOR_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
    }

    #[test]
    fn test_request_metrics() {
        let metrics = RequestMetrics::start("GET", "/v1/batches");
        std::thread::sleep(std::time::Duration::from_millis(10));
        metrics.finish(200);
        // Just verify it runs without panic
    }
}
