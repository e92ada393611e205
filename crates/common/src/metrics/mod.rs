//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all LexForge metrics
pub const METRICS_PREFIX: &str = "lexforge";

/// SLO-aligned histogram buckets for request latency (in seconds)
/// Targets: P50 < 250ms, P99 < 2s (embedding dominates)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms - P50 target
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s - P99 target
    5.000,  // 5s
    10.00,  // 10s
];

/// Buckets for embedding latency (typically slower)
pub const EMBEDDING_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
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

    // Resolution metrics
    describe_counter!(
        format!("{}_resolutions_total", METRICS_PREFIX),
        Unit::Count,
        "Resolved queries by outcome"
    );

    describe_histogram!(
        format!("{}_resolution_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end query resolution latency in seconds"
    );

    describe_gauge!(
        format!("{}_resolution_sources_count", METRICS_PREFIX),
        Unit::Count,
        "Number of sources in the last resolution"
    );

    describe_counter!(
        format!("{}_blocked_total", METRICS_PREFIX),
        Unit::Count,
        "Queries blocked by excluded area"
    );

    describe_counter!(
        format!("{}_candidates_excluded_total", METRICS_PREFIX),
        Unit::Count,
        "Candidates removed because they belong to an excluded area"
    );

    describe_counter!(
        format!("{}_chunks_rejected_total", METRICS_PREFIX),
        Unit::Count,
        "Chunks rejected by provenance validation"
    );

    describe_counter!(
        format!("{}_warnings_total", METRICS_PREFIX),
        Unit::Count,
        "Provenance warnings emitted"
    );

    // Embedding metrics
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    describe_counter!(
        format!("{}_embedding_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding errors"
    );

    // Store metrics
    describe_histogram!(
        format!("{}_store_search_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Corpus store search latency in seconds"
    );

    // Rule metrics
    describe_counter!(
        format!("{}_rule_reloads_total", METRICS_PREFIX),
        Unit::Count,
        "Exclusion rule reload attempts"
    );

    describe_gauge!(
        format!("{}_rule_set_version", METRICS_PREFIX),
        Unit::Count,
        "Version of the active exclusion rule set"
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

/// Record one finished resolution; `outcome` is resolved, blocked or an error code
pub fn record_resolution(duration_secs: f64, outcome: &str, source_count: usize) {
    counter!(
        format!("{}_resolutions_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_resolution_duration_seconds", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .record(duration_secs);

    gauge!(format!("{}_resolution_sources_count", METRICS_PREFIX)).set(source_count as f64);
}

pub fn record_blocked(area_id: &str) {
    counter!(
        format!("{}_blocked_total", METRICS_PREFIX),
        "area" => area_id.to_string()
    )
    .increment(1);
}

pub fn record_store_search(duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };
    histogram!(
        format!("{}_store_search_duration_seconds", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .record(duration_secs);
}

pub fn record_candidates_excluded(area_id: &str, count: usize) {
    if count == 0 {
        return;
    }
    counter!(
        format!("{}_candidates_excluded_total", METRICS_PREFIX),
        "area" => area_id.to_string()
    )
    .increment(count as u64);
}

pub fn record_rejections(reason: &str, count: usize) {
    if count == 0 {
        return;
    }
    counter!(
        format!("{}_chunks_rejected_total", METRICS_PREFIX),
        "reason" => reason.to_string()
    )
    .increment(count as u64);
}

/// Count a warning by its kind (the part before the first `:`)
pub fn record_warning(warning: &str) {
    let kind = warning.split(':').next().unwrap_or(warning);
    counter!(
        format!("{}_warnings_total", METRICS_PREFIX),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    } else {
        counter!(
            format!("{}_embedding_errors_total", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .increment(1);
    }
}

/// Record a rule reload attempt and, on success, the active version
pub fn record_rule_reload(success: bool, version: u64) {
    let status = if success { "success" } else { "error" };
    counter!(
        format!("{}_rule_reloads_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        gauge!(format!("{}_rule_set_version", METRICS_PREFIX)).set(version as f64);
    }
}
