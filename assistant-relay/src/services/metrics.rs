//! Prometheus metrics for assistant-relay.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter_vec, Histogram,
    HistogramVec, IntCounterVec, TextEncoder,
};

/// HTTP request counter by method, path and status.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .expect("Failed to register http_requests_total")
});

/// HTTP request duration by method, path and status.
pub static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path", "status"]
    )
    .expect("Failed to register http_request_duration_seconds")
});

/// Relay cycles by how they ended (answer, no_reply, run_failed, timed_out, transport_error).
pub static RELAY_CYCLES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "relay_cycles_total",
        "Total number of question/answer cycles by outcome",
        &["outcome"]
    )
    .expect("Failed to register relay_cycles_total")
});

/// Status reads needed before a run reached a terminal state.
pub static RELAY_RUN_POLLS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "relay_run_polls",
        "Number of run status reads per question",
        vec![1.0, 2.0, 3.0, 5.0, 8.0, 13.0, 21.0, 34.0, 55.0]
    )
    .expect("Failed to register relay_run_polls")
});

/// Wall time of a full relay cycle.
pub static RELAY_CYCLE_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "relay_cycle_duration_seconds",
        "Duration of a question/answer cycle in seconds",
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0, 180.0]
    )
    .expect("Failed to register relay_cycle_duration_seconds")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&HTTP_REQUESTS_TOTAL);
    Lazy::force(&HTTP_REQUEST_DURATION_SECONDS);
    Lazy::force(&RELAY_CYCLES_TOTAL);
    Lazy::force(&RELAY_RUN_POLLS);
    Lazy::force(&RELAY_CYCLE_DURATION_SECONDS);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
