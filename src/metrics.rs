//! Prometheus metrics for Portico.
//!
//! This module owns the process-wide [`prometheus::Registry`] and the metric
//! families the gateway emits. Helper functions keep label handling in one
//! place so call sites in the hot path stay terse.
//!
//! Provided metrics:
//! * `http_requests_total{method,path,status}` (counter)
//! * `http_request_duration_seconds{method,path,status}` (histogram)
//! * `rate_limit_hits_total{key,algorithm}` (counter)
//! * `auth_failures_total{reason,auth_type}` (counter)
//! * `upstream_requests_total{upstream,status}` (counter)
//! * `upstream_request_duration_seconds{upstream,status}` (histogram)
use std::time::Duration;

use once_cell::sync::Lazy;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const RATE_LIMIT_HITS_TOTAL: &str = "rate_limit_hits_total";
pub const AUTH_FAILURES_TOTAL: &str = "auth_failures_total";
pub const UPSTREAM_REQUESTS_TOTAL: &str = "upstream_requests_total";
pub const UPSTREAM_REQUEST_DURATION_SECONDS: &str = "upstream_request_duration_seconds";

/// Process-wide metric registry scraped by the metrics endpoint.
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static HTTP_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests"),
        &["method", "path", "status"],
    )
    .expect("valid metric definition");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric registered once");
    counter
});

static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            HTTP_REQUEST_DURATION_SECONDS,
            "HTTP request latency in seconds",
        ),
        &["method", "path", "status"],
    )
    .expect("valid metric definition");
    REGISTRY
        .register(Box::new(histogram.clone()))
        .expect("metric registered once");
    histogram
});

static RATE_LIMIT_HITS: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(RATE_LIMIT_HITS_TOTAL, "Total number of rate limit hits"),
        &["key", "algorithm"],
    )
    .expect("valid metric definition");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric registered once");
    counter
});

static AUTH_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            AUTH_FAILURES_TOTAL,
            "Total number of authentication failures",
        ),
        &["reason", "auth_type"],
    )
    .expect("valid metric definition");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric registered once");
    counter
});

static UPSTREAM_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            UPSTREAM_REQUESTS_TOTAL,
            "Total number of upstream service requests",
        ),
        &["upstream", "status"],
    )
    .expect("valid metric definition");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric registered once");
    counter
});

static UPSTREAM_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            UPSTREAM_REQUEST_DURATION_SECONDS,
            "Upstream request latency in seconds",
        ),
        &["upstream", "status"],
    )
    .expect("valid metric definition");
    REGISTRY
        .register(Box::new(histogram.clone()))
        .expect("metric registered once");
    histogram
});

/// Register all metric families (idempotent).
pub fn init_metrics() {
    Lazy::force(&HTTP_REQUESTS);
    Lazy::force(&HTTP_REQUEST_DURATION);
    Lazy::force(&RATE_LIMIT_HITS);
    Lazy::force(&AUTH_FAILURES);
    Lazy::force(&UPSTREAM_REQUESTS);
    Lazy::force(&UPSTREAM_REQUEST_DURATION);

    tracing::info!("Metrics registry initialized");
}

/// Record a completed inbound request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let status = status.to_string();
    HTTP_REQUESTS
        .with_label_values(&[method, path, &status])
        .inc();
    HTTP_REQUEST_DURATION
        .with_label_values(&[method, path, &status])
        .observe(duration.as_secs_f64());
}

/// Count a denied admission for a rate-limit key.
pub fn increment_rate_limit_hit(key: &str, algorithm: &str) {
    RATE_LIMIT_HITS.with_label_values(&[key, algorithm]).inc();
}

/// Count an authentication failure by reason and verifier type.
pub fn increment_auth_failure(reason: &str, auth_type: &str) {
    AUTH_FAILURES
        .with_label_values(&[reason, auth_type])
        .inc();
}

/// Count an upstream dispatch outcome; `status` is the numeric code or "error".
pub fn increment_upstream_request(upstream: &str, status: &str) {
    UPSTREAM_REQUESTS
        .with_label_values(&[upstream, status])
        .inc();
}

/// Record a completed upstream request's duration.
pub fn record_upstream_duration(upstream: &str, status: &str, duration: Duration) {
    UPSTREAM_REQUEST_DURATION
        .with_label_values(&[upstream, status])
        .observe(duration.as_secs_f64());
}

/// Render the registry in Prometheus text exposition format.
pub fn render() -> eyre::Result<String> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    encoder
        .encode_to_string(&families)
        .map_err(|e| eyre::eyre!("Failed to encode metrics: {e}"))
}
