//! Metrics collection and exposition.
//!
//! # Metrics
//! - `governor_rate_limited_total` (counter): denials by traffic class
//! - `governor_blocks_total` (counter): blocks triggered by traffic class
//! - `governor_tracked_identifiers` (gauge): identifiers held per limiter
//! - `governor_breaker_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `governor_breaker_rejections_total` (counter): fast-fail rejections
//! - `governor_retries_total` (counter): backoff sleeps by operation
//! - `governor_retry_exhausted_total` (counter): operations that ran out of attempts

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_rate_limited(class: &str) {
    ::metrics::counter!("governor_rate_limited_total", "class" => class.to_string()).increment(1);
}

pub fn record_block(class: &str) {
    ::metrics::counter!("governor_blocks_total", "class" => class.to_string()).increment(1);
}

pub fn record_tracked(class: &str, tracked: usize) {
    ::metrics::gauge!("governor_tracked_identifiers", "class" => class.to_string()).set(tracked as f64);
}

pub fn record_breaker_state(breaker: &str, value: f64) {
    ::metrics::gauge!("governor_breaker_state", "breaker" => breaker.to_string()).set(value);
}

pub fn record_breaker_rejection(breaker: &str) {
    ::metrics::counter!("governor_breaker_rejections_total", "breaker" => breaker.to_string())
        .increment(1);
}

pub fn record_retry(operation: &str) {
    ::metrics::counter!("governor_retries_total", "operation" => operation.to_string()).increment(1);
}

pub fn record_retry_exhausted(operation: &str) {
    ::metrics::counter!("governor_retry_exhausted_total", "operation" => operation.to_string())
        .increment(1);
}
