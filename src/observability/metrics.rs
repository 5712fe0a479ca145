//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): plain requests by outcome
//! - `proxy_request_duration_seconds` (histogram): time to response head
//! - `proxy_tunnels_total` (counter): CONNECT requests by outcome
//! - `proxy_cache_writes_total` (counter): cache writes by outcome
//! - `proxy_cache_entries` (gauge): URLs currently in the cache index
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a dispatched plain request.
pub fn record_request(method: &str, outcome: &'static str, status: u16, start: Instant) {
    metrics::counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "outcome" => outcome,
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("proxy_request_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

/// Record a CONNECT request outcome.
pub fn record_tunnel(outcome: &'static str) {
    metrics::counter!("proxy_tunnels_total", "outcome" => outcome).increment(1);
}

/// Record a finished cache write.
pub fn record_cache_write(outcome: &'static str) {
    metrics::counter!("proxy_cache_writes_total", "outcome" => outcome).increment(1);
}

pub fn record_cache_entries(count: usize) {
    metrics::gauge!("proxy_cache_entries").set(count as f64);
}
