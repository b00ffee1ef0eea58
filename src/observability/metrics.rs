//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (tunnels, requests, latency, rejections)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `proxy_tunnels_total` (counter): CONNECT attempts by outcome
//! - `proxy_active_tunnels` (gauge): currently open tunnels
//! - `proxy_requests_total` (counter): inner requests by status
//! - `proxy_request_duration_seconds` (histogram): inner request latency
//! - `proxy_rate_limited_total` (counter): requests rejected with 429
//! - `proxy_leaf_certificates_issued_total` (counter): minted leaf certificates
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Labels limited to outcome and status code; tenant ids stay out of labels

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and serve it on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record the outcome of a CONNECT attempt (`established`, `rejected`, `failed`).
pub fn record_tunnel(outcome: &'static str) {
    counter!("proxy_tunnels_total", "outcome" => outcome).increment(1);
}

pub fn tunnel_opened() {
    gauge!("proxy_active_tunnels").increment(1.0);
}

pub fn tunnel_closed() {
    gauge!("proxy_active_tunnels").decrement(1.0);
}

/// Record one inner request and its latency.
pub fn record_request(status: u16, start: Instant) {
    counter!("proxy_requests_total", "status" => status.to_string()).increment(1);
    histogram!("proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited() {
    counter!("proxy_rate_limited_total").increment(1);
}

pub fn record_leaf_issued() {
    counter!("proxy_leaf_certificates_issued_total").increment(1);
}
