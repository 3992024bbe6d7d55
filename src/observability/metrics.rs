//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define server metrics (requests, latency, connections, sessions)
//! - Optionally expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `switchyard_http_requests_total` (counter): requests by method, status
//! - `switchyard_http_request_duration_seconds` (histogram): handler latency
//! - `switchyard_active_connections` (gauge): current connection count
//! - `switchyard_ws_sessions` (gauge): live WebSocket sessions
//! - `switchyard_ws_messages_total` (counter): inbound WebSocket messages
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - The exporter is opt-in through configuration

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP scrape listener.
///
/// Outside a Tokio runtime the exporter runs on its own background thread.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one answered HTTP request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    ::metrics::counter!(
        "switchyard_http_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!("switchyard_http_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// Publish the number of connections currently served.
pub fn set_active_connections(count: u64) {
    ::metrics::gauge!("switchyard_active_connections").set(count as f64);
}

/// Publish the number of live WebSocket sessions.
pub fn set_ws_sessions(count: usize) {
    ::metrics::gauge!("switchyard_ws_sessions").set(count as f64);
}

/// Count one inbound WebSocket message.
pub fn record_ws_message() {
    ::metrics::counter!("switchyard_ws_messages_total").increment(1);
}
