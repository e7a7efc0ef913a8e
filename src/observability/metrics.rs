//! Metrics collection and exposition.
//!
//! # Metrics
//! - `hdproxy_requests_total` (counter): completed exchanges by port, status
//! - `hdproxy_upstream_errors_total` (counter): transport failures by port
//! - `hdproxy_request_duration_seconds` (histogram): arrival to response head
//! - `hdproxy_active_tunnels` (gauge): open WebSocket tunnels
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder with an HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record a completed exchange.
pub fn record_request(port: u16, status: u16, started: Instant) {
    let port = port.to_string();
    counter!("hdproxy_requests_total", "port" => port.clone(), "status" => status.to_string()).increment(1);
    histogram!("hdproxy_request_duration_seconds", "port" => port).record(started.elapsed().as_secs_f64());
}

/// Record an exchange the upstream never answered.
pub fn record_upstream_error(port: u16) {
    counter!("hdproxy_upstream_errors_total", "port" => port.to_string()).increment(1);
}
