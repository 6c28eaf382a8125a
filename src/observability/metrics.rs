//! Metrics collection and exposition.
//!
//! # Metrics
//! - `template_requests_total` (counter): responses by status
//! - `template_render_duration_seconds` (histogram): render latency
//! - `template_reloads_total` (counter): rebuild attempts by outcome
//! - `template_generation` (gauge): generation currently serving
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade; without an installed exporter
//!   every call is a no-op
//! - Prometheus exposition is opt-in via configuration

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, address = %addr, "Failed to install metrics exporter"),
    }
}

pub fn record_request(status: u16, render_time: Option<Duration>) {
    metrics::counter!("template_requests_total", "status" => status.to_string()).increment(1);
    if let Some(elapsed) = render_time {
        metrics::histogram!("template_render_duration_seconds").record(elapsed.as_secs_f64());
    }
}

pub fn record_reload(outcome: &'static str) {
    metrics::counter!("template_reloads_total", "outcome" => outcome).increment(1);
}

pub fn record_generation(generation: u64) {
    metrics::gauge!("template_generation").set(generation as f64);
}
