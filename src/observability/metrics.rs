//! Metrics exposition.
//!
//! # Metrics
//! - `server_connections_accepted_total` (counter)
//! - `server_active_connections` (gauge)
//! - `server_requests_total` (counter): by bind point port
//! - `server_tasks_total` (counter)
//! - `server_reloads_total` (counter)

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with its scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe();
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

fn describe() {
    metrics::describe_counter!(
        "server_connections_accepted_total",
        "Connections accepted on every bind point"
    );
    metrics::describe_gauge!("server_active_connections", "Connections currently open");
    metrics::describe_counter!("server_requests_total", "HTTP requests received");
    metrics::describe_counter!("server_tasks_total", "Tasks dispatched to task workers");
    metrics::describe_counter!("server_reloads_total", "Worker reloads");
}
