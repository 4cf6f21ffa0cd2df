//! Metrics export for the chat client.
//!
//! The socket records its own metrics through the `metrics` facade; this
//! module installs the Prometheus exporter and counts chat traffic.

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const MESSAGES_SENT: &str = "tether_chat_messages_sent_total";
    pub const MESSAGES_RECEIVED: &str = "tether_chat_messages_received_total";
    pub const ROSTER_RENDERS: &str = "tether_chat_roster_renders_total";
}

/// Describe chat and socket metrics.
pub fn init_metrics() {
    tether_client::metrics::describe_metrics();
    metrics::describe_counter!(names::MESSAGES_SENT, "Chat messages sent, by outcome");
    metrics::describe_counter!(names::MESSAGES_RECEIVED, "Chat messages received");
    metrics::describe_counter!(names::ROSTER_RENDERS, "Roster renders after a presence sync");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new().with_http_listener(addr).install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a sent message.
pub fn record_sent(outcome: &'static str) {
    counter!(names::MESSAGES_SENT, "outcome" => outcome).increment(1);
}

/// Record a received message.
pub fn record_received() {
    counter!(names::MESSAGES_RECEIVED).increment(1);
}

/// Record a roster render.
pub fn record_roster() {
    counter!(names::ROSTER_RENDERS).increment(1);
}
