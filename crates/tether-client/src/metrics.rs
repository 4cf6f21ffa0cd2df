//! Client instrumentation.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! application installs a recorder.

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "tether_client_connections_total";
    pub const RECONNECTS_TOTAL: &str = "tether_client_reconnects_total";
    pub const DISCONNECTS_TOTAL: &str = "tether_client_disconnects_total";
    pub const FRAMES_TOTAL: &str = "tether_client_frames_total";
    pub const PUSHES_TOTAL: &str = "tether_client_pushes_total";
    pub const CHANNELS_JOINED: &str = "tether_client_channels_joined";
    pub const PRESENCE_SYNCS_TOTAL: &str = "tether_client_presence_syncs_total";
}

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(names::CONNECTIONS_TOTAL, "Successful socket handshakes");
    metrics::describe_counter!(names::RECONNECTS_TOTAL, "Reconnect attempts");
    metrics::describe_counter!(names::DISCONNECTS_TOTAL, "Lost or closed transports");
    metrics::describe_counter!(names::FRAMES_TOTAL, "Frames sent and received");
    metrics::describe_counter!(names::PUSHES_TOTAL, "Pushes by outcome");
    metrics::describe_gauge!(names::CHANNELS_JOINED, "Currently joined channels");
    metrics::describe_counter!(names::PRESENCE_SYNCS_TOTAL, "Presence states and diffs applied");
}

pub(crate) fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
}

pub(crate) fn record_reconnect_attempt() {
    counter!(names::RECONNECTS_TOTAL).increment(1);
}

pub(crate) fn record_disconnect(reason: &'static str) {
    counter!(names::DISCONNECTS_TOTAL, "reason" => reason).increment(1);
}

pub(crate) fn record_frame(direction: &'static str) {
    counter!(names::FRAMES_TOTAL, "direction" => direction).increment(1);
}

pub(crate) fn record_push(outcome: &'static str) {
    counter!(names::PUSHES_TOTAL, "outcome" => outcome).increment(1);
}

pub(crate) fn set_joined_channels(count: usize) {
    gauge!(names::CHANNELS_JOINED).set(count as f64);
}

pub(crate) fn record_presence(kind: &'static str) {
    counter!(names::PRESENCE_SYNCS_TOTAL, "kind" => kind).increment(1);
}
