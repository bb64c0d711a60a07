//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Returns the handle the `/metrics` route renders from. Fails if a global
/// recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render the Prometheus text exposition.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Connections accepted (counter, labels: kind).
pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
/// Open connections (gauge, labels: kind).
pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
/// Inbound frames (counter, labels: kind).
pub const FRAMES_TOTAL: &str = "relay_frames_total";
/// Frames that could not be delivered (counter, labels: kind, reason).
pub const FORWARD_FAILURES_TOTAL: &str = "relay_forward_failures_total";
/// Tool messages with no pending request to route to (counter).
pub const UNROUTABLE_TOTAL: &str = "relay_unroutable_total";
/// Connections closed for missing heartbeats (counter).
pub const HEARTBEAT_TIMEOUTS_TOTAL: &str = "relay_heartbeat_timeouts_total";
/// Rejected connection attempts (counter, labels: kind).
pub const AUTH_FAILURES_TOTAL: &str = "relay_auth_failures_total";
/// Locally answered control requests (counter, labels: method).
pub const LOCAL_REQUESTS_TOTAL: &str = "relay_local_requests_total";
/// Local request latency (histogram, labels: method).
pub const LOCAL_REQUEST_DURATION_SECONDS: &str = "relay_local_request_duration_seconds";
