//! `/mcp_endpoint/health` body.

use std::time::Instant;

use relay_core::Response;
use serde::Serialize;
use serde_json::Value;

use crate::registry::RegistryStats;

/// Result member of the health envelope.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Always `"success"` while the server is up.
    pub status: &'static str,
    pub uptime_secs: u64,
    pub connections: RegistryStats,
}

pub fn health_check(start_time: Instant, connections: RegistryStats) -> HealthReport {
    HealthReport {
        status: "success",
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
    }
}

/// Wrap the report in a JSON-RPC success envelope with a null id.
pub fn health_envelope(report: &HealthReport) -> Response {
    let result = serde_json::to_value(report).unwrap_or(Value::Null);
    Response::success(None, result)
}
