//! Settings types with their compiled defaults.

use std::fmt;
use std::time::Duration;

use relay_telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub session: SessionSettings,
    pub logging: TelemetryConfig,
    pub metrics: MetricsSettings,
}

impl RelaySettings {
    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.auth.server_key.is_empty() {
            return Err(SettingsError::InvalidValue(
                "auth.serverKey must be set (or RELAY_SERVER_KEY)".into(),
            ));
        }
        if self.auth.agent_id.is_empty() {
            return Err(SettingsError::InvalidValue("auth.agentId must not be empty".into()));
        }
        if self.session.request_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "session.requestTimeoutMs must be positive".into(),
            ));
        }
        if self.session.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "session.sendQueueCapacity must be positive".into(),
            ));
        }
        if self.session.heartbeat_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "session.heartbeatIntervalSecs must be positive".into(),
            ));
        }
        if self.session.heartbeat_timeout_secs < self.session.heartbeat_interval_secs {
            return Err(SettingsError::InvalidValue(
                "session.heartbeatTimeoutSecs must be at least heartbeatIntervalSecs".into(),
            ));
        }
        Ok(())
    }
}

/// Listener and HTTP settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port. `0` picks an ephemeral port.
    pub port: u16,
    pub enable_cors: bool,
    /// Allowed CORS origins. `*` allows any origin.
    pub allowed_origins: Vec<String>,
    /// Largest accepted WebSocket message in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7100,
            enable_cors: true,
            allowed_origins: vec!["*".to_string()],
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

/// Shared-secret authentication.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Secret every connection must present as its `token` parameter.
    pub server_key: String,
    /// Agent identity an authenticated connection resolves to.
    pub agent_id: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            server_key: String::new(),
            agent_id: "default_agent".to_string(),
        }
    }
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("server_key", &"[REDACTED]")
            .field("agent_id", &self.agent_id)
            .finish()
    }
}

/// Per-connection timing and buffering.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Bound on local protocol method execution.
    pub request_timeout_ms: u64,
    /// Idle read timeout on the protocol endpoint. `0` disables it.
    pub read_timeout_ms: u64,
    /// WebSocket ping interval.
    pub heartbeat_interval_secs: u64,
    /// Silence after which a peer is considered dead and disconnected.
    /// Any inbound frame, pongs included, counts as a sign of life.
    pub heartbeat_timeout_secs: u64,
    /// Outbound frames buffered per connection before writers wait.
    pub send_queue_capacity: usize,
}

impl SessionSettings {
    /// Bound on a single local method call.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Idle read timeout for protocol connections, if enabled.
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }

    /// How often the server pings each peer.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// How long a peer may stay silent before it is disconnected.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            read_timeout_ms: 10_000,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            send_queue_capacity: 256,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricsSettings {
    /// Install the Prometheus recorder and serve the metrics route.
    pub enabled: bool,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}
