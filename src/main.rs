//! # mcp-relay
//!
//! Relay binary: loads settings, starts logging and metrics, and serves the
//! tool, robot and protocol WebSocket endpoints until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use relay_core::AgentId;
use relay_server::{RelayServer, SharedSecretAuthenticator};
use relay_settings::RelaySettings;
use relay_telemetry::LogFormat;
use secrecy::SecretString;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// MCP JSON-RPC relay between tool backends and robot clients.
#[derive(Parser, Debug)]
#[command(name = "mcp-relay", version, about)]
struct Cli {
    /// Settings file (defaults to `relay.json` in the working directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Default log level (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Log format: json, pretty or compact (overrides settings).
    #[arg(long)]
    log_format: Option<LogFormat>,
}

impl Cli {
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(ref host) = self.host {
            settings.server.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level = level.clone();
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut settings =
        relay_settings::load_settings(args.config.as_deref()).context("Failed to load settings")?;
    args.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    relay_telemetry::init_telemetry(&settings.logging).context("Failed to initialize logging")?;

    let metrics = if settings.metrics.enabled {
        Some(relay_server::metrics::install_recorder().context("Failed to install metrics recorder")?)
    } else {
        None
    };

    let authenticator = SharedSecretAuthenticator::new(
        SecretString::from(settings.auth.server_key.clone()),
        AgentId::from_raw(settings.auth.agent_id.clone()),
    );
    let tools = relay_tools::builtin_registry();
    let tool_count = tools.count();

    let mut server = RelayServer::new(settings, Arc::new(tools), Arc::new(authenticator));
    if let Some(handle) = metrics {
        server = server.with_metrics(handle);
    }

    let handle = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        "MCP relay listening on ws://{} ({tool_count} local tools)",
        handle.addr()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    handle.stop(Some(SHUTDOWN_TIMEOUT)).await;
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_leave_settings_alone() {
        let cli = Cli::parse_from(["mcp-relay"]);
        let mut settings = RelaySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.port, 7100);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.logging.format, LogFormat::Compact);
    }

    #[test]
    fn cli_flags_override_settings() {
        let cli = Cli::parse_from([
            "mcp-relay",
            "--host",
            "127.0.0.1",
            "--port",
            "0",
            "--log-level",
            "debug",
            "--log-format",
            "json",
        ]);
        let mut settings = RelaySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 0);
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn cli_rejects_unknown_log_format() {
        assert!(Cli::try_parse_from(["mcp-relay", "--log-format", "xml"]).is_err());
    }

    #[test]
    fn cli_accepts_config_path() {
        let cli = Cli::parse_from(["mcp-relay", "--config", "/etc/relay.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/relay.json")));
    }
}
