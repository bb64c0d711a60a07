//! `RelayServer`: axum HTTP + WebSocket front end.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response as HttpResponse};
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_core::ToolInvoker;
use relay_settings::{RelaySettings, ServerSettings, SessionSettings};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::auth::{Authenticator, ConnectParams};
use crate::health::{health_check, health_envelope};
use crate::protocol::{ProtocolInterpreter, ServerInfo};
use crate::registry::ConnectionRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::{run_ws_session, PeerKind};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Shared state handed to every route and connection task.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub interpreter: Arc<ProtocolInterpreter>,
    pub authenticator: Arc<dyn Authenticator>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub session: SessionSettings,
    pub max_message_size: usize,
    pub start_time: Instant,
    /// Present when the Prometheus recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

pub struct RelayServer {
    server: ServerSettings,
    state: AppState,
}

impl RelayServer {
    pub fn new(
        settings: RelaySettings,
        invoker: Arc<dyn ToolInvoker>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        let interpreter = ProtocolInterpreter::new(
            invoker,
            ServerInfo::default(),
            settings.session.request_timeout(),
        );
        let state = AppState {
            registry: Arc::new(ConnectionRegistry::new()),
            interpreter: Arc::new(interpreter),
            authenticator,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            max_message_size: settings.server.max_message_size,
            session: settings.session,
            start_time: Instant::now(),
            metrics: None,
        };
        Self {
            server: settings.server,
            state,
        }
    }

    /// Serve `/mcp_endpoint/metrics` from this handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.state.registry
    }

    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/", get(root_handler))
            .route("/mcp_endpoint/mcp/", get(tool_ws))
            .route("/mcp_endpoint/call/", get(robot_ws))
            .route("/mcp_endpoint/protocol/", get(protocol_ws))
            .route("/mcp_endpoint/health", get(health_handler))
            .route("/mcp_endpoint/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http());
        if self.server.enable_cors {
            router = router.layer(cors_layer(&self.server.allowed_origins));
        }
        router.with_state(self.state.clone())
    }

    /// Bind and serve in the background. The listener stops accepting once
    /// the shutdown token fires.
    pub async fn listen(self) -> Result<ServerHandle, ServerError> {
        let addr = format!("{}:{}", self.server.host, self.server.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "relay listening");

        let router = self.router();
        let token = self.state.shutdown.token();
        let join = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "server terminated with error");
            }
        });

        Ok(ServerHandle {
            addr: local_addr,
            registry: self.state.registry.clone(),
            shutdown: self.state.shutdown.clone(),
            join,
        })
    }
}

/// A running server.
pub struct ServerHandle {
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    join: JoinHandle<()>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Close every connection with 1001 and wait for the listener to stop.
    pub async fn stop(self, timeout: Option<Duration>) {
        self.shutdown.graceful_shutdown(self.join, timeout).await;
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

fn upgrade(ws: WebSocketUpgrade, kind: PeerKind, params: ConnectParams, state: AppState) -> HttpResponse {
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, kind, params, state))
}

/// GET /mcp_endpoint/mcp/
async fn tool_ws(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> HttpResponse {
    upgrade(ws, PeerKind::Tool, params, state)
}

/// GET /mcp_endpoint/call/
async fn robot_ws(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> HttpResponse {
    upgrade(ws, PeerKind::Robot, params, state)
}

/// GET /mcp_endpoint/protocol/
async fn protocol_ws(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> HttpResponse {
    upgrade(ws, PeerKind::Protocol, params, state)
}

/// GET /mcp_endpoint/health
async fn health_handler(State(state): State<AppState>) -> Json<relay_core::Response> {
    let report = health_check(state.start_time, state.registry.stats());
    Json(health_envelope(&report))
}

/// GET /mcp_endpoint/metrics
async fn metrics_handler(State(state): State<AppState>) -> HttpResponse {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

/// GET /
async fn root_handler() -> Json<serde_json::Value> {
    Json(json!({
        "message": "MCP relay is running",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
