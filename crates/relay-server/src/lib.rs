//! # relay-server
//!
//! WebSocket relay between tool backends and robot clients.
//!
//! - Connection registry: one tool connection per agent, many robots per agent
//! - Request id translation so colliding robot ids stay distinct upstream
//! - Local answers for the MCP control methods (`initialize`, `tools/*`, ...)
//! - Axum endpoints for tools, robots, protocol-only clients and health
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod auth;
pub mod health;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod translator;
pub mod websocket;

pub use auth::{Authenticator, AuthError, ConnectParams, SharedSecretAuthenticator};
pub use protocol::{ProtocolInterpreter, ServerInfo};
pub use registry::{ConnectionRegistry, ForwardError, RegistryStats};
pub use server::{RelayServer, ServerError, ServerHandle};
pub use shutdown::ShutdownCoordinator;
pub use translator::{IdTranslator, Unroutable};
pub use websocket::{PeerKind, PeerLink, RelaySession};
