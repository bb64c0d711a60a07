//! WebSocket sessions: write handles, the relay loop and the axum glue.

pub mod connection;
pub mod heartbeat;
pub mod relay;
pub mod session;

pub use connection::{LinkError, Outbound, PeerLink};
pub use heartbeat::{HeartbeatResult, Liveness};
pub use relay::{PeerKind, RelaySession};
pub use session::run_ws_session;
