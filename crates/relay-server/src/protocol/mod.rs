//! MCP control methods the relay answers itself instead of forwarding.

pub mod errors;
pub mod interpreter;
pub mod methods;

pub use errors::ProtocolError;
pub use interpreter::{reject_unlisted, ProtocolInterpreter, ServerInfo, PROTOCOL_VERSION};
pub use methods::{LocalMethod, LocalRequest};
