//! Wire-level types shared by every relay crate: the JSON-RPC envelope,
//! error objects, connection identities and the tool invocation seam.

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod tools;

pub use envelope::{Envelope, RequestId, Response, JSONRPC_VERSION};
pub use errors::{DecodeError, ErrorObject};
pub use ids::{AgentId, ConnectionId};
pub use tools::{ContentBlock, Tool, ToolDescriptor, ToolError, ToolInvoker, ToolOutput};
