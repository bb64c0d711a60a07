use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use metrics::{counter, histogram};
use relay_core::{Envelope, ErrorObject, Response, ToolInvoker};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use super::errors::ProtocolError;
use super::methods::{LocalMethod, LocalRequest};
use crate::metrics::{LOCAL_REQUESTS_TOTAL, LOCAL_REQUEST_DURATION_SECONDS};

/// MCP revision advertised by `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Identity reported in the `initialize` result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "mcp-relay".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Answers [`LocalRequest`]s from the tool catalogue, bounded by a timeout.
pub struct ProtocolInterpreter {
    invoker: Arc<dyn ToolInvoker>,
    server_info: ServerInfo,
    timeout: Duration,
}

impl ProtocolInterpreter {
    /// Create an interpreter answering from `invoker`, with each request
    /// bounded by `timeout`.
    pub fn new(invoker: Arc<dyn ToolInvoker>, server_info: ServerInfo, timeout: Duration) -> Self {
        Self {
            invoker,
            server_info,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute one local request.
    ///
    /// Returns `None` when nothing must be written back: for
    /// `notifications/initialized` and for any request without an id.
    /// On timeout the handler future is dropped and its result never seen.
    pub async fn handle(&self, request: LocalRequest) -> Option<Response> {
        let method = request.method.as_str();
        let started = Instant::now();
        counter!(LOCAL_REQUESTS_TOTAL, "method" => method).increment(1);

        let outcome = match tokio::time::timeout(self.timeout, self.execute(&request)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(method, timeout_ms = self.timeout.as_millis() as u64, "local request timed out");
                Err(ProtocolError::Timeout(self.timeout))
            }
        };
        histogram!(LOCAL_REQUEST_DURATION_SECONDS, "method" => method)
            .record(started.elapsed().as_secs_f64());

        let Some(id) = request.id else {
            if let Err(e) = &outcome {
                debug!(method, error = %e, "error for notification not reported");
            }
            return None;
        };
        match outcome {
            Ok(Some(result)) => Some(Response::success(Some(id), result)),
            Ok(None) => None,
            Err(e) => Some(Response::error(Some(id), e.to_error_object())),
        }
    }

    async fn execute(&self, request: &LocalRequest) -> Result<Option<Value>, ProtocolError> {
        let params = &request.params;
        match request.method {
            LocalMethod::Initialize => Ok(Some(self.initialize_result())),
            LocalMethod::Initialized => Ok(None),
            LocalMethod::ToolsList => Ok(Some(self.list_tools())),
            LocalMethod::ToolsCall => self.call_tool(params).await.map(Some),
            LocalMethod::ResourcesList => Ok(Some(json!({ "resources": [] }))),
            LocalMethod::ResourcesRead => Err(match str_param(params, "uri") {
                Some(uri) => ProtocolError::InvalidParams(format!("Unknown resource: {uri}")),
                None => ProtocolError::InvalidParams("Missing resource uri".into()),
            }),
            LocalMethod::PromptsList => Ok(Some(json!({ "prompts": [] }))),
            LocalMethod::PromptsGet => Err(match str_param(params, "name") {
                Some(name) => ProtocolError::InvalidParams(format!("Unknown prompt: {name}")),
                None => ProtocolError::InvalidParams("Missing prompt name".into()),
            }),
        }
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": false }
            },
            "serverInfo": {
                "name": self.server_info.name,
                "version": self.server_info.version,
            }
        })
    }

    fn list_tools(&self) -> Value {
        let tools: Vec<Value> = self
            .invoker
            .tools()
            .into_iter()
            .map(|tool| {
                let description = tool
                    .description
                    .filter(|d| !d.is_empty())
                    .unwrap_or_else(|| format!("tool: {}", tool.name));
                let schema = tool.input_schema.unwrap_or_else(empty_schema);
                json!({
                    "name": tool.name,
                    "description": description,
                    "inputSchema": schema,
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    async fn call_tool(&self, params: &Value) -> Result<Value, ProtocolError> {
        let name = str_param(params, "name")
            .ok_or_else(|| ProtocolError::InvalidParams("Missing tool name".into()))?;
        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => json!({}),
            Some(args) => args.clone(),
        };

        debug!(tool = name, "invoking tool");
        let invocation = AssertUnwindSafe(self.invoker.invoke(name, arguments)).catch_unwind();
        match invocation.await {
            Ok(Ok(output)) => Ok(output.into_call_result()),
            Ok(Err(e)) => {
                warn!(tool = name, error = %e, "tool invocation failed");
                Err(e.into())
            }
            Err(panic) => {
                let msg = panic_message(&panic);
                error!(tool = name, panic = %msg, "tool panicked during invocation");
                Err(ProtocolError::Invocation(format!("tool panicked: {msg}")))
            }
        }
    }
}

/// Answer for a non-local frame on the protocol-only endpoint, which has
/// nowhere to forward it. Notifications get no answer.
pub fn reject_unlisted(envelope: &Envelope) -> Option<Response> {
    match (envelope.method(), envelope.id()) {
        (Some(_), None) => None,
        (Some(method), id) => Some(Response::error(
            id,
            ProtocolError::MethodNotFound(method.to_string()).to_error_object(),
        )),
        (None, id) => Some(Response::error(
            id,
            ErrorObject::invalid_request("expected a request with a method"),
        )),
    }
}

fn empty_schema() -> Value {
    json!({ "type": "object", "properties": {}, "required": [] })
}

fn str_param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}
