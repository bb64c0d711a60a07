use relay_core::{Envelope, RequestId};
use serde_json::Value;

/// Control methods handled locally.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LocalMethod {
    Initialize,
    Initialized,
    ToolsList,
    ToolsCall,
    ResourcesList,
    ResourcesRead,
    PromptsList,
    PromptsGet,
}

impl LocalMethod {
    pub const ALL: [LocalMethod; 8] = [
        Self::Initialize,
        Self::Initialized,
        Self::ToolsList,
        Self::ToolsCall,
        Self::ResourcesList,
        Self::ResourcesRead,
        Self::PromptsList,
        Self::PromptsGet,
    ];

    pub fn parse(method: &str) -> Option<Self> {
        Some(match method {
            "initialize" => Self::Initialize,
            "notifications/initialized" => Self::Initialized,
            "tools/list" => Self::ToolsList,
            "tools/call" => Self::ToolsCall,
            "resources/list" => Self::ResourcesList,
            "resources/read" => Self::ResourcesRead,
            "prompts/list" => Self::PromptsList,
            "prompts/get" => Self::PromptsGet,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Initialized => "notifications/initialized",
            Self::ToolsList => "tools/list",
            Self::ToolsCall => "tools/call",
            Self::ResourcesList => "resources/list",
            Self::ResourcesRead => "resources/read",
            Self::PromptsList => "prompts/list",
            Self::PromptsGet => "prompts/get",
        }
    }
}

/// A frame classified as a local control request.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalRequest {
    pub method: LocalMethod,
    /// `None` for notifications.
    pub id: Option<RequestId>,
    /// `Value::Null` when the frame had no params.
    pub params: Value,
}

impl LocalRequest {
    /// A frame is local iff it declares `jsonrpc: "2.0"` and names one of
    /// the [`LocalMethod`]s. Everything else is opaque traffic.
    pub fn classify(envelope: &Envelope) -> Option<Self> {
        if !envelope.is_jsonrpc_v2() {
            return None;
        }
        let method = LocalMethod::parse(envelope.method()?)?;
        Some(Self {
            method,
            id: envelope.id(),
            params: envelope.params().cloned().unwrap_or(Value::Null),
        })
    }
}
