use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One item of a tool result's `content` list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// What a tool hands back. The variant is chosen by the tool itself; the
/// relay never probes a value to guess its shape.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolOutput {
    /// Plain content blocks.
    Text(Vec<ContentBlock>),
    /// Content blocks plus a machine-readable payload.
    Structured {
        content: Vec<ContentBlock>,
        structured: Value,
    },
    /// An already-serializable value, reported as a single content item.
    Raw(Value),
}

impl ToolOutput {
    /// Render the `tools/call` result object: `{"content": [...]}`, plus
    /// `structuredContent` when a non-empty structured payload exists.
    pub fn into_call_result(self) -> Value {
        match self {
            Self::Text(content) => json!({ "content": content }),
            Self::Structured {
                content,
                structured,
            } => {
                let empty = match &structured {
                    Value::Null => true,
                    Value::Object(map) => map.is_empty(),
                    _ => false,
                };
                if empty {
                    json!({ "content": content })
                } else {
                    json!({ "content": content, "structuredContent": structured })
                }
            }
            Self::Raw(value) => json!({ "content": [value] }),
        }
    }
}

/// A tool as advertised by `tools/list`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        default,
        rename = "inputSchema",
        skip_serializing_if = "Option::is_none"
    )]
    pub input_schema: Option<Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

/// A single invocable capability.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> Option<&str> {
        None
    }
    fn input_schema(&self) -> Option<Value> {
        None
    }

    async fn call(&self, arguments: Value) -> Result<ToolOutput, ToolError>;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_owned(),
            description: self.description().map(str::to_owned),
            input_schema: self.input_schema(),
        }
    }
}

/// The seam through which the protocol interpreter lists and invokes tools.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    fn tools(&self) -> Vec<ToolDescriptor>;

    async fn invoke(&self, name: &str, arguments: Value) -> Result<ToolOutput, ToolError>;
}
