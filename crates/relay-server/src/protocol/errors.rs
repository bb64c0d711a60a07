use std::time::Duration;

use relay_core::errors::{ErrorObject, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND};
use relay_core::ToolError;

/// Failure of a locally handled control request.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("{0}")]
    InvalidParams(String),
    #[error("method not found: {0}")]
    MethodNotFound(String),
    /// The tool itself failed; the message becomes the error detail.
    #[error("{0}")]
    Invocation(String),
    #[error("Request timeout after {}", timeout_text(.0))]
    Timeout(Duration),
}

fn timeout_text(timeout: &Duration) -> String {
    if timeout.subsec_nanos() == 0 {
        format!("{} seconds", timeout.as_secs())
    } else {
        format!("{} ms", timeout.as_millis())
    }
}

impl ProtocolError {
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidParams(_) => INVALID_PARAMS,
            Self::MethodNotFound(_) => METHOD_NOT_FOUND,
            Self::Invocation(_) | Self::Timeout(_) => INTERNAL_ERROR,
        }
    }

    pub fn to_error_object(&self) -> ErrorObject {
        match self {
            Self::InvalidParams(detail) => ErrorObject::invalid_params(detail.clone()),
            Self::MethodNotFound(method) => ErrorObject::method_not_found(method),
            Self::Invocation(detail) => ErrorObject::internal(detail.clone()),
            Self::Timeout(_) => ErrorObject::internal(self.to_string()),
        }
    }
}

impl From<ToolError> for ProtocolError {
    fn from(err: ToolError) -> Self {
        Self::Invocation(err.to_string())
    }
}
