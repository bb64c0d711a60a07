use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// Standard JSON-RPC error codes
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

// Relay-specific error codes
pub const TOOL_NOT_CONNECTED: i32 = -32001;
pub const FORWARD_FAILED: i32 = -32002;
pub const CONNECTION_ERROR: i32 = -32003;
pub const AUTHENTICATION_ERROR: i32 = -32004;

/// JSON-RPC 2.0 error object carried in the `error` member of a response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error() -> Self {
        Self::new(PARSE_ERROR, "Parse error")
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, "Invalid Request").with_data(json!({ "detail": detail.into() }))
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, "Method not found").with_data(json!({ "method": method }))
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, "Invalid params").with_data(json!({ "detail": detail.into() }))
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, "Internal error").with_data(json!({ "detail": detail.into() }))
    }

    pub fn tool_not_connected(agent_id: &str) -> Self {
        Self::new(TOOL_NOT_CONNECTED, "Tool not connected").with_data(json!({
            "agent_id": agent_id,
            "details": format!("no tool connection is registered for agent '{agent_id}'"),
        }))
    }

    pub fn forward_failed(agent_id: &str, details: impl Into<String>) -> Self {
        Self::new(FORWARD_FAILED, "Forward failed").with_data(json!({
            "agent_id": agent_id,
            "details": details.into(),
        }))
    }

    pub fn connection_error(detail: impl Into<String>) -> Self {
        Self::new(CONNECTION_ERROR, "Connection error").with_data(json!({ "detail": detail.into() }))
    }

    pub fn authentication(detail: impl Into<String>) -> Self {
        Self::new(AUTHENTICATION_ERROR, "Authentication failed")
            .with_data(json!({ "detail": detail.into() }))
    }
}

/// Why an inbound text frame could not be turned into an [`Envelope`](crate::Envelope).
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("id must be a string, a number or null")]
    InvalidId,
}

impl DecodeError {
    pub fn code(&self) -> i32 {
        match self {
            Self::Json(_) => PARSE_ERROR,
            Self::NotAnObject | Self::InvalidId => INVALID_REQUEST,
        }
    }

    pub fn to_error_object(&self) -> ErrorObject {
        match self {
            Self::Json(_) => ErrorObject::parse_error(),
            Self::NotAnObject | Self::InvalidId => ErrorObject::invalid_request(self.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_is_omitted_when_absent() {
        let json = serde_json::to_value(ErrorObject::parse_error()).unwrap();
        assert_eq!(json, json!({"code": -32700, "message": "Parse error"}));
    }

    #[test]
    fn method_not_found_names_method() {
        let err = ErrorObject::method_not_found("foo/bar");
        assert_eq!(err.code, METHOD_NOT_FOUND);
        assert_eq!(err.data, Some(json!({"method": "foo/bar"})));
    }

    #[test]
    fn invalid_params_carries_detail() {
        let err = ErrorObject::invalid_params("Missing tool name");
        assert_eq!(err.code, -32602);
        assert_eq!(err.data.unwrap()["detail"], "Missing tool name");
    }

    #[test]
    fn routing_errors_name_the_agent() {
        let err = ErrorObject::tool_not_connected("default_agent");
        assert_eq!(err.code, -32001);
        assert_eq!(err.data.as_ref().unwrap()["agent_id"], "default_agent");

        let err = ErrorObject::forward_failed("default_agent", "channel closed");
        assert_eq!(err.code, -32002);
        assert_eq!(err.data.unwrap()["details"], "channel closed");
    }

    #[test]
    fn application_codes_are_reserved_values() {
        assert_eq!(ErrorObject::connection_error("reset").code, -32003);
        assert_eq!(ErrorObject::authentication("bad token").code, -32004);
    }

    #[test]
    fn decode_error_maps_to_codes() {
        let json_err = serde_json::from_str::<Value>("{bad").unwrap_err();
        let err = DecodeError::from(json_err);
        assert_eq!(err.code(), PARSE_ERROR);
        assert_eq!(err.to_error_object().message, "Parse error");

        assert_eq!(DecodeError::NotAnObject.code(), INVALID_REQUEST);
        let obj = DecodeError::InvalidId.to_error_object();
        assert_eq!(obj.code, INVALID_REQUEST);
        assert_eq!(obj.data.unwrap()["detail"], "id must be a string, a number or null");
    }
}
