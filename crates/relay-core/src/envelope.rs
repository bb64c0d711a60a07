use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::errors::{DecodeError, ErrorObject};

pub const JSONRPC_VERSION: &str = "2.0";

/// A request id as the caller chose it. The JSON type is kept, so a
/// numeric id comes back as a number after a relay hop.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(Number),
    String(String),
}

impl RequestId {
    /// Read an id member. `null` and non-scalar values are not ids.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(Self::Number(n.clone())),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => n.fmt(f),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// A decoded inbound frame.
///
/// The relay forwards most traffic without understanding it, so the frame
/// is kept as its JSON object. Members the relay does not know about survive
/// a hop untouched. Only `id` is ever rewritten.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Envelope(Map<String, Value>);

impl Envelope {
    /// Decode one text frame. The frame must be a JSON object whose `id`,
    /// when present, is a string, a number or null.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let Value::Object(map) = value else {
            return Err(DecodeError::NotAnObject);
        };
        match map.get("id") {
            None | Some(Value::Null | Value::String(_) | Value::Number(_)) => Ok(Self(map)),
            Some(_) => Err(DecodeError::InvalidId),
        }
    }

    /// The request id, or `None` when absent or null (a notification).
    pub fn id(&self) -> Option<RequestId> {
        self.0.get("id").and_then(RequestId::from_value)
    }

    pub fn method(&self) -> Option<&str> {
        self.0.get("method").and_then(Value::as_str)
    }

    pub fn params(&self) -> Option<&Value> {
        self.0.get("params")
    }

    pub fn is_jsonrpc_v2(&self) -> bool {
        self.0.get("jsonrpc").and_then(Value::as_str) == Some(JSONRPC_VERSION)
    }

    /// Returns a copy with `id` replaced. `self` is left as it was.
    #[must_use]
    pub fn with_id(&self, id: Value) -> Self {
        let mut map = self.0.clone();
        map.insert("id".to_owned(), id);
        Self(map)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_string(&self.0).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

/// Outgoing JSON-RPC 2.0 response. Exactly one of `result`/`error` is
/// serialized; a missing id is written as `null`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<RequestId>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Result(Value),
    Error(ErrorObject),
}

impl Response {
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            outcome: Outcome::Result(result),
        }
    }

    pub fn error(id: Option<RequestId>, error: ErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            outcome: Outcome::Error(error),
        }
    }

    pub fn error_object(&self) -> Option<&ErrorObject> {
        match &self.outcome {
            Outcome::Error(e) => Some(e),
            Outcome::Result(_) => None,
        }
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Result(v) => Some(v),
            Outcome::Error(_) => None,
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn decode_request() {
        let env =
            Envelope::decode(r#"{"jsonrpc":"2.0","method":"tools/list","id":7}"#).unwrap();
        assert!(env.is_jsonrpc_v2());
        assert_eq!(env.method(), Some("tools/list"));
        assert_eq!(env.id(), Some(RequestId::from(7)));
        assert!(env.params().is_none());
    }

    #[test]
    fn null_and_missing_ids_are_notifications() {
        let env = Envelope::decode(r#"{"jsonrpc":"2.0","method":"ping","id":null}"#).unwrap();
        assert_eq!(env.id(), None);
        let env = Envelope::decode(r#"{"jsonrpc":"2.0","method":"ping"}"#).unwrap();
        assert_eq!(env.id(), None);
    }

    #[test]
    fn decode_rejects_bad_frames() {
        assert_matches!(Envelope::decode("{not json"), Err(DecodeError::Json(_)));
        assert_matches!(Envelope::decode("[1,2]"), Err(DecodeError::NotAnObject));
        assert_matches!(
            Envelope::decode(r#"{"jsonrpc":"2.0","id":{"a":1}}"#),
            Err(DecodeError::InvalidId)
        );
    }

    #[test]
    fn older_protocol_versions_are_not_v2() {
        let env = Envelope::decode(r#"{"jsonrpc":"1.0","method":"tools/list","id":1}"#).unwrap();
        assert!(!env.is_jsonrpc_v2());
        let env = Envelope::decode(r#"{"method":"tools/list","id":1}"#).unwrap();
        assert!(!env.is_jsonrpc_v2());
    }

    #[test]
    fn with_id_copies_and_keeps_unknown_members() {
        let env = Envelope::decode(
            r#"{"jsonrpc":"2.0","method":"custom/op","id":5,"params":{"x":1},"meta":"kept"}"#,
        )
        .unwrap();
        let tagged = env.with_id(json!("abc:5"));

        assert_eq!(env.id(), Some(RequestId::from(5)));
        assert_eq!(tagged.id(), Some(RequestId::from("abc:5")));
        assert_eq!(tagged.as_map()["meta"], "kept");
        assert_eq!(tagged.params(), Some(&json!({"x": 1})));
    }

    #[test]
    fn display_encodes_json() {
        let env = Envelope::decode(r#"{"id":"a","result":true}"#).unwrap();
        let reparsed: Value = serde_json::from_str(&env.to_string()).unwrap();
        assert_eq!(reparsed, json!({"id": "a", "result": true}));
    }

    #[test]
    fn request_id_display_matches_wire_text() {
        assert_eq!(RequestId::from(5).to_string(), "5");
        assert_eq!(RequestId::from("req-1").to_string(), "req-1");
        assert_eq!(RequestId::from(5).to_value(), json!(5));
        assert_eq!(RequestId::from("5").to_value(), json!("5"));
    }

    #[test]
    fn success_response_shape() {
        let resp = Response::success(Some(RequestId::from(1)), json!({"tools": []}));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json, json!({"jsonrpc": "2.0", "id": 1, "result": {"tools": []}}));
    }

    #[test]
    fn error_response_with_null_id() {
        let resp = Response::error(None, ErrorObject::parse_error());
        let json: Value = serde_json::from_str(&resp.encode().unwrap()).unwrap();
        assert_eq!(json["id"], Value::Null);
        assert_eq!(json["error"]["code"], -32700);
        assert!(json.get("result").is_none());
    }

    #[test]
    fn response_decodes_from_wire() {
        let resp: Response = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":"x","error":{"code":-32601,"message":"Method not found"}}"#,
        )
        .unwrap();
        assert_eq!(resp.id, Some(RequestId::from("x")));
        assert_eq!(resp.error_object().unwrap().code, -32601);
        assert!(resp.result().is_none());
    }
}
