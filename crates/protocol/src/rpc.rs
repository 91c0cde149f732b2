//! Strict JSON-RPC 2.0 message types for the downstream API.
//!
//! A request without an `id` is a notification and gets no response.
//! Batches are arrays of requests; each element is validated and
//! answered independently, and an empty batch is itself an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

// Standard codes.
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

// Gateway codes (-32000..-32099).
pub const NOT_AUTHENTICATED: i32 = -32000;
pub const RATE_LIMITED: i32 = -32001;
pub const PERMISSION_DENIED: i32 = -32002;
pub const SESSION_EXPIRED: i32 = -32003;
pub const GATEWAY_ERROR: i32 = -32004;
pub const TARGET_UNKNOWN: i32 = -32005;
pub const TIMEOUT: i32 = -32006;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A request id: string or integer per the JSON-RPC spec.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Num(i64),
    Str(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Num(n) => write!(f, "{n}"),
            RequestId::Str(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl Request {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    /// `None` only for errors that could not be tied to a request
    /// (serialized as JSON null per the spec).
    pub id: Option<RequestId>,
}

impl Response {
    pub fn result(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            result: Some(result),
            error: None,
            id: Some(id),
        }
    }

    pub fn error(id: Option<RequestId>, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

/// A server-initiated notification (event delivery).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            method: method.into(),
            params: Some(params),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Incoming message parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One parsed element of an incoming payload: a valid request, or the
/// error response owed for an invalid one.
pub type Parsed = std::result::Result<Request, Response>;

/// An incoming payload: a single message or a batch.
#[derive(Debug)]
pub enum Incoming {
    Single(Parsed),
    Batch(Vec<Parsed>),
}

/// Parse one wire payload (a WS text frame or a TCP line).
///
/// Malformed JSON and empty batches yield a single error response. Batch
/// elements are validated independently so one bad element does not
/// poison its siblings.
pub fn parse_incoming(raw: &str) -> Incoming {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            return Incoming::Single(Err(Response::error(
                None,
                RpcError::new(PARSE_ERROR, format!("parse error: {e}")),
            )))
        }
    };

    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Incoming::Single(Err(Response::error(
                    None,
                    RpcError::new(INVALID_REQUEST, "empty batch"),
                )));
            }
            Incoming::Batch(items.into_iter().map(validate_request).collect())
        }
        other => Incoming::Single(validate_request(other)),
    }
}

/// Validate one JSON value as a request object.
fn validate_request(value: Value) -> Parsed {
    let Value::Object(ref obj) = value else {
        return Err(Response::error(
            None,
            RpcError::new(INVALID_REQUEST, "request must be an object"),
        ));
    };

    // Recover the id first so even invalid requests are answered by id.
    let id: Option<RequestId> = obj
        .get("id")
        .and_then(|v| serde_json::from_value(v.clone()).ok());

    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(Response::error(
            id,
            RpcError::new(INVALID_REQUEST, "jsonrpc must be \"2.0\""),
        ));
    }
    let Some(method) = obj.get("method").and_then(Value::as_str) else {
        return Err(Response::error(
            id,
            RpcError::new(INVALID_REQUEST, "method must be a string"),
        ));
    };
    if let Some(params) = obj.get("params") {
        if !params.is_object() && !params.is_array() {
            return Err(Response::error(
                id,
                RpcError::new(INVALID_REQUEST, "params must be an object or array"),
            ));
        }
    }
    if let Some(raw_id) = obj.get("id") {
        if !raw_id.is_string() && !raw_id.is_i64() && !raw_id.is_u64() && !raw_id.is_null() {
            return Err(Response::error(
                None,
                RpcError::new(INVALID_REQUEST, "id must be a string or integer"),
            ));
        }
    }

    Ok(Request {
        jsonrpc: JSONRPC_VERSION.into(),
        method: method.to_string(),
        params: obj.get("params").cloned(),
        id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_request_with_numeric_id() {
        let Incoming::Single(Ok(req)) = parse_incoming(
            r#"{"jsonrpc":"2.0","id":1,"method":"authenticate","params":{"api_key":"K1"}}"#,
        ) else {
            panic!("expected a valid single request");
        };
        assert_eq!(req.method, "authenticate");
        assert_eq!(req.id, Some(RequestId::Num(1)));
        assert!(!req.is_notification());
    }

    #[test]
    fn missing_id_is_notification() {
        let Incoming::Single(Ok(req)) =
            parse_incoming(r#"{"jsonrpc":"2.0","method":"ping"}"#)
        else {
            panic!("expected a valid single request");
        };
        assert!(req.is_notification());
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let Incoming::Single(Err(resp)) = parse_incoming("{nope") else {
            panic!("expected an error response");
        };
        assert_eq!(resp.error.unwrap().code, PARSE_ERROR);
        assert_eq!(resp.id, None);
    }

    #[test]
    fn wrong_version_rejected_with_id() {
        let Incoming::Single(Err(resp)) =
            parse_incoming(r#"{"jsonrpc":"1.0","id":7,"method":"ping"}"#)
        else {
            panic!("expected an error response");
        };
        assert_eq!(resp.error.unwrap().code, INVALID_REQUEST);
        assert_eq!(resp.id, Some(RequestId::Num(7)));
    }

    #[test]
    fn scalar_params_rejected() {
        let Incoming::Single(Err(resp)) =
            parse_incoming(r#"{"jsonrpc":"2.0","id":1,"method":"ping","params":5}"#)
        else {
            panic!("expected an error response");
        };
        assert_eq!(resp.error.unwrap().code, INVALID_REQUEST);
    }

    #[test]
    fn empty_batch_is_invalid_request() {
        let Incoming::Single(Err(resp)) = parse_incoming("[]") else {
            panic!("expected an error response");
        };
        assert_eq!(resp.error.unwrap().code, INVALID_REQUEST);
    }

    #[test]
    fn batch_elements_validated_independently() {
        let Incoming::Batch(items) = parse_incoming(
            r#"[{"jsonrpc":"2.0","id":1,"method":"ping"}, 42, {"jsonrpc":"2.0","method":"ping"}]"#,
        ) else {
            panic!("expected a batch");
        };
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
        assert!(matches!(&items[2], Ok(req) if req.is_notification()));
    }

    #[test]
    fn response_serializes_result_xor_error() {
        let ok = Response::result(RequestId::Num(1), json!({"status": "sent"}));
        let raw = serde_json::to_value(&ok).unwrap();
        assert!(raw.get("result").is_some());
        assert!(raw.get("error").is_none());

        let err = Response::error(
            Some(RequestId::Num(2)),
            RpcError::new(RATE_LIMITED, "rate_limited").with_data(json!({"retry_after_ms": 500})),
        );
        let raw = serde_json::to_value(&err).unwrap();
        assert!(raw.get("result").is_none());
        assert_eq!(raw["error"]["code"], json!(RATE_LIMITED));
        assert_eq!(raw["error"]["data"]["retry_after_ms"], json!(500));
    }

    #[test]
    fn notification_has_no_id_field() {
        let n = Notification::new("tell_received", json!({"message": "hi"}));
        let raw = serde_json::to_value(&n).unwrap();
        assert!(raw.get("id").is_none());
        assert_eq!(raw["method"], "tell_received");
    }
}
