//! JSON-RPC message types

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Error;
use crate::error::rpc_codes;

/// JSON-RPC error response
///
/// `id` is always serialized, as `null` when the request had none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Request ID echoed from the request
    pub id: Value,
    /// Error object
    pub error: JsonRpcError,
}

impl ErrorResponse {
    /// Create an error response
    pub fn new(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            error: JsonRpcError {
                code,
                message: message.into(),
                data: None,
            },
        }
    }

    /// Response for a line that is not valid JSON
    #[must_use]
    pub fn parse_error() -> Self {
        Self::new(Value::Null, rpc_codes::PARSE_ERROR, "Parse error")
    }

    /// Response for a request that failed inside the relay
    #[must_use]
    pub fn from_error(id: Value, err: &Error) -> Self {
        Self::new(id, err.to_rpc_code(), err.to_string())
    }
}

/// JSON-RPC error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Optional error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// The `id` of a request payload, or `null`
pub fn request_id(payload: &Value) -> Value {
    payload.get("id").cloned().unwrap_or(Value::Null)
}

/// Whether a payload is a notification (a method call without `id`)
pub fn is_notification(payload: &Value) -> bool {
    payload
        .as_object()
        .is_some_and(|obj| obj.contains_key("method") && !obj.contains_key("id"))
}
