//! Untyped JSON-RPC 2.0 envelope shared by the downstream LSP transports and
//! the upstream agent channel.
//!
//! LSP traffic is open-ended JSON, so the envelope keeps `params`, `result`
//! and friends as raw [`Value`]s; method-specific payloads are decoded only
//! once the method is known.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC error codes used by the bridge itself.
pub mod code {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// The `error` member of a response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A single JSON-RPC message in wire form. Requests, responses and
/// notifications all share this shape; [`RpcMessage::classify`] splits them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcMessage {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

/// A received message, already sorted into its protocol role.
#[derive(Debug)]
pub enum Incoming {
    /// Reply to a request this process issued (integer ids only).
    Response {
        id: i64,
        result: std::result::Result<Value, RpcErrorObject>,
    },
    /// Server-initiated notification.
    Notification { method: String, params: Value },
    /// Server-initiated request; `id` is echoed back verbatim in the reply.
    Request {
        id: Value,
        method: String,
        params: Value,
    },
}

impl RpcMessage {
    pub fn request(id: i64, method: &str, params: Value) -> Self {
        RpcMessage {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(Value::from(id)),
            method: Some(method.to_string()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    pub fn notification(method: &str, params: Value) -> Self {
        RpcMessage {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: Some(method.to_string()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    pub fn response(id: Value, result: Value) -> Self {
        RpcMessage {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    pub fn error_response(id: Value, code: i64, message: impl Into<String>) -> Self {
        RpcMessage {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: None,
            error: Some(RpcErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Sorts the message into response / notification / server request.
    /// Returns `None` for shapes that fit none of the three (these are
    /// logged and dropped by the reader loop).
    pub fn classify(self) -> Option<Incoming> {
        match (self.id, self.method) {
            (Some(id), None) => {
                let id = id.as_i64()?;
                let result = match self.error {
                    Some(err) => Err(err),
                    // A response may legitimately carry `result: null`, which
                    // deserializes to `None`; normalize to `Value::Null`.
                    None => Ok(self.result.unwrap_or(Value::Null)),
                };
                Some(Incoming::Response { id, result })
            }
            (Some(id), Some(method)) => Some(Incoming::Request {
                id,
                method,
                params: self.params.unwrap_or(Value::Null),
            }),
            (None, Some(method)) => Some(Incoming::Notification {
                method,
                params: self.params.unwrap_or(Value::Null),
            }),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_response_with_null_result() {
        let msg: RpcMessage = serde_json::from_str(r#"{"jsonrpc":"2.0","id":7,"result":null}"#).unwrap();
        match msg.classify() {
            Some(Incoming::Response { id, result }) => {
                assert_eq!(id, 7);
                assert_eq!(result.unwrap(), Value::Null);
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn classifies_error_response() {
        let msg: RpcMessage = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32601,"message":"unknown"}}"#,
        )
        .unwrap();
        match msg.classify() {
            Some(Incoming::Response { result: Err(err), .. }) => {
                assert_eq!(err.code, code::METHOD_NOT_FOUND);
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn classifies_notification_and_server_request() {
        let notif: RpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"initialized"}"#).unwrap();
        assert!(matches!(
            notif.classify(),
            Some(Incoming::Notification { method, .. }) if method == "initialized"
        ));

        let req: RpcMessage = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":"srv-1","method":"workspace/configuration","params":{"items":[{}]}}"#,
        )
        .unwrap();
        assert!(matches!(
            req.classify(),
            Some(Incoming::Request { id, .. }) if id == json!("srv-1")
        ));
    }

    #[test]
    fn request_serialization_omits_empty_members() {
        let wire = serde_json::to_string(&RpcMessage::request(1, "shutdown", Value::Null)).unwrap();
        assert!(!wire.contains("result"));
        assert!(!wire.contains("error"));
    }
}
