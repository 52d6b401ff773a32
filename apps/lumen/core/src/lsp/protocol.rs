//! JSON-RPC 2.0 message shapes

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Error object of a failed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Reply to one of our requests
    Response {
        id: i64,
        result: std::result::Result<Value, ResponseError>,
    },
    /// Server-initiated request; must be answered
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    /// Anything else (a response with a foreign id, a batch, ...)
    Invalid(Value),
}

impl Incoming {
    pub fn classify(message: Value) -> Self {
        let method = message.get("method").and_then(Value::as_str).map(str::to_string);
        let id = message.get("id").filter(|id| !id.is_null()).cloned();

        match (method, id) {
            (Some(method), Some(id)) => Incoming::Request {
                id,
                method,
                params: message.get("params").cloned().unwrap_or(Value::Null),
            },
            (Some(method), None) => Incoming::Notification {
                method,
                params: message.get("params").cloned().unwrap_or(Value::Null),
            },
            (None, Some(id)) => {
                let numeric = id
                    .as_i64()
                    .or_else(|| id.as_str().and_then(|s| s.parse().ok()));
                let Some(id) = numeric else {
                    return Incoming::Invalid(message);
                };
                let result = match message.get("error") {
                    Some(error) if !error.is_null() => Err(serde_json::from_value(error.clone())
                        .unwrap_or_else(|_| ResponseError {
                            code: 0,
                            message: error.to_string(),
                            data: None,
                        })),
                    _ => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
                };
                Incoming::Response { id, result }
            }
            (None, None) => Incoming::Invalid(message),
        }
    }
}

pub fn request(id: i64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
}

pub fn notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params
    })
}

pub fn response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}
