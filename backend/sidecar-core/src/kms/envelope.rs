//! JSON-RPC 2.0 envelopes exchanged with the KMS.
//!
//! Errors use the KMS flavour `{"id": <code>, "message": <text>}` rather than
//! the standard `code` field.

use crate::error::kms::KmsError;

use common::ErrorLocation;

use std::panic::Location;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

pub const JSONRPC_VERSION: &str = "2.0";

/// Error payload of a JSON-RPC error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    #[serde(rename = "id")]
    pub code: Value,
    pub message: String,
}

impl RpcError {
    pub fn new(code: impl Into<Value>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// The code as text, whatever JSON type the KMS used.
    pub fn code_string(&self) -> String {
        match &self.code {
            Value::String(code) => code.clone(),
            other => other.to_string(),
        }
    }

    #[track_caller]
    pub fn into_kms_error(self) -> KmsError {
        KmsError::Response {
            code: self.code_string(),
            message: self.message,
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

/// A parsed inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// KMS-initiated request or notification.
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    /// Reply to one of our requests, keyed by correlation id.
    Response {
        id: String,
        outcome: Result<Value, RpcError>,
    },
}

pub fn request(id: &str, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "method": method, "params": params })
}

pub fn notification(method: &str, params: Value) -> Value {
    json!({ "jsonrpc": JSONRPC_VERSION, "method": method, "params": params })
}

pub fn result(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": result })
}

pub fn error(id: &Value, error: &RpcError) -> Value {
    json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "error": error })
}

/// Parse one text frame from the KMS.
///
/// # Errors
///
/// Returns [`KmsError::Envelope`] if the text is not a JSON object carrying
/// `"jsonrpc": "2.0"` with either a `method`, a `result` or an `error`.
#[track_caller]
pub fn parse(text: &str) -> Result<Inbound, KmsError> {
    let value: Value = serde_json::from_str(text).map_err(|e| KmsError::Envelope {
        message: format!("not JSON: {e}"),
        location: ErrorLocation::from(Location::caller()),
    })?;

    let Value::Object(mut object) = value else {
        return Err(KmsError::Envelope {
            message: String::from("not a JSON object"),
            location: ErrorLocation::from(Location::caller()),
        });
    };

    if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(KmsError::Envelope {
            message: String::from("missing jsonrpc 2.0 marker"),
            location: ErrorLocation::from(Location::caller()),
        });
    }

    if let Some(method) = object.get("method") {
        let method = method
            .as_str()
            .ok_or_else(|| KmsError::Envelope {
                message: String::from("method is not a string"),
                location: ErrorLocation::from(Location::caller()),
            })?
            .to_string();

        return Ok(Inbound::Request {
            id: object.remove("id").unwrap_or(Value::Null),
            method,
            params: object.remove("params").unwrap_or(Value::Null),
        });
    }

    let id = correlation_id(&object).ok_or_else(|| KmsError::Envelope {
        message: String::from("response without a usable id"),
        location: ErrorLocation::from(Location::caller()),
    })?;

    if let Some(error) = object.remove("error") {
        let error: RpcError = serde_json::from_value(error).map_err(|e| KmsError::Envelope {
            message: format!("malformed error object: {e}"),
            location: ErrorLocation::from(Location::caller()),
        })?;
        return Ok(Inbound::Response {
            id,
            outcome: Err(error),
        });
    }

    match object.remove("result") {
        Some(result) => Ok(Inbound::Response {
            id,
            outcome: Ok(result),
        }),
        None => Err(KmsError::Envelope {
            message: String::from("neither method, result nor error present"),
            location: ErrorLocation::from(Location::caller()),
        }),
    }
}

fn correlation_id(object: &Map<String, Value>) -> Option<String> {
    match object.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
