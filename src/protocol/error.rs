//! Protocol (wire) error taxonomy.
//!
//! A closed set of JSON-RPC 2.0 error codes travels in response bodies as
//! `{ "error": { "code": ..., "message": "...", "data": ... } }`. The client
//! re-inflates received error objects into [`ProtocolError`] values; the code
//! classifies them via [`ErrorCode`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Invalid JSON was received by the server.
pub const PARSE_ERROR: i64 = -32700;
/// The request body is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist on this server.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// The supplied params failed schema validation.
pub const INVALID_PARAMS: i64 = -32602;
/// The handler failed in an unclassified way.
pub const INTERNAL_ERROR: i64 = -32603;

/// Classification of a protocol error by numeric code.
///
/// Codes outside the closed taxonomy are preserved in [`ErrorCode::Other`];
/// they behave as a base protocol error on the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    Other(i64),
}

impl ErrorCode {
    /// Map a numeric wire code onto its classification.
    pub fn from_code(code: i64) -> Self {
        match code {
            PARSE_ERROR => ErrorCode::ParseError,
            INVALID_REQUEST => ErrorCode::InvalidRequest,
            METHOD_NOT_FOUND => ErrorCode::MethodNotFound,
            INVALID_PARAMS => ErrorCode::InvalidParams,
            INTERNAL_ERROR => ErrorCode::InternalError,
            other => ErrorCode::Other(other),
        }
    }

    /// The numeric code for this classification.
    pub fn code(self) -> i64 {
        match self {
            ErrorCode::ParseError => PARSE_ERROR,
            ErrorCode::InvalidRequest => INVALID_REQUEST,
            ErrorCode::MethodNotFound => METHOD_NOT_FOUND,
            ErrorCode::InvalidParams => INVALID_PARAMS,
            ErrorCode::InternalError => INTERNAL_ERROR,
            ErrorCode::Other(code) => code,
        }
    }
}

/// An error that crosses the wire inside a response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{message} (code {code})")]
pub struct ProtocolError {
    /// Numeric error code; standard codes are negative integers.
    pub code: i64,

    /// Short description of the error.
    pub message: String,

    /// Optional structured payload (validation messages, failing request,
    /// original unparseable text, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ProtocolError {
    fn new(code: i64, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: if data.is_null() { None } else { Some(data) },
        }
    }

    /// Parse error (-32700); `data` carries the original unparseable text.
    pub fn parse_error(data: Value) -> Self {
        Self::new(PARSE_ERROR, "Parse error", data)
    }

    /// Invalid request (-32600).
    pub fn invalid_request(data: Value) -> Self {
        Self::new(INVALID_REQUEST, "Invalid request", data)
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: &str, data: Value) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("No such method: {method}"), data)
    }

    /// Invalid params (-32602); `data` carries the validator's messages and
    /// the failing request.
    pub fn invalid_params(data: Value) -> Self {
        Self::new(INVALID_PARAMS, "Invalid params", data)
    }

    /// Internal error (-32603); `data` carries the captured handler failure.
    pub fn internal_error(data: Value) -> Self {
        Self::new(INTERNAL_ERROR, "Internal error", data)
    }

    /// Classify this error by its numeric code.
    pub fn kind(&self) -> ErrorCode {
        ErrorCode::from_code(self.code)
    }

    /// Re-inflate a wire error object (`{ code, message, data? }`).
    ///
    /// Tolerates missing fields: a missing code is treated as InternalError
    /// and a missing message falls back to the code's rendering, so a
    /// malformed error body still rejects the caller with something usable.
    pub fn from_wire(value: &Value) -> Self {
        let code = value
            .get("code")
            .and_then(Value::as_i64)
            .unwrap_or(INTERNAL_ERROR);
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| format!("protocol error {code}"));
        let data = value.get("data").filter(|d| !d.is_null()).cloned();
        Self {
            code,
            message,
            data,
        }
    }
}
