//! Request envelope shape and response body formatting.
//!
//! A request body is a mapping with a required `method` and optional
//! `params`; a batch is a non-empty array of such mappings, answered by an
//! array of per-item responses in the same order. A non-batch response body
//! is `{ "result": V }` or `{ "error": { code, message, data? } }` — except
//! when a handler returns a mapping that itself contains a `method` key,
//! which is sent verbatim so handlers can forward requests.

use super::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Request parameters: an ordered sequence (positional) or a mapping from
/// parameter name to value (named).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Params {
    Positional(Vec<Value>),
    Named(Map<String, Value>),
}

/// A single request envelope body.
///
/// Unknown fields (a `jsonrpc` version tag, an `id`, ...) are tolerated and
/// ignored on decode; routing metadata lives in message properties, never in
/// the body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Name of the method to invoke.
    pub method: String,

    /// Parameter values; `None` when the call carries no params.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Params>,
}

impl RpcRequest {
    /// Create a request body for `method` with the given params.
    pub fn new(method: impl Into<String>, params: Option<Params>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Render the request as a JSON value ready to be sent.
    pub fn into_value(self) -> Value {
        // Serialization of this shape cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Format a handler's return value as a response body.
///
/// A mapping containing a `method` key is passed through verbatim (the
/// handler is forwarding a request); anything else is wrapped as
/// `{ "result": value }`, with `null` standing in for "handler returned
/// nothing".
pub(crate) fn success_body(value: Value) -> Value {
    match &value {
        Value::Object(map) if map.contains_key("method") => value,
        _ => json!({ "result": value }),
    }
}

/// Format a protocol error as a response body.
pub(crate) fn error_body(err: &ProtocolError) -> Value {
    // ProtocolError serialization cannot fail.
    json!({ "error": serde_json::to_value(err).unwrap_or(Value::Null) })
}

/// Whether a response body reports at least one error.
///
/// Used to decide what to log when a notification produced a failure that
/// has nowhere to go.
pub(crate) fn has_error_item(body: &Value) -> bool {
    match body {
        Value::Object(map) => map.contains_key("error"),
        Value::Array(items) => items.iter().any(has_error_item),
        _ => false,
    }
}
