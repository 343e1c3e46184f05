//! Wire-level protocol types.
//!
//! This module defines the JSON-RPC 2.0 compatible message contract shared by
//! [`RpcServer`](crate::RpcServer) and [`RpcClient`](crate::RpcClient):
//! request envelopes, response body shapes, protocol error codes, and the
//! correlation identifiers that tie responses back to requests.
//!
//! Everything here is transport-free; routing metadata (reply addresses,
//! correlation properties) travels in [`Message`](crate::Message) properties,
//! not in the body.

mod correlation;
mod error;
mod message;

pub use correlation::CorrelationId;
pub use error::{
    // ---
    ErrorCode,
    ProtocolError,
    INTERNAL_ERROR,
    INVALID_PARAMS,
    INVALID_REQUEST,
    METHOD_NOT_FOUND,
    PARSE_ERROR,
};
pub use message::{Params, RpcRequest};

pub(crate) use message::{error_body, has_error_item, success_body};
