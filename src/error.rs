use crate::protocol::ProtocolError;
use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced locally by the RPC layer.
///
/// Protocol errors that cross the wire are carried by
/// [`ProtocolError`](crate::ProtocolError); everything here is raised to the
/// embedder without ever being serialized into a response body. The
/// [`Protocol`](Error::Protocol) variant is the bridge: a wire error received
/// by the client is re-inflated into it, and a handler may return it to put a
/// specific code on the wire.
#[derive(Debug, Error)]
pub enum Error {
    /// A request timed out while waiting for a response.
    #[error("request timed out")]
    Timeout,

    /// A method name was bound twice on the same server.
    ///
    /// The contained `String` is the offending method name. The first
    /// registration stays in effect.
    #[error("method already bound: {0}")]
    DuplicateMethod(String),

    /// A binding was attempted with an empty method name.
    #[error("method name must not be empty")]
    InvalidMethodName,

    /// A method definition was malformed (e.g. the params schema is not a
    /// JSON object).
    #[error("invalid method definition: {0}")]
    InvalidMethodDefinition(String),

    /// A params schema was rejected at bind time.
    ///
    /// Schemas must be object-typed and may only constrain declared
    /// parameter names.
    #[error("invalid validation definition: {0}")]
    InvalidValidationDefinition(String),

    /// A locally rejected request, before anything was sent.
    ///
    /// Raised e.g. for `notify` with a reply address, or a raw envelope
    /// without a `method`.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The server answered with a protocol error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A response was received but could not be interpreted as a valid RPC
    /// response. Carries the raw body.
    #[error("invalid response")]
    InvalidResponse(serde_json::Value),

    /// The response link failed; all pending requests are rejected with
    /// this error.
    #[error("link error: {0}")]
    Link(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A transport-level failure that does not map to a more specific
    /// variant.
    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    /// Convert a handler failure into the wire error it is reported as.
    ///
    /// An [`Error::Protocol`] passes through with its code, message, and
    /// data intact; any other failure becomes InternalError (-32603) with
    /// the rendered error in `data`.
    pub(crate) fn into_protocol(self) -> ProtocolError {
        match self {
            Error::Protocol(e) => e,
            other => ProtocolError::internal_error(serde_json::Value::String(other.to_string())),
        }
    }
}
