//! JSON-RPC style request/response and notification layer over
//! settlement-capable message links.
//!
//! This library overlays an RPC contract on a message-oriented transport
//! (an AMQP-style broker providing receiver/sender links, message
//! properties, and dynamic reply addresses). It provides two paired
//! components: an [`RpcServer`] that dispatches remotely invoked methods
//! bound by the host application, and an [`RpcClient`] that issues
//! request/response calls and fire-and-forget notifications.
//!
//! The transport itself is opaque to the RPC core: anything implementing
//! [`TransportClient`] works. The crate ships an in-memory reference
//! transport ([`MemoryBroker`]) for testing and local execution.
//!
//! **Note:** The `logging` feature (enabled by default) provides diagnostic
//! output via `tracing`. To disable logging, use `default-features = false`
//! in your `Cargo.toml`.
//!
//! # Quick Start
//!
//! ```no_run
//! use link_rpc::{
//!     create_memory_transport, ClientOptions, MemoryBroker, MethodDef, RpcClient, RpcServer,
//!     ServerOptions,
//! };
//! use serde_json::{json, Value};
//!
//! #[tokio::main]
//! async fn main() -> link_rpc::Result<()> {
//!     let broker = MemoryBroker::new();
//!     let transport = create_memory_transport(broker);
//!
//!     let server = RpcServer::new(transport.clone(), ServerOptions::new());
//!     server.bind(
//!         MethodDef::new("add").param_names(["a", "b"]),
//!         |args: Vec<Value>| async move {
//!             let a = args[0].as_i64().unwrap_or(0);
//!             let b = args[1].as_i64().unwrap_or(0);
//!             Ok(json!(a + b))
//!         },
//!     )?;
//!     server.listen("requests/math").await?;
//!
//!     let client = RpcClient::connect(transport, "requests/math", ClientOptions::new()).await?;
//!     let sum = client.call("add", vec![json!(2), json!(3)]).await?;
//!     println!("2 + 3 = {sum}");
//!     Ok(())
//! }
//! ```
//!
//! # Wire contract
//!
//! Requests are JSON mappings `{ "method": ..., "params": ... }` — params
//! positional or named — or batch arrays of such mappings. Responses are
//! `{ "result": V }` or `{ "error": { code, message, data? } }` with
//! JSON-RPC 2.0 error codes, correlated to their request through the
//! `correlation_id` message property and routed through `reply_to`. A
//! request carrying neither property is a notification and is never
//! answered.

#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::panic_in_result_fn
    )
)]

////////////////////////////////////////
// Submodules
////////////////////////////////////////

mod client;
mod domain;
mod error;
mod protocol;
mod server;
mod transport;
mod validator;

////////////////////////////////////////
// Public API
////////////////////////////////////////

pub use client::{CallParams, ClientInterceptor, ClientOptions, RpcClient};
pub use server::{
    // ---
    BoxFuture,
    CompletionInterceptor,
    DispatchInterceptor,
    MethodDef,
    MethodInterceptor,
    ReceiverContext,
    RpcServer,
    ServerOptions,
};

pub use error::{Error, Result};
pub use protocol::{
    // ---
    CorrelationId,
    ErrorCode,
    Params,
    ProtocolError,
    RpcRequest,
    INTERNAL_ERROR,
    INVALID_PARAMS,
    INVALID_REQUEST,
    METHOD_NOT_FOUND,
    PARSE_ERROR,
};

pub use domain::{
    // ---
    Address,
    Body,
    Delivery,
    DeliveryTag,
    Disposition,
    LinkError,
    Message,
    MessageHeader,
    MessageProperties,
    ReceiverEvent,
    ReceiverHandle,
    ReceiverLink,
    ReceiverOptions,
    ReceiverPtr,
    SenderLink,
    SenderPtr,
    TransportClient,
    TransportClientPtr,
};

////////////////////////////////////////
// Transport factory functions
////////////////////////////////////////

// In-memory reference transport. Broker-backed transports are external
// collaborators implemented against the TransportClient trait.
pub use transport::{create_memory_transport, MemoryBroker};

////////////////////////////////////////
// Internal helpers
////////////////////////////////////////

mod macros;
pub(crate) use macros::{log_debug, log_error, log_info, log_warn};
