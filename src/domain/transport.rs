// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! This module defines the transport interface the RPC core is written
//! against. It intentionally avoids any reference to concrete protocols,
//! brokers, or client libraries: the transport is an external collaborator
//! that provides settlement-capable receiver and sender links, message
//! properties, and dynamic reply addresses.
//!
//! The transport layer is responsible only for delivering messages and
//! reporting link failures. Higher-level semantics — correlation, timeouts,
//! dispatch, validation — are handled by the client and server layers.
//!
//! The in-memory reference implementation lives under `src/transport/`.

use crate::Result;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A transport address.
///
/// An `Address` names a destination to which messages may be sent and from
/// which a receiver link consumes. Its interpretation is transport-specific
/// (queue name, routing key, topic); the RPC core treats it as an opaque
/// identifier.
///
/// Addresses are immutable, cheap to clone, and safe to share across
/// threads.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address(pub Arc<str>);

impl<T> From<T> for Address
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        Address(value.into())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message body as delivered by the transport.
///
/// Brokers may deliver bodies either as raw text (to be JSON-parsed by the
/// server) or as already-decoded structured values. An absent body is
/// distinct from an empty one and marks a malformed delivery.
#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    /// No body section at all.
    Empty,

    /// A string-encoded body; the RPC layer parses it as JSON.
    Text(String),

    /// A structured body already decoded by the transport.
    Value(Value),
}

impl Body {
    /// Whether the delivery carried no body section.
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }
}

/// Routing metadata carried next to the body.
///
/// A request with neither `reply_to` nor `correlation_id` is a
/// notification: the server must not send a response for it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessageProperties {
    /// Address at which the sender expects the response.
    pub reply_to: Option<Address>,

    /// Correlator echoed back on the response.
    pub correlation_id: Option<String>,
}

/// Transport-level header hints.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MessageHeader {
    /// Suggested message expiry in milliseconds. Transports may use it to
    /// drop requests nobody is waiting for anymore.
    pub ttl: Option<u64>,
}

/// The unit of transport between links.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub body: Body,
    pub properties: MessageProperties,
    pub header: MessageHeader,
}

impl Message {
    /// Create a message with the given body and no routing metadata.
    pub fn new(body: Body) -> Self {
        // ---
        Self {
            body,
            properties: MessageProperties::default(),
            header: MessageHeader::default(),
        }
    }

    /// Create a message carrying a structured JSON body.
    pub fn value(body: Value) -> Self {
        Self::new(Body::Value(body))
    }

    /// Set the response address.
    pub fn with_reply_to(mut self, address: Address) -> Self {
        self.properties.reply_to = Some(address);
        self
    }

    /// Set the correlation identifier.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.properties.correlation_id = Some(id.into());
        self
    }

    /// Set the expiry hint, in milliseconds.
    pub fn with_ttl(mut self, ttl_ms: u64) -> Self {
        self.header.ttl = Some(ttl_ms);
        self
    }
}

/// Opaque per-delivery identifier used to settle a message.
pub type DeliveryTag = u64;

/// Terminal disposition of a received message, signaled to the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// The message was consumed; remove it from the queue.
    Accept,

    /// Return the message to the queue for redelivery.
    Release,

    /// The message is unprocessable; discard it.
    Reject,

    /// The message could not be handled here; the broker may route it
    /// elsewhere or discard it.
    Modify {
        /// Hint that this consumer can never process the message.
        undeliverable_here: bool,
    },
}

/// A received message plus the tag needed to settle it.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub message: Message,
    pub tag: DeliveryTag,
}

/// A link-level failure reported on a receiver's event stream.
///
/// The client rejects all pending requests when its response link fails;
/// no retry is attempted.
#[derive(Clone, Debug, PartialEq)]
pub struct LinkError {
    pub description: String,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

/// An event on a receiver link's stream.
#[derive(Clone, Debug)]
pub enum ReceiverEvent {
    /// A message was delivered.
    Message(Delivery),

    /// The link failed.
    Error(LinkError),
}

/// Options for attaching a receiver link.
#[derive(Clone, Copy, Debug)]
pub struct ReceiverOptions {
    /// Let the broker assign the source address at attach time. The
    /// assigned address is reported on [`ReceiverHandle::address`].
    pub dynamic: bool,

    /// Deliveries stay unsettled until [`ReceiverLink::settle`] is called.
    /// When `false`, the transport settles on delivery.
    pub manual_settlement: bool,

    /// Maximum number of unsettled messages in flight on this link.
    /// Ignored for auto-settling links.
    pub credit: u32,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        // ---
        Self {
            dynamic: false,
            manual_settlement: false,
            credit: 16,
        }
    }
}

impl ReceiverOptions {
    /// Options for a dynamic, auto-settling receiver (client reply links).
    pub fn dynamic() -> Self {
        Self {
            dynamic: true,
            ..Self::default()
        }
    }

    /// Options for a manual-settlement receiver with the given credit
    /// (server request links use credit 1 for per-link back-pressure).
    pub fn manual(credit: u32) -> Self {
        Self {
            dynamic: false,
            manual_settlement: true,
            credit,
        }
    }
}

/// Settlement half of an attached receiver link.
#[async_trait::async_trait]
pub trait ReceiverLink: Send + Sync {
    /// Settle the delivery identified by `tag` with the given disposition.
    async fn settle(&self, tag: DeliveryTag, disposition: Disposition) -> Result<()>;
}

/// An attached sender link.
#[async_trait::async_trait]
pub trait SenderLink: Send + Sync {
    /// Send a message to the link's target.
    async fn send(&self, message: Message) -> Result<()>;
}

/// Handle returned from a successful receiver attach.
///
/// The link remains attached until the handle is dropped or the transport
/// is closed. Dropping the handle detaches the link; messages already
/// queued behind it stay with the broker.
pub struct ReceiverHandle {
    /// The source address of the link; broker-assigned when the link was
    /// attached dynamically.
    pub address: Address,

    /// Stream of deliveries and link errors.
    pub inbox: mpsc::UnboundedReceiver<ReceiverEvent>,

    /// Settlement handle, shareable across tasks.
    pub link: ReceiverPtr,
}

/// Transport client abstraction.
///
/// A `TransportClient` attaches receiver and sender links on some
/// message-oriented transport. The RPC core makes no assumptions beyond
/// the documented semantics:
///
/// - Once `create_receiver()` returns, matching messages published
///   afterwards are deliverable on the handle's inbox.
/// - A manual-settlement receiver is delivered at most `credit` unsettled
///   messages at a time, in arrival order.
/// - `create_sender(None)` addresses the broker's default node; transports
///   without one return an error.
#[async_trait::async_trait]
pub trait TransportClient: Send + Sync {
    /// Attach a receiver link.
    ///
    /// `address` must be `None` when `options.dynamic` is set, and names
    /// the source otherwise.
    async fn create_receiver(
        &self,
        address: Option<Address>,
        options: ReceiverOptions,
    ) -> Result<ReceiverHandle>;

    /// Attach a sender link to `address`, or to the broker's default node
    /// when `address` is `None`.
    async fn create_sender(&self, address: Option<Address>) -> Result<SenderPtr>;
}

/// Shared transport pointer.
///
/// This is an `Arc<dyn TransportClient>`: `.clone()` is cheap and all
/// clones share the same underlying connection.
pub type TransportClientPtr = Arc<dyn TransportClient>;

/// Shared receiver settlement pointer.
pub type ReceiverPtr = Arc<dyn ReceiverLink>;

/// Shared sender pointer.
pub type SenderPtr = Arc<dyn SenderLink>;
