//! Domain-level abstractions shared by the client and server layers.

mod transport;

pub use transport::{
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
