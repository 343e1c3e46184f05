//! Transport implementations.
//!
//! This module provides concrete implementations of the domain-level
//! [`TransportClient`](crate::TransportClient) trait. The crate ships only
//! the in-memory reference transport; broker-backed transports (AMQP, MQTT,
//! ...) are external collaborators implemented against the same trait.

mod memory;

pub use memory::{create_memory_transport, MemoryBroker};
