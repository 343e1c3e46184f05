//! In-memory transport implementation.
//!
//! This module provides a pure in-process implementation of the domain-level
//! [`TransportClient`] trait. It is intended primarily for testing, local
//! execution, and as a reference for transport semantics.
//!
//! ## Reference Semantics
//!
//! The in-memory broker defines the **reference behavior** the RPC core is
//! written against. Broker-backed transports are expected to approximate it
//! as closely as their underlying systems allow:
//!
//! - Queues come into existence on first attach or first publish, and buffer
//!   messages that no consumer can take yet.
//! - A manual-settlement consumer holds at most `credit` unsettled
//!   deliveries; settling one releases capacity and triggers redelivery of
//!   buffered messages. `Release` returns the message to the front of the
//!   queue; `Accept`, `Reject`, and `Modify` drop it.
//! - Auto-settling consumers receive messages as they arrive.
//! - Dynamic receivers are attached at broker-assigned `dynamic/{n}`
//!   addresses.
//!
//! ## Non-Goals
//!
//! Persistence, TTL-based expiry (the header hint is ignored), competing
//! cross-process consumers, or emulation of any specific broker's failure
//! modes.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::{
    // ---
    log_debug,
    Address,
    Delivery,
    DeliveryTag,
    Disposition,
    Error,
    LinkError,
    Message,
    ReceiverEvent,
    ReceiverHandle,
    ReceiverLink,
    ReceiverOptions,
    Result,
    SenderLink,
    SenderPtr,
    TransportClient,
    TransportClientPtr,
};

/// Acquire a mutex guard, intentionally ignoring poisoning.
///
/// The broker state has no invariants that survive a panic mid-update worse
/// than a dropped message, which matches the best-effort delivery contract.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct Consumer {
    // ---
    id: u64,
    tx: mpsc::UnboundedSender<ReceiverEvent>,
    manual: bool,
    credit: u32,
    in_flight: u32,
}

#[derive(Default)]
struct Queue {
    // ---
    backlog: VecDeque<Message>,
    consumers: Vec<Consumer>,
}

struct Unsettled {
    // ---
    queue: Address,
    consumer: u64,
    message: Message,
}

#[derive(Default)]
struct BrokerState {
    // ---
    queues: HashMap<Address, Queue>,
    unsettled: HashMap<DeliveryTag, Unsettled>,
    next_tag: DeliveryTag,
    next_consumer: u64,
    next_dynamic: u64,
}

/// Shared in-process message broker.
///
/// Simulates an AMQP-style broker within a single process. All transports
/// created over the same broker can reach each other's queues, exactly as
/// nodes connected to a real broker would.
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
}

impl MemoryBroker {
    /// Create a new, empty broker.
    pub fn new() -> Arc<Self> {
        // ---
        Arc::new(Self {
            state: Mutex::new(BrokerState::default()),
        })
    }

    /// Number of messages buffered on `address` with no consumer holding
    /// them.
    ///
    /// Exposed for this crate's own tests; not part of the transport
    /// contract.
    pub fn queue_depth(&self, address: &Address) -> usize {
        // ---
        let state = lock_ignore_poison(&self.state);
        state
            .queues
            .get(address)
            .map(|queue| queue.backlog.len())
            .unwrap_or(0)
    }

    /// Emit a link error to every consumer attached at `address`.
    ///
    /// Exposed for this crate's own tests; real brokers raise these when a
    /// link or connection fails.
    pub fn inject_link_error(&self, address: &Address, description: &str) {
        // ---
        let state = lock_ignore_poison(&self.state);
        if let Some(queue) = state.queues.get(address) {
            for consumer in &queue.consumers {
                let _ = consumer.tx.send(ReceiverEvent::Error(LinkError {
                    description: description.to_string(),
                }));
            }
        }
    }

    fn publish(&self, address: &Address, message: Message) {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        state
            .queues
            .entry(address.clone())
            .or_default()
            .backlog
            .push_back(message);
        Self::pump(&mut state, address);
    }

    /// Deliver buffered messages to consumers with capacity.
    ///
    /// A manual consumer's capacity is `credit - in_flight`; auto-settling
    /// consumers always have capacity.
    fn pump(state: &mut BrokerState, address: &Address) {
        // ---
        let BrokerState {
            queues,
            unsettled,
            next_tag,
            ..
        } = state;

        let Some(queue) = queues.get_mut(address) else {
            return;
        };
        queue.consumers.retain(|c| !c.tx.is_closed());

        loop {
            if queue.backlog.is_empty() {
                return;
            }
            let Some(index) = queue
                .consumers
                .iter()
                .position(|c| !c.manual || c.in_flight < c.credit)
            else {
                return;
            };
            let Some(message) = queue.backlog.pop_front() else {
                return;
            };

            *next_tag += 1;
            let tag = *next_tag;
            let consumer = &mut queue.consumers[index];

            let delivery = Delivery {
                message: message.clone(),
                tag,
            };
            if consumer.tx.send(ReceiverEvent::Message(delivery)).is_err() {
                // Handle dropped between retain and send; requeue and move on.
                queue.consumers.remove(index);
                queue.backlog.push_front(message);
                continue;
            }
            if consumer.manual {
                consumer.in_flight += 1;
                unsettled.insert(
                    tag,
                    Unsettled {
                        queue: address.clone(),
                        consumer: consumer.id,
                        message,
                    },
                );
            }
        }
    }

    fn settle(&self, tag: DeliveryTag, disposition: Disposition) -> Result<()> {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        let Some(entry) = state.unsettled.remove(&tag) else {
            return Err(Error::Transport(format!(
                "settle of unknown delivery tag {tag}"
            )));
        };

        if let Some(queue) = state.queues.get_mut(&entry.queue) {
            if let Some(consumer) = queue
                .consumers
                .iter_mut()
                .find(|c| c.id == entry.consumer)
            {
                consumer.in_flight = consumer.in_flight.saturating_sub(1);
            }
            match disposition {
                Disposition::Release => queue.backlog.push_front(entry.message),
                Disposition::Accept | Disposition::Reject => {}
                Disposition::Modify {
                    undeliverable_here: _undeliverable,
                } => {
                    log_debug!(
                        "dropping modified message on {} (undeliverable_here={_undeliverable})",
                        entry.queue
                    );
                }
            }
        }

        Self::pump(&mut state, &entry.queue);
        Ok(())
    }

    fn attach_receiver(
        broker: &Arc<Self>,
        address: Option<Address>,
        options: ReceiverOptions,
    ) -> Result<ReceiverHandle> {
        // ---
        let mut state = lock_ignore_poison(&broker.state);

        let address = match (address, options.dynamic) {
            (None, true) => {
                state.next_dynamic += 1;
                Address::from(format!("dynamic/{}", state.next_dynamic))
            }
            (Some(address), false) => address,
            (Some(_), true) => {
                return Err(Error::Transport(
                    "dynamic receiver must not name an address".into(),
                ))
            }
            (None, false) => {
                return Err(Error::Transport(
                    "receiver requires an address unless dynamic".into(),
                ))
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        state.next_consumer += 1;
        let consumer = Consumer {
            id: state.next_consumer,
            tx,
            manual: options.manual_settlement,
            credit: options.credit.max(1),
            in_flight: 0,
        };
        state
            .queues
            .entry(address.clone())
            .or_default()
            .consumers
            .push(consumer);

        // Deliver anything already buffered.
        Self::pump(&mut state, &address);
        drop(state);

        log_debug!("attached receiver at {address}");
        Ok(ReceiverHandle {
            address,
            inbox: rx,
            link: Arc::new(MemoryReceiverLink {
                broker: Arc::clone(broker),
            }),
        })
    }
}

struct MemoryReceiverLink {
    // ---
    broker: Arc<MemoryBroker>,
}

#[async_trait::async_trait]
impl ReceiverLink for MemoryReceiverLink {
    async fn settle(&self, tag: DeliveryTag, disposition: Disposition) -> Result<()> {
        // ---
        self.broker.settle(tag, disposition)
    }
}

struct MemorySender {
    // ---
    broker: Arc<MemoryBroker>,
    address: Address,
}

#[async_trait::async_trait]
impl SenderLink for MemorySender {
    async fn send(&self, message: Message) -> Result<()> {
        // ---
        self.broker.publish(&self.address, message);
        Ok(())
    }
}

/// In-memory transport client over a shared [`MemoryBroker`].
struct MemoryTransport {
    // ---
    broker: Arc<MemoryBroker>,
}

#[async_trait::async_trait]
impl TransportClient for MemoryTransport {
    // ---
    async fn create_receiver(
        &self,
        address: Option<Address>,
        options: ReceiverOptions,
    ) -> Result<ReceiverHandle> {
        MemoryBroker::attach_receiver(&self.broker, address, options)
    }

    async fn create_sender(&self, address: Option<Address>) -> Result<SenderPtr> {
        // ---
        let Some(address) = address else {
            return Err(Error::Transport(
                "in-memory broker has no default node".into(),
            ));
        };
        Ok(Arc::new(MemorySender {
            broker: Arc::clone(&self.broker),
            address,
        }))
    }
}

/// Create an in-memory transport client attached to the given broker.
///
/// Multiple transports sharing one broker can reach each other's queues;
/// construct one broker per test for isolation.
pub fn create_memory_transport(broker: Arc<MemoryBroker>) -> TransportClientPtr {
    // ---
    Arc::new(MemoryTransport { broker })
}
