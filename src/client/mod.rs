//! RPC client implementation.
//!
//! This module contains the core [`RpcClient`] type which issues
//! request/response calls and fire-and-forget notifications over a
//! transport.
//!
//! # Architecture
//!
//! `connect()` attaches, in parallel, a response receiver — dynamic by
//! default, so the broker assigns the reply address — and a sender bound to
//! the request address. A background receive loop matches incoming
//! responses against the pending-request table by correlator.
//!
//! Each call generates a fresh correlator, sends the request with
//! `reply_to` set to the receiver's address, and installs a oneshot
//! completion *after* the send succeeds, so the table never holds an unsent
//! request. The response path and the deadline timer race through the
//! table; the first to remove the entry settles the caller exactly once.
//!
//! # Concurrency
//!
//! Any number of calls may be in flight; completions fire in response
//! order, not issue order. The pending table is behind a mutex, but
//! operations are just `HashMap` insert/remove so contention is minimal.

mod pending;

use pending::PendingRequests;

use crate::protocol::{CorrelationId, Params, ProtocolError, RpcRequest};
use crate::{
    // ---
    log_debug,
    log_error,
    log_warn,
    Address,
    Body,
    Error,
    LinkError,
    Message,
    ReceiverEvent,
    ReceiverOptions,
    Result,
    SenderPtr,
    TransportClientPtr,
};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Acquire a mutex guard, intentionally ignoring poisoning.
///
/// The protected state is the pending-response map. There are no invariants
/// spanning multiple fields and the worst outcome of continuing is a
/// dropped response, which the deadline timer already covers.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Pre-send hook: `(correlator, envelope) -> send?`.
///
/// May mutate the outgoing message. Returning `false` suppresses the send;
/// the call then stays pending until its deadline elapses.
pub type ClientInterceptor = Arc<dyn Fn(&str, &mut Message) -> bool + Send + Sync>;

/// Client configuration.
#[derive(Clone)]
pub struct ClientOptions {
    // ---
    pub(crate) response_address: Option<Address>,
    pub(crate) timeout: Duration,
    pub(crate) interceptor: Option<ClientInterceptor>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        // ---
        Self {
            response_address: None,
            timeout: Duration::from_millis(5000),
            interceptor: None,
        }
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Anchor the response receiver at a static address instead of letting
    /// the broker assign one dynamically.
    pub fn response_address(mut self, address: impl Into<Address>) -> Self {
        self.response_address = Some(address.into());
        self
    }

    /// Per-request deadline. Default 5000 ms; `Duration::ZERO` disables
    /// timeouts entirely.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Install a pre-send interceptor.
    pub fn interceptor<F>(mut self, interceptor: F) -> Self
    where
        F: Fn(&str, &mut Message) -> bool + Send + Sync + 'static,
    {
        self.interceptor = Some(Arc::new(interceptor));
        self
    }
}

/// Call parameters in one of their accepted shapes.
///
/// The `From` conversions implement the dynamic-shape rules: a JSON object
/// becomes named params, any other single value becomes a one-element
/// positional list, a `Vec<Value>` is positional as given, and `()` means
/// no params.
pub enum CallParams {
    None,
    Positional(Vec<Value>),
    Named(Map<String, Value>),
}

impl CallParams {
    fn into_params(self) -> Option<Params> {
        // ---
        match self {
            CallParams::None => None,
            CallParams::Positional(values) => Some(Params::Positional(values)),
            CallParams::Named(map) => Some(Params::Named(map)),
        }
    }
}

impl From<()> for CallParams {
    fn from(_: ()) -> Self {
        CallParams::None
    }
}

impl From<Vec<Value>> for CallParams {
    fn from(values: Vec<Value>) -> Self {
        CallParams::Positional(values)
    }
}

impl From<Map<String, Value>> for CallParams {
    fn from(map: Map<String, Value>) -> Self {
        CallParams::Named(map)
    }
}

impl From<Value> for CallParams {
    fn from(value: Value) -> Self {
        // ---
        match value {
            Value::Object(map) => CallParams::Named(map),
            other => CallParams::Positional(vec![other]),
        }
    }
}

/// Running RPC client instance.
///
/// Cheap to clone (internally `Arc`-backed). The client exclusively owns
/// its sender, its response receiver, and its pending-request table.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    sender: SenderPtr,
    reply_address: Address,
    timeout: Duration,
    interceptor: Option<ClientInterceptor>,
    pending: Mutex<PendingRequests>,

    /// Response receive loop handle; kept so the task isn't dropped while
    /// the client lives.
    _rx_task: JoinHandle<()>,
}

impl RpcClient {
    /// Connect a client: attach the response receiver and the request
    /// sender in parallel.
    ///
    /// The response receiver is dynamic unless
    /// [`ClientOptions::response_address`] anchors it; either way its
    /// attached address becomes the `reply_to` of every call.
    pub async fn connect(
        transport: TransportClientPtr,
        address: impl Into<Address>,
        options: ClientOptions,
    ) -> Result<Self> {
        // ---
        let receiver_options = if options.response_address.is_some() {
            ReceiverOptions::default()
        } else {
            ReceiverOptions::dynamic()
        };

        let (mut handle, sender) = tokio::try_join!(
            transport.create_receiver(options.response_address.clone(), receiver_options),
            transport.create_sender(Some(address.into())),
        )?;

        let reply_address = handle.address.clone();

        // The receive loop needs the pending table, which lives in Inner;
        // build the Arc cyclically so the loop holds only a weak reference
        // and exits once the last client handle is dropped.
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            // ---
            let weak = weak.clone();
            let rx_task = tokio::spawn(async move {
                while let Some(event) = handle.inbox.recv().await {
                    let Some(inner) = weak.upgrade() else {
                        break;
                    };
                    match event {
                        ReceiverEvent::Message(delivery) => {
                            Inner::handle_response(&inner, delivery.message);
                        }
                        ReceiverEvent::Error(err) => {
                            Inner::fail_pending(&inner, &err);
                        }
                    }
                }
                log_debug!("response link closed");
            });

            Inner {
                sender,
                reply_address,
                timeout: options.timeout,
                interceptor: options.interceptor,
                pending: Mutex::new(PendingRequests::new()),
                _rx_task: rx_task,
            }
        });

        Ok(Self { inner })
    }

    /// The address at which this client receives responses.
    pub fn reply_address(&self) -> &Address {
        &self.inner.reply_address
    }

    /// Invoke a method and await its result.
    ///
    /// Resolves with the response's `result`, or fails with the re-inflated
    /// [`ProtocolError`] when the response is `{ "error": ... }`, or with
    /// [`Error::Timeout`] when the deadline elapses first.
    pub async fn call(&self, method: &str, params: impl Into<CallParams>) -> Result<Value> {
        // ---
        self.call_with_timeout(method, params, self.inner.timeout)
            .await
    }

    /// Like [`call`](Self::call) with a per-request deadline override
    /// (`Duration::ZERO` disables it).
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: impl Into<CallParams>,
        timeout: Duration,
    ) -> Result<Value> {
        // ---
        let body = RpcRequest::new(method, params.into().into_params()).into_value();
        self.request(body, timeout).await
    }

    /// Send a caller-built request body verbatim.
    ///
    /// The body must be a mapping containing a `method` or a batch array.
    pub async fn call_raw(&self, body: Value) -> Result<Value> {
        // ---
        let well_formed = match &body {
            Value::Array(_) => true,
            Value::Object(map) => map.contains_key("method"),
            _ => false,
        };
        if !well_formed {
            return Err(Error::BadRequest(
                "raw request must be a mapping with a method, or a batch array".into(),
            ));
        }
        self.request(body, self.inner.timeout).await
    }

    /// Send a batch and await the ordered per-item outcomes.
    ///
    /// Each element is the corresponding item's `result` or `error` value
    /// (`null` when the item carried neither); the call itself only fails
    /// on transport problems or timeout, never on per-item errors.
    pub async fn call_batch(&self, requests: Vec<Value>) -> Result<Vec<Value>> {
        // ---
        if requests.is_empty() {
            return Err(Error::BadRequest("batch must not be empty".into()));
        }
        match self.request(Value::Array(requests), self.inner.timeout).await? {
            Value::Array(items) => Ok(items),
            other => Err(Error::InvalidResponse(other)),
        }
    }

    /// Invoke a method without expecting a reply.
    ///
    /// The message carries neither `reply_to` nor `correlation_id`, so the
    /// server treats it as a notification. Completes as soon as the send
    /// does and never carries a server outcome.
    pub async fn notify(&self, method: &str, params: impl Into<CallParams>) -> Result<()> {
        // ---
        let body = RpcRequest::new(method, params.into().into_params()).into_value();
        self.inner.sender.send(Message::value(body)).await
    }

    /// Send a caller-built notification message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadRequest`] when the message already carries a
    /// reply address: a notification must not solicit a response.
    pub async fn notify_raw(&self, message: Message) -> Result<()> {
        // ---
        if message.properties.reply_to.is_some() {
            return Err(Error::BadRequest(
                "notification must not carry a reply address".into(),
            ));
        }
        self.inner.sender.send(message).await
    }

    /// The correlation engine behind `call` and friends.
    async fn request(&self, body: Value, timeout: Duration) -> Result<Value> {
        // ---
        let correlator = CorrelationId::generate().into_string();
        let deadline = (!timeout.is_zero()).then_some(timeout);

        let mut message = Message::value(body)
            .with_reply_to(self.inner.reply_address.clone())
            .with_correlation_id(correlator.clone());
        if let Some(deadline) = deadline {
            message = message.with_ttl(deadline.as_millis() as u64);
        }

        if let Some(interceptor) = &self.inner.interceptor {
            if !interceptor(&correlator, &mut message) {
                // Send suppressed. The completion stays pending until the
                // deadline elapses — forever when timeouts are disabled.
                log_debug!("send of {correlator} suppressed by interceptor");
                return match deadline {
                    Some(deadline) => {
                        tokio::time::sleep(deadline).await;
                        Err(Error::Timeout)
                    }
                    None => std::future::pending().await,
                };
            }
        }

        let (tx, rx) = oneshot::channel();

        // Install the pending entry only after the send succeeds, so the
        // table never holds an unsent request. A send failure rejects the
        // call directly.
        self.inner.sender.send(message).await?;
        {
            let mut pending = lock_ignore_poison(&self.inner.pending);
            let timer = deadline.map(|deadline| {
                Self::spawn_deadline(Arc::downgrade(&self.inner), correlator.clone(), deadline)
            });
            pending.insert(correlator, tx, timer);
        }

        rx.await
            .map_err(|_| Error::Transport("response channel closed".into()))?
    }

    fn spawn_deadline(inner: Weak<Inner>, correlator: String, after: Duration) -> JoinHandle<()> {
        // ---
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            // Guarded by presence: a response that already settled the
            // entry wins and the timer does nothing.
            let tx = lock_ignore_poison(&inner.pending).take(&correlator);
            if let Some(tx) = tx {
                log_debug!("request {correlator} timed out");
                let _ = tx.send(Err(Error::Timeout));
            }
        })
    }
}

impl Inner {
    /// Correlation resolution for one received response message.
    fn handle_response(inner: &Arc<Inner>, message: Message) {
        // ---
        let Some(correlator) = message.properties.correlation_id else {
            log_warn!("response missing correlation-id; dropping");
            return;
        };

        let outcome = interpret_body(&message.body);
        let delivered = lock_ignore_poison(&inner.pending).complete(&correlator, outcome);
        if !delivered {
            log_warn!("invalid correlation-id: {correlator}; dropping response");
        }
    }

    /// Link failure: reject everything pending, no retry.
    fn fail_pending(inner: &Arc<Inner>, err: &LinkError) {
        // ---
        log_error!("response link failed: {err}");
        lock_ignore_poison(&inner.pending).fail_all(&err.description);
    }
}

/// Interpret a response body into the caller's completion value.
fn interpret_body(body: &Body) -> Result<Value> {
    // ---
    let value = match body {
        Body::Value(value) => value.clone(),
        Body::Text(text) => match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => return Err(Error::InvalidResponse(Value::String(text.clone()))),
        },
        Body::Empty => return Err(Error::InvalidResponse(Value::Null)),
    };

    match value {
        // Batch: per-item errors surface as list elements, not a rejection.
        Value::Array(items) => Ok(Value::Array(
            items.into_iter().map(project_batch_item).collect(),
        )),
        Value::Object(map) => {
            if let Some(result) = map.get("result") {
                Ok(result.clone())
            } else if let Some(error) = map.get("error") {
                Err(Error::Protocol(ProtocolError::from_wire(error)))
            } else {
                Err(Error::InvalidResponse(Value::Object(map)))
            }
        }
        other => Err(Error::InvalidResponse(other)),
    }
}

/// Project a batch response item onto `result`, else `error`, else `null`.
fn project_batch_item(item: Value) -> Value {
    // ---
    match item {
        Value::Object(mut map) => map
            .remove("result")
            .or_else(|| map.remove("error"))
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}
