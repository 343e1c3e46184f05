//! RPC server implementation.
//!
//! This module contains the core [`RpcServer`] type: a method registry plus
//! one dispatch pipeline per attached receiver link.
//!
//! # Architecture
//!
//! `listen()` attaches a manual-settlement receiver with credit 1 at the
//! given address, so the broker holds back further messages until the
//! current one is settled — natural per-link back-pressure. Each delivery
//! runs the pipeline: decode → global interceptor → dispatch (single or
//! batch) → validation → handler → response formatting → settlement →
//! reply.
//!
//! # Settlement policy
//!
//! Single-mode messages are accepted after handler completion; batch
//! messages are accepted before their items are dispatched. A delivery
//! without a body is returned to the broker with `undeliverable-here`. An
//! interceptor that returns `false` takes over settlement itself.
//!
//! # Failure containment
//!
//! Every failure inside dispatch — unknown method, schema violation,
//! handler error, unparseable body — is converted into a wire error
//! response (or logged, for notifications). Nothing a peer sends can
//! terminate the server.

mod registry;

pub use registry::MethodDef;
pub(crate) use registry::{BoxedHandler, MethodRegistration};

use crate::protocol::{error_body, has_error_item, success_body, ProtocolError, RpcRequest};
use crate::{
    // ---
    log_debug,
    log_error,
    log_info,
    log_warn,
    Address,
    Body,
    DeliveryTag,
    Disposition,
    Message,
    ReceiverEvent,
    ReceiverOptions,
    ReceiverPtr,
    Result,
    TransportClientPtr,
};
use registry::Registry;
use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

/// Boxed future used by the interceptor hook signatures.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Global pre-dispatch hook: `(context, decoded request) -> continue?`.
///
/// Returning `false` short-circuits the pipeline; the interceptor then owns
/// message settlement and no reply is sent. Not invoked for batch requests.
pub type DispatchInterceptor = Arc<dyn Fn(ReceiverContext, Value) -> BoxFuture<bool> + Send + Sync>;

/// Per-method pre-invocation hook: `(context, positional args) -> continue?`.
///
/// Same short-circuit semantics as the global hook. Not invoked for batch
/// requests.
pub type MethodInterceptor =
    Arc<dyn Fn(ReceiverContext, Vec<Value>) -> BoxFuture<bool> + Send + Sync>;

/// Post-dispatch, pre-reply hook: `(context, request, response) -> reply?`.
///
/// Invoked after the message is accepted; returning `false` suppresses the
/// reply.
pub type CompletionInterceptor =
    Arc<dyn Fn(ReceiverContext, Value, Value) -> BoxFuture<bool> + Send + Sync>;

/// The receiver-side context handed to interceptors.
///
/// Carries the raw message and the settlement handle for its delivery, so
/// an interceptor that short-circuits the pipeline can settle the message
/// itself (release it for another consumer, reject it, ...).
#[derive(Clone)]
pub struct ReceiverContext {
    receiver: ReceiverPtr,
    tag: DeliveryTag,
    message: Message,
}

impl ReceiverContext {
    /// The raw message under dispatch.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Settle the message with the given disposition.
    pub async fn settle(&self, disposition: Disposition) -> Result<()> {
        self.receiver.settle(self.tag, disposition).await
    }
}

/// Server configuration.
#[derive(Clone, Default)]
pub struct ServerOptions {
    // ---
    pub(crate) interceptor: Option<DispatchInterceptor>,
    pub(crate) completion_interceptor: Option<CompletionInterceptor>,
    pub(crate) ignore_unknown_methods: bool,
}

impl ServerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a global pre-dispatch interceptor.
    pub fn interceptor<F, Fut>(mut self, interceptor: F) -> Self
    where
        F: Fn(ReceiverContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.interceptor = Some(Arc::new(move |ctx, request| {
            Box::pin(interceptor(ctx, request))
        }));
        self
    }

    /// Install a post-dispatch, pre-reply interceptor.
    pub fn completion_interceptor<F, Fut>(mut self, interceptor: F) -> Self
    where
        F: Fn(ReceiverContext, Value, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.completion_interceptor = Some(Arc::new(move |ctx, request, response| {
            Box::pin(interceptor(ctx, request, response))
        }));
        self
    }

    /// Suppress MethodNotFound replies instead of sending them.
    ///
    /// Useful on shared queues where several servers partition the method
    /// namespace: the server that doesn't know a method stays silent and
    /// lets another one answer.
    pub fn ignore_unknown_methods(mut self, ignore: bool) -> Self {
        self.ignore_unknown_methods = ignore;
        self
    }
}

/// Running RPC server instance.
///
/// Cheap to clone (internally `Arc`-backed). The server exclusively owns
/// its receiver links and its method registry; reply senders are created
/// per response and released after the send.
#[derive(Clone)]
pub struct RpcServer {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    transport: TransportClientPtr,
    registry: Registry,
    options: ServerOptions,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

/// Acquire a mutex guard, intentionally ignoring poisoning.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl RpcServer {
    /// Create a server over the given transport.
    pub fn new(transport: TransportClientPtr, options: ServerOptions) -> Self {
        // ---
        Self {
            inner: Arc::new(Inner {
                transport,
                registry: Registry::new(),
                options,
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a handler.
    ///
    /// The definition carries the method name, its declared parameter
    /// names, and optionally a params schema and a per-method interceptor.
    /// A bare `&str` binds a method with no declared parameters.
    ///
    /// Handlers receive their arguments positionally in declared order —
    /// callers may supply them positionally or by name. A handler failure
    /// becomes a wire error: [`crate::Error::Protocol`] passes through
    /// verbatim, anything else is reported as InternalError (-32603).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidMethodName`] for an empty name,
    /// [`crate::Error::DuplicateMethod`] for a re-bind, and
    /// [`crate::Error::InvalidMethodDefinition`] /
    /// [`crate::Error::InvalidValidationDefinition`] for a bad schema.
    pub fn bind<F, Fut>(&self, def: impl Into<MethodDef>, handler: F) -> Result<()>
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        // ---
        let handler: BoxedHandler = Arc::new(move |args| Box::pin(handler(args)));
        self.inner.registry.bind(def.into(), handler)
    }

    /// Attach a receiver link at `address` and start dispatching.
    ///
    /// The link uses manual settlement with credit 1: the broker delivers
    /// one unsettled message at a time, so per-link processing is
    /// serialized in arrival order. Call `listen` again to serve further
    /// addresses.
    pub async fn listen(&self, address: impl Into<Address>) -> Result<()> {
        // ---
        let address = address.into();
        let mut handle = self
            .inner
            .transport
            .create_receiver(Some(address.clone()), ReceiverOptions::manual(1))
            .await?;

        log_info!("listening on {address}");

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            while let Some(event) = handle.inbox.recv().await {
                match event {
                    ReceiverEvent::Message(delivery) => {
                        let ctx = ReceiverContext {
                            receiver: Arc::clone(&handle.link),
                            tag: delivery.tag,
                            message: delivery.message,
                        };
                        tokio::spawn(dispatch(Arc::clone(&inner), ctx));
                    }
                    ReceiverEvent::Error(err) => {
                        log_error!("receiver link on {address} failed: {err}");
                    }
                }
            }
            log_debug!("receiver link on {address} closed");
        });

        lock_ignore_poison(&self.inner.listeners).push(task);
        Ok(())
    }

    /// Detach all receiver links.
    pub async fn shutdown(&self) {
        // ---
        let tasks = {
            let mut listeners = lock_ignore_poison(&self.inner.listeners);
            std::mem::take(&mut *listeners)
        };
        for task in tasks {
            task.abort();
        }
    }
}

/// Outcome of resolving one request object against the registry.
enum Resolution {
    /// Handler found and params validated; ready to invoke.
    Ready {
        registration: Arc<MethodRegistration>,
        args: Vec<Value>,
    },

    /// No such method; carries the formatted error body.
    UnknownMethod(Value),

    /// Malformed request or failed validation; carries the formatted error
    /// body.
    Invalid(Value),
}

/// Outcome of single-mode processing.
enum SingleOutcome {
    Reply(Value),

    /// An interceptor returned `false`; it owns settlement, no reply.
    Suppressed,

    /// Unknown method with `ignore_unknown_methods` set; consume silently.
    Ignored,
}

/// The per-message dispatch pipeline.
async fn dispatch(inner: Arc<Inner>, ctx: ReceiverContext) {
    // A delivery without a body cannot be dispatched or answered; hand it
    // back to the broker.
    if ctx.message().body.is_empty() {
        if let Err(err) = ctx
            .settle(Disposition::Modify {
                undeliverable_here: true,
            })
            .await
        {
            log_error!("failed to return bodyless message: {err}");
        }
        return;
    }

    let request = match decode_body(&ctx.message().body) {
        Ok(value) => value,
        Err(original) => {
            let response = error_body(&ProtocolError::parse_error(Value::String(original)));
            reply(&inner, &ctx, response).await;
            settle_accept(&ctx).await;
            return;
        }
    };

    // Global interceptor; batch requests bypass it.
    if !request.is_array() {
        if let Some(interceptor) = &inner.options.interceptor {
            if !interceptor(ctx.clone(), request.clone()).await {
                return;
            }
        }
    }

    let response = match &request {
        Value::Array(items) => {
            // Batch: accept up front, then run items sequentially in
            // declared order. Per-item failures stay in their slot.
            settle_accept(&ctx).await;
            if items.is_empty() {
                error_body(&ProtocolError::invalid_request(json!({
                    "source": source_value(&ctx, &request)
                })))
            } else {
                let mut responses = Vec::with_capacity(items.len());
                for item in items {
                    responses.push(process_batch_item(&inner, &ctx, item).await);
                }
                Value::Array(responses)
            }
        }
        single => match process_single(&inner, &ctx, single).await {
            SingleOutcome::Suppressed => return,
            SingleOutcome::Ignored => {
                settle_accept(&ctx).await;
                log_debug!("ignoring request for unknown method");
                return;
            }
            SingleOutcome::Reply(body) => {
                settle_accept(&ctx).await;
                body
            }
        },
    };

    if let Some(interceptor) = &inner.options.completion_interceptor {
        if !interceptor(ctx.clone(), request.clone(), response.clone()).await {
            return;
        }
    }

    reply(&inner, &ctx, response).await;
}

/// Single-mode item processing, interceptors included.
async fn process_single(inner: &Inner, ctx: &ReceiverContext, item: &Value) -> SingleOutcome {
    // ---
    match resolve_item(inner, ctx, item) {
        Resolution::Invalid(body) => SingleOutcome::Reply(body),
        Resolution::UnknownMethod(body) => {
            if inner.options.ignore_unknown_methods {
                SingleOutcome::Ignored
            } else {
                SingleOutcome::Reply(body)
            }
        }
        Resolution::Ready { registration, args } => {
            if let Some(interceptor) = &registration.interceptor {
                if !interceptor(ctx.clone(), args.clone()).await {
                    return SingleOutcome::Suppressed;
                }
            }
            SingleOutcome::Reply(invoke(&registration, args).await)
        }
    }
}

/// Batch item processing: no interceptors, no unknown-method suppression,
/// so every item yields a response body and the array stays aligned with
/// the request.
async fn process_batch_item(inner: &Inner, ctx: &ReceiverContext, item: &Value) -> Value {
    // ---
    match resolve_item(inner, ctx, item) {
        Resolution::Invalid(body) | Resolution::UnknownMethod(body) => body,
        Resolution::Ready { registration, args } => invoke(&registration, args).await,
    }
}

/// Resolve one request object: parse, look up the handler, validate params.
fn resolve_item(inner: &Inner, ctx: &ReceiverContext, item: &Value) -> Resolution {
    // ---
    let parsed: RpcRequest = match serde_json::from_value(item.clone()) {
        Ok(parsed) => parsed,
        Err(_) => {
            return Resolution::Invalid(error_body(&ProtocolError::invalid_request(json!({
                "source": source_value(ctx, item)
            }))));
        }
    };

    let Some(registration) = inner.registry.get(&parsed.method) else {
        return Resolution::UnknownMethod(error_body(&ProtocolError::method_not_found(
            &parsed.method,
            json!({ "source": source_value(ctx, item) }),
        )));
    };

    if let Some(validator) = &registration.validator {
        let mut named = registration.named_params(parsed.params.as_ref());
        if let Err(messages) = validator.validate(&mut named) {
            return Resolution::Invalid(error_body(&ProtocolError::invalid_params(json!({
                "messages": messages,
                "source": source_value(ctx, item),
            }))));
        }
        // The validator coerces in place; handlers see the coerced values.
        let args = registration.positional_args_from_named(&named);
        return Resolution::Ready { registration, args };
    }

    let args = registration.positional_args(parsed.params.as_ref());
    Resolution::Ready { registration, args }
}

/// Invoke the handler and format its outcome as a response body.
async fn invoke(registration: &MethodRegistration, args: Vec<Value>) -> Value {
    // ---
    match (registration.handler)(args).await {
        Ok(value) => success_body(value),
        Err(err) => error_body(&err.into_protocol()),
    }
}

/// The `{ replyTo, request }` context attached to error responses.
fn source_value(ctx: &ReceiverContext, request: &Value) -> Value {
    // ---
    let reply_to = match &ctx.message().properties.reply_to {
        Some(address) => Value::String(address.0.to_string()),
        None => Value::Null,
    };
    json!({ "replyTo": reply_to, "request": request })
}

fn decode_body(body: &Body) -> std::result::Result<Value, String> {
    // ---
    match body {
        Body::Value(value) => Ok(value.clone()),
        Body::Text(text) => serde_json::from_str(text).map_err(|_| text.clone()),
        Body::Empty => Ok(Value::Null),
    }
}

async fn settle_accept(ctx: &ReceiverContext) {
    // ---
    if let Err(err) = ctx.settle(Disposition::Accept).await {
        log_error!("failed to accept message: {err}");
    }
}

/// Send the response back to the requester.
///
/// A request carrying neither `reply_to` nor `correlation_id` is a
/// notification: no response message is ever sent for it, and failures are
/// only logged. The reply sender is created per response and released once
/// the send completes.
async fn reply(inner: &Inner, ctx: &ReceiverContext, body: Value) {
    // ---
    let properties = &ctx.message().properties;
    if properties.reply_to.is_none() && properties.correlation_id.is_none() {
        if has_error_item(&body) {
            log_warn!("dropping error response to notification: {body}");
        }
        return;
    }

    let sender = match inner.transport.create_sender(properties.reply_to.clone()).await {
        Ok(sender) => sender,
        Err(err) => {
            log_error!("failed to create reply sender: {err}");
            return;
        }
    };

    let mut message = Message::value(body);
    if let Some(correlation_id) = &properties.correlation_id {
        message = message.with_correlation_id(correlation_id.clone());
    }
    if let Err(err) = sender.send(message).await {
        log_error!("failed to send reply: {err}");
    }
}
