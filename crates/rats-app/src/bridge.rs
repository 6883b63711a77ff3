//! Message bridge between the UI side and backend components
//!
//! Operations are registered by name. A call may carry a correlation token;
//! the handler then receives a [`Reply`] and answers out of band, in any
//! order relative to other calls.
//!
//! Wire shapes (JSON arrays):
//!
//! ```text
//! call   ["operation", [arg, ..., {"callback": token}]]
//! reply  ["callback", token, result]
//! event  ["event", payload, ...]
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use rats_core::prelude::*;

/// Key of the trailing argument object that carries a correlation token
pub const CALLBACK_KEY: &str = "callback";

/// Channel name every reply is sent on
pub const REPLY_CHANNEL: &str = "callback";

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

/// Caller-chosen token that pairs a reply with its call.
///
/// Opaque: any truthy JSON value is a token. Two tokens are the same when
/// their compact JSON forms are equal, and a reply echoes the value exactly
/// as the caller sent it.
#[derive(Debug, Clone)]
pub struct CorrelationToken {
    value: Value,
    /// Compact JSON of `value`; identity for equality and hashing
    key: String,
}

impl CorrelationToken {
    fn new(value: Value) -> Self {
        let key = value.to_string();
        Self { value, key }
    }

    /// Token carried by a wire value. Falsy values (`null`, `false`, `0`,
    /// `""`) carry none.
    pub fn from_value(value: &Value) -> Option<Self> {
        is_truthy(value).then(|| Self::new(value.clone()))
    }

    pub fn to_value(&self) -> Value {
        self.value.clone()
    }

    pub fn as_value(&self) -> &Value {
        &self.value
    }
}

/// JSON values a JavaScript caller would treat as true
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

impl PartialEq for CorrelationToken {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for CorrelationToken {}

impl Hash for CorrelationToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Value::String(s) => f.write_str(s),
            _ => f.write_str(&self.key),
        }
    }
}

impl From<&str> for CorrelationToken {
    fn from(s: &str) -> Self {
        Self::new(Value::from(s))
    }
}

impl From<String> for CorrelationToken {
    fn from(s: String) -> Self {
        Self::new(Value::from(s))
    }
}

impl From<u64> for CorrelationToken {
    fn from(n: u64) -> Self {
        Self::new(Value::from(n))
    }
}

/// A named operation invocation
#[derive(Debug, Clone, PartialEq)]
pub struct CallEnvelope {
    pub operation: String,
    /// Present when the caller expects a reply
    pub correlation: Option<CorrelationToken>,
    pub args: Vec<Value>,
}

impl CallEnvelope {
    pub fn new(operation: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            operation: operation.into(),
            correlation: None,
            args,
        }
    }

    pub fn with_correlation(mut self, token: impl Into<CorrelationToken>) -> Self {
        self.correlation = Some(token.into());
        self
    }

    pub fn expects_reply(&self) -> bool {
        self.correlation.is_some()
    }

    /// Convert the legacy wire shape `["operation", [args...]]`.
    ///
    /// A trailing object argument with a truthy `callback` field is removed
    /// from the arguments and becomes the correlation token. A non-array
    /// argument value is treated as a single argument.
    pub fn from_wire(value: Value) -> Result<Self> {
        let Value::Array(mut items) = value else {
            return Err(Error::protocol("call must be a JSON array"));
        };
        if items.is_empty() || items.len() > 2 {
            return Err(Error::protocol(format!(
                "call must be [operation, args], got {} element(s)",
                items.len()
            )));
        }

        let raw_args = if items.len() == 2 { items.pop() } else { None };
        let operation = match items.pop() {
            Some(Value::String(name)) if !name.is_empty() => name,
            _ => return Err(Error::protocol("operation name must be a non-empty string")),
        };

        let mut args = match raw_args {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(args)) => args,
            Some(other) => vec![other],
        };

        let correlation = match args.last() {
            Some(Value::Object(map)) => map.get(CALLBACK_KEY).and_then(CorrelationToken::from_value),
            _ => None,
        };
        if correlation.is_some() {
            args.pop();
        }

        Ok(Self {
            operation,
            correlation,
            args,
        })
    }

    /// Parse one JSON line of the wire format
    pub fn parse_line(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)?;
        Self::from_wire(value)
    }

    /// Render back into the legacy wire shape
    pub fn to_wire(&self) -> Value {
        let mut args = self.args.clone();
        if let Some(token) = &self.correlation {
            let mut map = serde_json::Map::new();
            map.insert(CALLBACK_KEY.to_string(), token.to_value());
            args.push(Value::Object(map));
        }
        Value::Array(vec![Value::from(self.operation.as_str()), Value::Array(args)])
    }
}

/// Messages sent from the backend to the UI side
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Reply {
        token: CorrelationToken,
        result: Value,
    },
    Event {
        name: String,
        payload: Vec<Value>,
    },
}

impl Outgoing {
    pub fn to_wire(&self) -> Value {
        match self {
            Outgoing::Reply { token, result } => Value::Array(vec![
                Value::from(REPLY_CHANNEL),
                token.to_value(),
                result.clone(),
            ]),
            Outgoing::Event { name, payload } => {
                let mut items = Vec::with_capacity(payload.len() + 1);
                items.push(Value::from(name.as_str()));
                items.extend(payload.iter().cloned());
                Value::Array(items)
            }
        }
    }

    /// Parse a message as seen by the UI side
    pub fn from_wire(value: Value) -> Result<Self> {
        let Value::Array(items) = value else {
            return Err(Error::protocol("message must be a JSON array"));
        };
        let mut items = items.into_iter();
        let name = match items.next() {
            Some(Value::String(name)) => name,
            _ => return Err(Error::protocol("message name must be a string")),
        };

        if name == REPLY_CHANNEL {
            let token = items
                .next()
                .as_ref()
                .and_then(CorrelationToken::from_value)
                .ok_or_else(|| Error::protocol("reply without a correlation token"))?;
            let result = items.next().unwrap_or(Value::Null);
            return Ok(Outgoing::Reply { token, result });
        }

        Ok(Outgoing::Event {
            name,
            payload: items.collect(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared state
// ─────────────────────────────────────────────────────────────────────────────

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sender towards the UI, absent while no UI is attached
#[derive(Default)]
struct UiSink {
    tx: RwLock<Option<mpsc::Sender<Outgoing>>>,
}

impl UiSink {
    fn attach(&self, tx: mpsc::Sender<Outgoing>) {
        *self.tx.write().unwrap_or_else(PoisonError::into_inner) = Some(tx);
    }

    fn detach(&self) -> bool {
        self.tx
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    fn is_attached(&self) -> bool {
        self.tx
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Returns `false` if the message was dropped
    async fn send(&self, msg: Outgoing) -> bool {
        let tx = self
            .tx
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match tx {
            Some(tx) => tx.send(msg).await.is_ok(),
            None => false,
        }
    }
}

struct PendingCall {
    operation: String,
    seq: u64,
}

/// Calls that were dispatched with a token and have not been answered
#[derive(Default)]
struct PendingCalls {
    next_seq: AtomicU64,
    calls: Mutex<HashMap<CorrelationToken, PendingCall>>,
}

impl PendingCalls {
    fn insert(&self, token: &CorrelationToken, operation: &str) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let previous = lock(&self.calls).insert(
            token.clone(),
            PendingCall {
                operation: operation.to_string(),
                seq,
            },
        );
        if let Some(previous) = previous {
            debug!(
                "Token {} reused while '{}' was pending; the earlier record is replaced",
                token, previous.operation
            );
        }
        seq
    }

    /// Remove the record only if it still belongs to the same call
    fn remove(&self, token: &CorrelationToken, seq: u64) -> bool {
        let mut calls = lock(&self.calls);
        match calls.get(token) {
            Some(call) if call.seq == seq => {
                calls.remove(token);
                true
            }
            _ => false,
        }
    }

    fn clear(&self) -> usize {
        let mut calls = lock(&self.calls);
        let count = calls.len();
        calls.clear();
        count
    }

    fn len(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[derive(Default)]
struct Shared {
    ui: UiSink,
    pending: PendingCalls,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handler side
// ─────────────────────────────────────────────────────────────────────────────

/// One-shot reply handle for a correlated call.
///
/// Consumed by [`Reply::send`], so a call is answered at most once. Dropping
/// it unused clears the pending record without answering.
pub struct Reply {
    token: CorrelationToken,
    seq: u64,
    operation: String,
    shared: Arc<Shared>,
    sent: bool,
}

impl Reply {
    pub fn token(&self) -> &CorrelationToken {
        &self.token
    }

    /// Send `["callback", token, result]` to the UI side
    pub async fn send(mut self, result: Value) {
        self.sent = true;
        let msg = Outgoing::Reply {
            token: self.token.clone(),
            result,
        };
        if !self.shared.ui.send(msg).await {
            debug!(
                "UI not attached, dropping reply to '{}' ({})",
                self.operation, self.token
            );
        }
    }
}

impl Drop for Reply {
    fn drop(&mut self) {
        if self.shared.pending.remove(&self.token, self.seq) && !self.sent {
            debug!(
                "'{}' finished without replying to {}",
                self.operation, self.token
            );
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("token", &self.token)
            .field("operation", &self.operation)
            .finish()
    }
}

/// What a handler receives
#[derive(Debug)]
pub struct Invocation {
    pub operation: String,
    pub args: Vec<Value>,
    /// Present when the caller supplied a correlation token
    pub reply: Option<Reply>,
}

impl Invocation {
    pub fn into_parts(self) -> (Vec<Value>, Option<Reply>) {
        (self.args, self.reply)
    }
}

type HandlerFn = dyn Fn(Invocation) -> BoxFuture<'static, Result<()>> + Send + Sync;

// ─────────────────────────────────────────────────────────────────────────────
// Bridge
// ─────────────────────────────────────────────────────────────────────────────

/// Routes calls to handlers and replies/events to the UI side
#[derive(Default)]
pub struct Bridge {
    handlers: RwLock<HashMap<String, Arc<HandlerFn>>>,
    shared: Arc<Shared>,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("operations", &self.operations())
            .field("pending", &self.pending_count())
            .field("ui_attached", &self.is_ui_attached())
            .finish()
    }
}

impl Bridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. A later registration under the same name replaces
    /// the earlier one.
    pub fn register<F, Fut>(&self, operation: impl Into<String>, handler: F)
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let operation = operation.into();
        let handler: Arc<HandlerFn> = Arc::new(move |invocation| handler(invocation).boxed());
        let replaced = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(operation.clone(), handler)
            .is_some();
        if replaced {
            debug!("Replaced handler for '{}'", operation);
        } else {
            trace!("Registered handler for '{}'", operation);
        }
    }

    /// Register a handler that computes a single value. The value is sent
    /// back automatically when the call carried a token.
    pub fn register_request<F, Fut>(&self, operation: impl Into<String>, handler: F)
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register(operation, move |invocation: Invocation| {
            let (args, reply) = invocation.into_parts();
            let result = handler(args);
            async move {
                let value = result.await?;
                if let Some(reply) = reply {
                    reply.send(value).await;
                }
                Ok(())
            }
        });
    }

    pub fn has_operation(&self, operation: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(operation)
    }

    /// Registered operation names, sorted
    pub fn operations(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn attach_ui(&self, tx: mpsc::Sender<Outgoing>) {
        self.shared.ui.attach(tx);
        debug!("UI attached to bridge");
    }

    pub fn detach_ui(&self) {
        if self.shared.ui.detach() {
            debug!("UI detached from bridge");
        }
    }

    pub fn is_ui_attached(&self) -> bool {
        self.shared.ui.is_attached()
    }

    /// Send `[event, ...payload]` to the UI. Silently dropped if no UI is attached.
    pub async fn emit(&self, event: &str, payload: Vec<Value>) {
        let msg = Outgoing::Event {
            name: event.to_string(),
            payload,
        };
        if !self.shared.ui.send(msg).await {
            trace!("No UI attached, dropping event '{}'", event);
        }
    }

    /// Run the handler for `call` in its own task.
    ///
    /// Returns `None` when no handler is registered; the call is logged and
    /// dropped without a reply.
    pub fn dispatch(&self, call: CallEnvelope) -> Option<JoinHandle<()>> {
        let CallEnvelope {
            operation,
            correlation,
            args,
        } = call;

        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&operation)
            .cloned();
        let Some(handler) = handler else {
            warn!(
                "{}, dropping call",
                Error::UnknownOperation { name: operation }
            );
            return None;
        };

        let reply = correlation.map(|token| {
            let seq = self.shared.pending.insert(&token, &operation);
            Reply {
                token,
                seq,
                operation: operation.clone(),
                shared: Arc::clone(&self.shared),
                sent: false,
            }
        });

        let invocation = Invocation {
            operation: operation.clone(),
            args,
            reply,
        };

        Some(tokio::spawn(run_handler(operation, handler, invocation)))
    }

    /// Dispatch every call from `inbound` until the channel closes
    pub async fn serve(&self, mut inbound: mpsc::Receiver<CallEnvelope>) {
        while let Some(call) = inbound.recv().await {
            trace!("Bridge call '{}'", call.operation);
            self.dispatch(call);
        }
        debug!("Bridge inbound channel closed");
    }

    /// Number of correlated calls still waiting for a reply
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Detach the UI and forget every pending call
    pub fn teardown(&self) {
        self.detach_ui();
        let dropped = self.shared.pending.clear();
        if dropped > 0 {
            info!("Bridge torn down with {} unanswered call(s)", dropped);
        } else {
            debug!("Bridge torn down");
        }
    }
}

/// Handler failures, synchronous or asynchronous, end here
async fn run_handler(operation: String, handler: Arc<HandlerFn>, invocation: Invocation) {
    let future = match std::panic::catch_unwind(AssertUnwindSafe(|| handler(invocation))) {
        Ok(future) => future,
        Err(panic) => {
            error!(
                "Handler for '{}' panicked: {}",
                operation,
                panic_message(panic.as_ref())
            );
            return;
        }
    };

    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(())) => trace!("Handler for '{}' finished", operation),
        Ok(Err(e)) => warn!("{}", Error::handler(&operation, e.to_string())),
        Err(panic) => error!(
            "Handler for '{}' panicked: {}",
            operation,
            panic_message(panic.as_ref())
        ),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
