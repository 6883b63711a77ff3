//! Caller side of the bridge
//!
//! - Token generation for correlated calls
//! - Pending-call tracking with one oneshot per token
//! - Timeouts for callers that need liveness

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, RwLock};

use crate::bridge::{CallEnvelope, CorrelationToken, Outgoing};
use rats_core::prelude::*;

/// Global token counter
static TOKEN_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a unique correlation token
pub fn next_token() -> CorrelationToken {
    CorrelationToken::from(TOKEN_COUNTER.fetch_add(1, Ordering::SeqCst))
}

/// A call awaiting its reply
struct PendingReply {
    reply_tx: oneshot::Sender<Value>,
    created_at: Instant,
    operation: String,
}

/// Tracks pending calls and matches replies by token
pub struct ReplyTracker {
    pending: Arc<RwLock<HashMap<CorrelationToken, PendingReply>>>,
}

impl Default for ReplyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplyTracker {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a new pending call.
    /// Returns (token, receiver for the reply)
    pub async fn register(&self, operation: &str) -> (CorrelationToken, oneshot::Receiver<Value>) {
        let token = next_token();
        let (tx, rx) = oneshot::channel();

        self.pending.write().await.insert(
            token.clone(),
            PendingReply {
                reply_tx: tx,
                created_at: Instant::now(),
                operation: operation.to_string(),
            },
        );

        (token, rx)
    }

    /// Route a reply to its caller.
    /// Returns true if the token matched a pending call.
    pub async fn handle_reply(&self, token: &CorrelationToken, result: Value) -> bool {
        if let Some(pending) = self.pending.write().await.remove(token) {
            trace!("Reply for '{}' ({})", pending.operation, token);
            let _ = pending.reply_tx.send(result);
            true
        } else {
            debug!("Reply for unknown token {}", token);
            false
        }
    }

    /// Forget one pending call; its caller observes cancellation
    pub async fn remove(&self, token: &CorrelationToken) -> bool {
        self.pending.write().await.remove(token).is_some()
    }

    /// Cancel all pending calls (e.g., on teardown)
    pub async fn cancel_all(&self) {
        let mut pending = self.pending.write().await;
        let count = pending.len();
        // Dropping the senders wakes every waiter with a cancellation
        pending.clear();
        if count > 0 {
            debug!("Cancelled {} pending bridge call(s)", count);
        }
    }

    /// Remove calls older than `timeout`
    pub async fn cleanup_stale(&self, timeout: Duration) -> Vec<CorrelationToken> {
        let mut pending = self.pending.write().await;
        let now = Instant::now();

        let stale: Vec<CorrelationToken> = pending
            .iter()
            .filter(|(_, call)| now.duration_since(call.created_at) > timeout)
            .map(|(token, _)| token.clone())
            .collect();

        for token in &stale {
            if let Some(call) = pending.remove(token) {
                debug!("Dropping stale call '{}' ({})", call.operation, token);
            }
        }

        stale
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }
}

/// Invokes bridge operations and awaits their replies
#[derive(Clone)]
pub struct BridgeClient {
    /// Channel towards the bridge
    call_tx: mpsc::Sender<CallEnvelope>,
    tracker: Arc<ReplyTracker>,
    default_timeout: Duration,
}

impl std::fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeClient")
            .field("call_tx", &"<channel>")
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl BridgeClient {
    pub fn new(call_tx: mpsc::Sender<CallEnvelope>) -> Self {
        Self {
            call_tx,
            tracker: Arc::new(ReplyTracker::new()),
            default_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Call and wait for the reply using the default timeout
    pub async fn call(&self, operation: &str, args: Vec<Value>) -> Result<Value> {
        self.call_with_timeout(operation, args, self.default_timeout)
            .await
    }

    /// Call and wait for the reply, giving up after `timeout`
    pub async fn call_with_timeout(
        &self,
        operation: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let (token, reply_rx) = self.tracker.register(operation).await;
        let call = CallEnvelope::new(operation, args).with_correlation(token.clone());

        debug!("Calling '{}' ({})", operation, token);

        if self.call_tx.send(call).await.is_err() {
            self.tracker.remove(&token).await;
            return Err(Error::channel_send("bridge inbound"));
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => Ok(result),
            // Sender dropped: cancelled by cancel_all or cleanup
            Ok(Err(_)) => Err(Error::ChannelClosed),
            Err(_) => {
                self.tracker.remove(&token).await;
                Err(Error::CallTimeout {
                    operation: operation.to_string(),
                })
            }
        }
    }

    /// Call without a token; no reply will come
    pub async fn notify(&self, operation: &str, args: Vec<Value>) -> Result<()> {
        debug!("Notifying '{}'", operation);
        self.call_tx
            .send(CallEnvelope::new(operation, args))
            .await
            .map_err(|_| Error::channel_send("bridge inbound"))
    }

    pub async fn handle_reply(&self, token: &CorrelationToken, result: Value) -> bool {
        self.tracker.handle_reply(token, result).await
    }

    /// Route a message from the bridge. Replies are consumed; events are
    /// handed back to the caller.
    pub async fn handle_outgoing(&self, msg: Outgoing) -> Option<Outgoing> {
        match msg {
            Outgoing::Reply { token, result } => {
                self.handle_reply(&token, result).await;
                None
            }
            event @ Outgoing::Event { .. } => Some(event),
        }
    }

    pub async fn cancel_all(&self) {
        self.tracker.cancel_all().await;
    }

    pub async fn pending_count(&self) -> usize {
        self.tracker.pending_count().await
    }

    pub fn tracker(&self) -> &Arc<ReplyTracker> {
        &self.tracker
    }
}
