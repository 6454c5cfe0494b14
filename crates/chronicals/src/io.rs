//! IO client: the handler-facing side of the render conversation.
//!
//! A handler renders by sending an opaque serialized instruction outward
//! and suspending until the user's answer routes back. The runtime never
//! interprets instruction contents; widget schemas live with the builder
//! surface, not here.
//!
//! [`IoResponseRegistry`] is the per-process map of live conversations,
//! keyed by transaction id (or page key — pages share the namespace).
//! Its emptiness is what the shutdown coordinator drains against.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tracing::debug;

use chronicals_wire::types::{IoResponseKind, IoResponseMessage};

use crate::error::IoError;

/// Delivery path for serialized render instructions. Transactions send
/// through the RPC layer with pending-map bookkeeping; pages stash the
/// instruction and schedule a coalesced page send.
#[async_trait]
pub trait IoSender: Send + Sync {
    async fn send_render(&self, serialized: String) -> Result<(), IoError>;
}

struct IoClientInner {
    sender: Arc<dyn IoSender>,
    responses: tokio::sync::Mutex<mpsc::UnboundedReceiver<IoResponseMessage>>,
    closed: Arc<AtomicBool>,
    inline_action_keys: Mutex<Vec<String>>,
}

/// Handed to every action and page handler. Cheap to clone.
#[derive(Clone)]
pub struct IoClient {
    inner: Arc<IoClientInner>,
}

impl IoClient {
    pub(crate) fn new(
        sender: Arc<dyn IoSender>,
        responses: mpsc::UnboundedReceiver<IoResponseMessage>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            inner: Arc::new(IoClientInner {
                sender,
                responses: tokio::sync::Mutex::new(responses),
                closed,
                inline_action_keys: Mutex::new(Vec::new()),
            }),
        }
    }

    fn check_open(&self) -> Result<(), IoError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            Err(IoError::TransactionClosed)
        } else {
            Ok(())
        }
    }

    /// Send a render instruction and suspend until the user's answer
    /// arrives. Intermediate `SET_STATE` updates are consumed silently;
    /// a `CANCELED` response or a torn-down conversation rejects with
    /// [`IoError::Canceled`].
    pub async fn render(&self, instruction: Value) -> Result<IoResponseMessage, IoError> {
        self.check_open()?;
        let serialized = instruction.to_string();
        self.inner.sender.send_render(serialized).await?;

        let mut responses = self.inner.responses.lock().await;
        loop {
            match responses.recv().await {
                Some(message) => match message.kind {
                    IoResponseKind::Return => return Ok(message),
                    IoResponseKind::Canceled => return Err(IoError::Canceled),
                    IoResponseKind::SetState => {
                        debug!(
                            transaction_id = %message.transaction_id,
                            "ignoring SET_STATE response"
                        );
                    }
                },
                None => return Err(IoError::Canceled),
            }
        }
    }

    /// Send a render instruction without waiting for an answer. Display
    /// components and page children go this way.
    pub async fn display(&self, instruction: Value) -> Result<(), IoError> {
        self.check_open()?;
        self.inner.sender.send_render(instruction.to_string()).await
    }

    /// Send a group of instructions as one array payload.
    pub async fn display_group(&self, instructions: Vec<Value>) -> Result<(), IoError> {
        self.display(Value::Array(instructions)).await
    }

    /// Track an inline action key owned by this client. Registration with
    /// the orchestrator is dormant; keys are still tracked so teardown
    /// can release them.
    pub fn track_inline_action(&self, key: impl Into<String>) {
        self.inner
            .inline_action_keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(key.into());
    }

    /// Take and clear the tracked inline action keys.
    pub(crate) fn drain_inline_actions(&self) -> Vec<String> {
        std::mem::take(
            &mut *self
                .inner
                .inline_action_keys
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        )
    }
}

struct RegistryEntry {
    response_tx: mpsc::UnboundedSender<IoResponseMessage>,
    closed: Arc<AtomicBool>,
}

/// Per-process map of live io conversations.
#[derive(Default)]
pub(crate) struct IoResponseRegistry {
    entries: Mutex<HashMap<String, RegistryEntry>>,
    changed: Notify,
}

impl IoResponseRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, RegistryEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim `key`. Returns `None` when a conversation is already live
    /// under it (duplicate START_TRANSACTION / OPEN_PAGE are idempotent).
    pub fn register(
        &self,
        key: &str,
    ) -> Option<(mpsc::UnboundedReceiver<IoResponseMessage>, Arc<AtomicBool>)> {
        let mut entries = self.lock();
        if entries.contains_key(key) {
            return None;
        }
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        entries.insert(
            key.to_string(),
            RegistryEntry {
                response_tx,
                closed: closed.clone(),
            },
        );
        Some((response_rx, closed))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Deliver a response to the owning conversation.
    pub fn route(&self, message: IoResponseMessage) {
        let entries = self.lock();
        match entries.get(&message.transaction_id) {
            Some(entry) => {
                let _ = entry.response_tx.send(message);
            }
            None => {
                debug!(
                    transaction_id = %message.transaction_id,
                    "io response for unknown conversation"
                );
            }
        }
    }

    /// Tear down `key`: later io attempts observe the closed flag, and a
    /// prompt suspended on a response is rejected by the dropped sender.
    pub fn remove(&self, key: &str) {
        let removed = self.lock().remove(key);
        if let Some(entry) = removed {
            entry.closed.store(true, Ordering::SeqCst);
        }
        self.changed.notify_waiters();
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Resolve once the registry is empty. Used by the drain phase.
    pub async fn wait_empty(&self) {
        loop {
            let notified = self.changed.notified();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Drop everything without ceremony (`immediately_close`).
    pub fn clear(&self) {
        let mut entries = self.lock();
        for (_, entry) in entries.drain() {
            entry.closed.store(true, Ordering::SeqCst);
        }
        drop(entries);
        self.changed.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NullSender;

    #[async_trait]
    impl IoSender for NullSender {
        async fn send_render(&self, _serialized: String) -> Result<(), IoError> {
            Ok(())
        }
    }

    fn response(kind: IoResponseKind) -> IoResponseMessage {
        IoResponseMessage {
            id: None,
            transaction_id: "t1".to_string(),
            kind,
            values: vec![json!("answer")],
        }
    }

    #[tokio::test]
    async fn render_resolves_on_return_and_skips_set_state() {
        let registry = IoResponseRegistry::default();
        let (rx, closed) = registry.register("t1").expect("fresh key");
        let io = IoClient::new(Arc::new(NullSender), rx, closed);

        registry.route(response(IoResponseKind::SetState));
        registry.route(response(IoResponseKind::Return));

        let answer = io.render(json!({"kind": "INPUT_TEXT"})).await.unwrap();
        assert_eq!(answer.kind, IoResponseKind::Return);
        assert_eq!(answer.values, vec![json!("answer")]);
    }

    #[tokio::test]
    async fn render_rejects_canceled_when_conversation_is_removed() {
        let registry = IoResponseRegistry::default();
        let (rx, closed) = registry.register("t1").expect("fresh key");
        let io = IoClient::new(Arc::new(NullSender), rx, closed);

        let render = tokio::spawn(async move { io.render(json!({})).await });
        tokio::task::yield_now().await;
        registry.remove("t1");

        let err = render.await.unwrap().unwrap_err();
        assert!(matches!(err, IoError::Canceled));
    }

    #[tokio::test]
    async fn io_after_close_fails_transaction_closed() {
        let registry = IoResponseRegistry::default();
        let (rx, closed) = registry.register("t1").expect("fresh key");
        let io = IoClient::new(Arc::new(NullSender), rx, closed);

        registry.remove("t1");
        let err = io.render(json!({})).await.unwrap_err();
        assert!(matches!(err, IoError::TransactionClosed));
    }

    #[tokio::test]
    async fn canceled_response_kind_rejects_the_prompt() {
        let registry = IoResponseRegistry::default();
        let (rx, closed) = registry.register("t1").expect("fresh key");
        let io = IoClient::new(Arc::new(NullSender), rx, closed);

        registry.route(response(IoResponseKind::Canceled));
        let err = io.render(json!({})).await.unwrap_err();
        assert!(matches!(err, IoError::Canceled));
    }

    #[tokio::test]
    async fn duplicate_registration_is_refused() {
        let registry = IoResponseRegistry::default();
        assert!(registry.register("t1").is_some());
        assert!(registry.register("t1").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn wait_empty_resolves_after_last_removal() {
        let registry = Arc::new(IoResponseRegistry::default());
        let (_rx, _closed) = registry.register("t1").expect("fresh key");
        let (_rx2, _closed2) = registry.register("t2").expect("fresh key");

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait_empty().await })
        };
        tokio::task::yield_now().await;
        registry.remove("t1");
        assert!(!waiter.is_finished());
        registry.remove("t2");
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("drain should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn inline_action_keys_drain_on_teardown() {
        let registry = IoResponseRegistry::default();
        let (rx, closed) = registry.register("t1").expect("fresh key");
        let io = IoClient::new(Arc::new(NullSender), rx, closed);
        io.track_inline_action("t1/approve");
        io.track_inline_action("t1/reject");
        assert_eq!(io.drain_inline_actions(), vec!["t1/approve", "t1/reject"]);
        assert!(io.drain_inline_actions().is_empty());
    }
}
