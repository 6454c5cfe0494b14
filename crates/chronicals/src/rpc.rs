//! Duplex RPC over a transport socket.
//!
//! The client is symmetric: it issues typed calls to the peer and
//! dispatches the peer's calls to a registered handler. Calls correlate by
//! a monotonic id scoped to the calling side. The bound socket can be
//! swapped after a reconnect with [`DuplexRpcClient::set_communicator`];
//! correlation state survives the swap, so callers that were already
//! waiting keep their outcome (usually a timeout from the dead socket)
//! while new calls ride the fresh one.
//!
//! The handler is held as a `Weak` back-reference: the host session owns
//! the RPC client, never the other way around.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use chronicals_wire::envelope::RpcEnvelope;
use chronicals_wire::methods::{HostMethod, PeerCall};

use crate::error::{RpcError, SocketError};
use crate::socket::{SocketEvent, TransportSocket};

/// Implemented by the host session; receives every validated inbound call.
///
/// The returned value is the response payload (JSON `null` for
/// void-returning methods) and is sent back under the call's id.
#[async_trait]
pub trait PeerRequestHandler: Send + Sync {
    async fn handle_peer_call(&self, call: PeerCall) -> Value;
}

/// Why the connection went away, forwarded to the session's close watcher.
#[derive(Debug)]
pub struct ConnectionClosed {
    pub code: Option<u16>,
    pub reason: Option<String>,
}

struct RpcShared {
    socket: RwLock<Option<Arc<TransportSocket>>>,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    handler: RwLock<Option<Weak<dyn PeerRequestHandler>>>,
    closes: mpsc::UnboundedSender<ConnectionClosed>,
}

impl RpcShared {
    fn lock_pending(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Value>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn current_socket(&self) -> Option<Arc<TransportSocket>> {
        self.socket
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

pub struct DuplexRpcClient {
    shared: Arc<RpcShared>,
}

impl DuplexRpcClient {
    /// `closes` receives one event per socket that dies underneath us.
    pub fn new(closes: mpsc::UnboundedSender<ConnectionClosed>) -> Self {
        Self {
            shared: Arc::new(RpcShared {
                socket: RwLock::new(None),
                next_id: AtomicU64::new(0),
                pending: Mutex::new(HashMap::new()),
                handler: RwLock::new(None),
                closes,
            }),
        }
    }

    /// Register the inbound-call handler. Held weakly; a dropped session
    /// silently stops receiving calls.
    pub fn set_request_handler(&self, handler: Weak<dyn PeerRequestHandler>) {
        *self
            .shared
            .handler
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    /// Bind (or rebind) the client to a socket and start demultiplexing
    /// its events. Swapping is atomic from a caller's point of view: a
    /// `send` sees either the old socket or the new one, never neither.
    pub fn set_communicator(
        &self,
        socket: Arc<TransportSocket>,
        mut events: mpsc::UnboundedReceiver<SocketEvent>,
    ) {
        *self.shared.socket.write().unwrap_or_else(|e| e.into_inner()) = Some(socket);

        let shared = self.shared.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    SocketEvent::Message(raw) => dispatch_raw(&shared, raw),
                    SocketEvent::Close { code, reason } => {
                        let _ = shared.closes.send(ConnectionClosed { code, reason });
                    }
                }
            }
        });
    }

    /// Schema-validated round trip to the peer.
    ///
    /// `timeout_factor` widens both the frame-ack wait and the response
    /// wait linearly; the outer retry loop passes the attempt number.
    pub async fn send<M: HostMethod>(
        &self,
        input: &M::Input,
        timeout_factor: u32,
    ) -> Result<M::Output, RpcError> {
        let socket = self
            .shared
            .current_socket()
            .ok_or(SocketError::NotConnected)?;

        let data = serde_json::to_value(input).map_err(|source| RpcError::SchemaInvalid {
            method: M::NAME,
            source,
        })?;
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = RpcEnvelope::Call {
            id,
            method_name: M::NAME.to_string(),
            data,
        };

        let (response_tx, response_rx) = oneshot::channel();
        self.shared.lock_pending().insert(id, response_tx);

        let timeout = socket.send_timeout() * timeout_factor.max(1);
        if let Err(e) = socket.send_with_timeout(&envelope.to_json(), timeout).await {
            self.shared.lock_pending().remove(&id);
            return Err(e.into());
        }

        let raw = match tokio::time::timeout(timeout, response_rx).await {
            Ok(Ok(value)) => value,
            Ok(Err(_)) => return Err(RpcError::ClientClosed),
            Err(_) => {
                self.shared.lock_pending().remove(&id);
                return Err(SocketError::Timeout(timeout.as_millis()).into());
            }
        };

        serde_json::from_value(raw).map_err(|source| RpcError::SchemaInvalid {
            method: M::NAME,
            source,
        })
    }

    /// Fail every in-flight caller and drop the socket binding. Terminal.
    pub fn shutdown(&self) {
        self.shared.lock_pending().clear();
        *self.shared.socket.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// Route one raw payload: responses resolve pending callers inline, calls
/// dispatch to the handler on their own task so a slow handler never
/// stalls the demux loop.
fn dispatch_raw(shared: &Arc<RpcShared>, raw: String) {
    let envelope = match RpcEnvelope::from_json(&raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "discarding unparseable rpc payload");
            return;
        }
    };

    match envelope {
        RpcEnvelope::Response { id, data, .. } => {
            if let Some(waiter) = shared.lock_pending().remove(&id) {
                let _ = waiter.send(data);
            } else {
                debug!(id, "response with no waiting caller");
            }
        }
        RpcEnvelope::Call {
            id,
            method_name,
            data,
        } => {
            let handler = shared
                .handler
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .as_ref()
                .and_then(Weak::upgrade);
            let Some(handler) = handler else {
                warn!(method = %method_name, "inbound call with no handler registered");
                return;
            };

            let call = match PeerCall::parse(&method_name, data) {
                Ok(call) => call,
                Err(e) => {
                    warn!(error = %e, "dropping inbound call");
                    return;
                }
            };

            let shared = shared.clone();
            tokio::spawn(async move {
                let output = handler.handle_peer_call(call).await;
                let response = RpcEnvelope::Response {
                    id,
                    method_name,
                    data: output,
                };
                let Some(socket) = shared.current_socket() else {
                    warn!(id, "no socket to carry rpc response");
                    return;
                };
                if let Err(e) = socket.send(&response.to_json()).await {
                    warn!(error = %e, id, "failed to send rpc response");
                }
            });
        }
    }
}
