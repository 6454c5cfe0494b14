#![allow(dead_code)] // not every test binary uses every helper

//! In-process mock orchestrator for integration tests.
//!
//! Speaks the real wire protocol over a real WebSocket listener: acks
//! frames, reassembles chunks, answers host calls through a pluggable
//! responder, and lets tests push peer calls (START_TRANSACTION et al.)
//! into the host.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use chronicals::wire::envelope::RpcEnvelope;
use chronicals::wire::frame::{ChunkBuffer, Frame};

/// Answer for one host-to-peer call: method name and payload in, response
/// payload out (`None` = never respond, let the host time out).
pub type Responder = Arc<dyn Fn(&str, &Value) -> Option<Value> + Send + Sync>;

/// Default responder: success for everything the host can send.
pub fn default_responder() -> Responder {
    Arc::new(|method, _data| match method {
        "INITIALIZE_HOST" => Some(init_success()),
        "BEGIN_HOST_SHUTDOWN" => Some(json!({"type": "success"})),
        _ => Some(json!({"type": "SUCCESS"})),
    })
}

pub fn init_success() -> Value {
    json!({
        "type": "success",
        "organization": {"name": "Test Org", "slug": "test-org"},
        "environment": "development",
        "invalidSlugs": [],
        "warnings": []
    })
}

/// One recorded host-to-peer call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub connection: usize,
    pub method: String,
    pub data: Value,
}

enum ConnCommand {
    /// Send a peer-to-host call.
    Call { id: u64, method: String, data: Value },
    /// Close the WebSocket.
    Close,
    /// Stop reading frames (simulates an unresponsive peer; the TCP
    /// connection stays up but nothing is acked or ponged).
    StopReading,
}

/// Handle to one accepted connection.
pub struct Connection {
    pub index: usize,
    cmd_tx: mpsc::UnboundedSender<ConnCommand>,
    response_rx: mpsc::UnboundedReceiver<(u64, Value)>,
    next_call_id: AtomicU64,
}

impl Connection {
    /// Fire a peer call; the host's response arrives via
    /// [`Connection::next_response`].
    pub fn call(&self, method: &str, data: Value) -> u64 {
        let id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.cmd_tx.send(ConnCommand::Call {
            id,
            method: method.to_string(),
            data,
        });
        id
    }

    pub async fn next_response(&mut self) -> (u64, Value) {
        tokio::time::timeout(Duration::from_secs(5), self.response_rx.recv())
            .await
            .expect("timed out waiting for rpc response")
            .expect("connection task ended")
    }

    pub fn close(&self) {
        let _ = self.cmd_tx.send(ConnCommand::Close);
    }

    pub fn stop_reading(&self) {
        let _ = self.cmd_tx.send(ConnCommand::StopReading);
    }

    pub fn start_transaction(&self, transaction_id: &str, slug: &str) -> u64 {
        self.call(
            "START_TRANSACTION",
            json!({
                "transactionId": transaction_id,
                "action": {"slug": slug},
                "user": {"firstName": "Ada", "lastName": "Lovelace"},
                "environment": "development",
                "params": {}
            }),
        )
    }

    pub fn io_response(&self, transaction_id: &str, kind: &str, values: Value) -> u64 {
        let body = json!({
            "transactionId": transaction_id,
            "kind": kind,
            "values": values
        })
        .to_string();
        self.call("IO_RESPONSE", json!({ "value": body }))
    }

    pub fn close_transaction(&self, transaction_id: &str) -> u64 {
        self.call("CLOSE_TRANSACTION", json!({"transactionId": transaction_id}))
    }

    pub fn open_page(&self, page_key: &str, slug: &str) -> u64 {
        self.call(
            "OPEN_PAGE",
            json!({
                "pageKey": page_key,
                "page": {"slug": slug},
                "user": {"firstName": "Ada", "lastName": "Lovelace"},
                "environment": "development",
                "params": {}
            }),
        )
    }

    pub fn close_page(&self, page_key: &str) -> u64 {
        self.call("CLOSE_PAGE", json!({"pageKey": page_key}))
    }
}

/// The mock orchestrator: accepts any number of sequential connections.
pub struct Orchestrator {
    pub addr: SocketAddr,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    conn_rx: mpsc::UnboundedReceiver<Connection>,
}

impl Orchestrator {
    pub async fn start(responder: Responder) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let calls: Arc<Mutex<Vec<RecordedCall>>> = Arc::default();
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();

        let accept_calls = calls.clone();
        tokio::spawn(async move {
            let mut index = 0;
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let Ok(ws) = accept_async(stream).await else {
                    continue;
                };
                let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
                let (response_tx, response_rx) = mpsc::unbounded_channel();
                tokio::spawn(run_connection(
                    ws,
                    index,
                    responder.clone(),
                    accept_calls.clone(),
                    cmd_rx,
                    response_tx,
                ));
                let _ = conn_tx.send(Connection {
                    index,
                    cmd_tx,
                    response_rx,
                    next_call_id: AtomicU64::new(1),
                });
                index += 1;
            }
        });

        Self {
            addr,
            calls,
            conn_rx,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Await the next accepted connection.
    pub async fn next_connection(&mut self) -> Connection {
        tokio::time::timeout(Duration::from_secs(5), self.conn_rx.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("listener ended")
    }

    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_named(&self, method: &str) -> Vec<RecordedCall> {
        self.recorded()
            .into_iter()
            .filter(|call| call.method == method)
            .collect()
    }

    /// Wait until at least `count` calls of `method` have been recorded.
    pub async fn wait_for_calls(&self, method: &str, count: usize) -> Vec<RecordedCall> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let calls = self.calls_named(method);
            if calls.len() >= count {
                return calls;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {count} {method} call(s), saw {}",
                calls.len()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn wait_for_call(&self, method: &str) -> RecordedCall {
        self.wait_for_calls(method, 1)
            .await
            .into_iter()
            .next()
            .expect("at least one call")
    }
}

async fn run_connection<S>(
    mut ws: tokio_tungstenite::WebSocketStream<S>,
    index: usize,
    responder: Responder,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    mut cmd_rx: mpsc::UnboundedReceiver<ConnCommand>,
    response_tx: mpsc::UnboundedSender<(u64, Value)>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let mut chunks: HashMap<String, ChunkBuffer> = HashMap::new();
    let reading = AtomicBool::new(true);

    loop {
        tokio::select! {
            command = cmd_rx.recv() => {
                match command {
                    Some(ConnCommand::Call { id, method, data }) => {
                        let envelope = RpcEnvelope::Call { id, method_name: method, data };
                        let frame = Frame::Message {
                            id: Uuid::now_v7().to_string(),
                            data: envelope.to_json(),
                        };
                        if ws.send(WsMessage::Text(frame.to_json())).await.is_err() {
                            return;
                        }
                    }
                    Some(ConnCommand::Close) => {
                        let _ = ws.close(None).await;
                        return;
                    }
                    Some(ConnCommand::StopReading) => {
                        reading.store(false, Ordering::SeqCst);
                    }
                    None => return,
                }
            }
            message = ws.next(), if reading.load(Ordering::SeqCst) => {
                let Some(Ok(message)) = message else { return };
                let raw = match message {
                    WsMessage::Text(raw) => raw,
                    WsMessage::Ping(payload) => {
                        let _ = ws.send(WsMessage::Pong(payload)).await;
                        continue;
                    }
                    _ => continue,
                };
                let Ok(frame) = Frame::from_json(&raw) else { continue };
                let payload = match frame {
                    Frame::Message { id, data } => {
                        let ack = Frame::Ack { id };
                        let _ = ws.send(WsMessage::Text(ack.to_json())).await;
                        Some(data)
                    }
                    Frame::Chunk { id, message_id, seq, total, part } => {
                        let ack = Frame::Ack { id };
                        let _ = ws.send(WsMessage::Text(ack.to_json())).await;
                        let buffer = chunks.entry(message_id.clone()).or_default();
                        let whole = buffer.accept(seq, total, part);
                        if whole.is_some() {
                            chunks.remove(&message_id);
                        }
                        whole
                    }
                    Frame::Ack { .. } => None,
                };
                let Some(payload) = payload else { continue };
                let Ok(envelope) = RpcEnvelope::from_json(&payload) else { continue };
                match envelope {
                    RpcEnvelope::Call { id, method_name, data } => {
                        calls.lock().unwrap().push(RecordedCall {
                            connection: index,
                            method: method_name.clone(),
                            data: data.clone(),
                        });
                        if let Some(output) = responder(&method_name, &data) {
                            let response = RpcEnvelope::Response {
                                id,
                                method_name,
                                data: output,
                            };
                            let frame = Frame::Message {
                                id: Uuid::now_v7().to_string(),
                                data: response.to_json(),
                            };
                            if ws.send(WsMessage::Text(frame.to_json())).await.is_err() {
                                return;
                            }
                        }
                    }
                    RpcEnvelope::Response { id, data, .. } => {
                        let _ = response_tx.send((id, data));
                    }
                }
            }
        }
    }
}

/// A host builder tuned for fast tests: short timeouts, quick retries.
pub fn test_builder(endpoint: String) -> chronicals::ChronicalsBuilder {
    chronicals::Chronicals::builder(endpoint)
        .connect_timeout(Duration::from_secs(2))
        .send_timeout(Duration::from_millis(300))
        .ping_interval(Duration::from_secs(10))
        .ping_timeout(Duration::from_millis(300))
        .retry_interval(Duration::from_millis(25))
        .max_resend_attempts(2)
        .reinitialize_batch_timeout(Duration::from_millis(50))
        .complete_http_request_delay(Duration::from_millis(50))
        .complete_shutdown_delay(Duration::from_millis(50))
        .shutdown_drain_timeout(Duration::from_secs(3))
}

/// Install a test tracing subscriber once per process.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
