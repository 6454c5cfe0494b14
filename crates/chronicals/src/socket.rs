//! Transport socket: a framed, ping-checked WebSocket wrapper.
//!
//! Every outbound payload travels as a [`Frame`] and `send` resolves only
//! once the peer acks it (every chunk of it, for large payloads). Inbound
//! frames are acked here and surfaced to the owner as [`SocketEvent`]s;
//! the owner never sees framing, chunking, or acks.
//!
//! The socket itself does not reconnect. It reports closes and leaves
//! recovery to the host session, which opens a replacement socket under
//! the same instance id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{debug, warn};
use uuid::Uuid;

use chronicals_wire::frame::{split_into_parts, ChunkBuffer, Frame};

use crate::error::SocketError;

/// Payloads above this many bytes are chunked.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// What the owner observes from a socket.
#[derive(Debug)]
pub enum SocketEvent {
    /// A fully reassembled inbound payload.
    Message(String),
    /// The connection closed (peer close frame, protocol error, or EOF).
    Close {
        code: Option<u16>,
        reason: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct SocketConfig {
    pub endpoint: String,
    /// Stable across reconnects; the orchestrator uses it to correlate
    /// sockets belonging to one host process.
    pub instance_id: String,
    pub api_key: Option<String>,
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    pub ping_timeout: Duration,
    pub chunk_size: usize,
    pub verbose_message_logs: bool,
}

struct SocketShared {
    acks: Mutex<HashMap<String, oneshot::Sender<()>>>,
    pongs: Mutex<HashMap<u64, oneshot::Sender<()>>>,
    open: AtomicBool,
}

impl SocketShared {
    fn lock_acks(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<()>>> {
        self.acks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_pongs(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<()>>> {
        self.pongs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark closed and fail every waiter.
    fn shut(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.lock_acks().clear();
        self.lock_pongs().clear();
    }
}

pub struct TransportSocket {
    shared: Arc<SocketShared>,
    out_tx: mpsc::UnboundedSender<WsMessage>,
    event_tx: mpsc::UnboundedSender<SocketEvent>,
    ping_seq: AtomicU64,
    send_timeout: Duration,
    ping_timeout: Duration,
    chunk_size: usize,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl TransportSocket {
    /// Open a connection and return the socket plus its event stream.
    ///
    /// Fails with [`SocketError::Timeout`] when the connection does not
    /// open within `connect_timeout`.
    pub async fn connect(
        config: SocketConfig,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<SocketEvent>), SocketError> {
        let mut request = config
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| SocketError::WebSocket(e.to_string()))?;
        let instance_header = HeaderValue::from_str(&config.instance_id)
            .map_err(|e| SocketError::WebSocket(e.to_string()))?;
        request.headers_mut().insert("x-instance-id", instance_header);
        if let Some(api_key) = &config.api_key {
            let key_header = HeaderValue::from_str(api_key)
                .map_err(|e| SocketError::WebSocket(e.to_string()))?;
            request.headers_mut().insert("x-api-key", key_header);
        }

        let (stream, _response) =
            tokio::time::timeout(config.connect_timeout, connect_async(request))
                .await
                .map_err(|_| SocketError::Timeout(config.connect_timeout.as_millis()))?
                .map_err(|e| SocketError::WebSocket(e.to_string()))?;

        let (mut sink, mut source) = stream.split();
        let shared = Arc::new(SocketShared {
            acks: Mutex::new(HashMap::new()),
            pongs: Mutex::new(HashMap::new()),
            open: AtomicBool::new(true),
        });

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WsMessage>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<SocketEvent>();

        let writer_shared = shared.clone();
        let verbose = config.verbose_message_logs;
        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if verbose {
                    if let WsMessage::Text(raw) = &msg {
                        debug!(frame = %raw, "socket frame sent");
                    }
                }
                if sink.send(msg).await.is_err() {
                    writer_shared.shut();
                    break;
                }
            }
        });

        let reader_shared = shared.clone();
        let reader_out = out_tx.clone();
        let event_tx_reader = event_tx.clone();
        let reader = tokio::spawn(async move {
            let event_tx = event_tx_reader;
            let mut chunks: HashMap<String, ChunkBuffer> = HashMap::new();
            loop {
                match source.next().await {
                    Some(Ok(WsMessage::Text(raw))) => {
                        if verbose {
                            debug!(frame = %raw, "socket frame received");
                        }
                        match Frame::from_json(&raw) {
                            Ok(frame) => handle_frame(
                                frame,
                                &reader_shared,
                                &reader_out,
                                &event_tx,
                                &mut chunks,
                            ),
                            Err(e) => warn!(error = %e, "discarding unparseable frame"),
                        }
                    }
                    Some(Ok(WsMessage::Ping(payload))) => {
                        let _ = reader_out.send(WsMessage::Pong(payload));
                    }
                    Some(Ok(WsMessage::Pong(payload))) => {
                        if let Some(seq) = pong_seq(&payload) {
                            if let Some(waiter) = reader_shared.lock_pongs().remove(&seq) {
                                let _ = waiter.send(());
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        reader_shared.shut();
                        let (code, reason) = match frame {
                            Some(f) => (Some(u16::from(f.code)), Some(f.reason.into_owned())),
                            None => (None, None),
                        };
                        let _ = event_tx.send(SocketEvent::Close { code, reason });
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        reader_shared.shut();
                        let _ = event_tx.send(SocketEvent::Close {
                            code: None,
                            reason: Some(e.to_string()),
                        });
                        break;
                    }
                    None => {
                        reader_shared.shut();
                        let _ = event_tx.send(SocketEvent::Close {
                            code: None,
                            reason: None,
                        });
                        break;
                    }
                }
            }
        });

        let socket = Arc::new(Self {
            shared,
            out_tx,
            event_tx,
            ping_seq: AtomicU64::new(0),
            send_timeout: config.send_timeout,
            ping_timeout: config.ping_timeout,
            chunk_size: config.chunk_size,
            reader,
            writer,
        });
        Ok((socket, event_rx))
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// The configured per-frame ack timeout.
    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Send one payload and wait for the peer's ack(s).
    ///
    /// Large payloads are split into ordered chunks; each chunk is acked
    /// individually and this resolves only after the last ack.
    pub async fn send(&self, payload: &str) -> Result<(), SocketError> {
        self.send_with_timeout(payload, self.send_timeout).await
    }

    /// [`TransportSocket::send`] with an explicit per-frame ack timeout,
    /// used by retrying callers that widen the window each attempt.
    pub async fn send_with_timeout(
        &self,
        payload: &str,
        timeout: Duration,
    ) -> Result<(), SocketError> {
        if !self.is_open() {
            return Err(SocketError::NotConnected);
        }
        if payload.len() > self.chunk_size {
            let parts = split_into_parts(payload, self.chunk_size);
            let message_id = Uuid::now_v7().to_string();
            let total = parts.len() as u32;
            for (seq, part) in parts.into_iter().enumerate() {
                let frame = Frame::Chunk {
                    id: Uuid::now_v7().to_string(),
                    message_id: message_id.clone(),
                    seq: seq as u32,
                    total,
                    part,
                };
                self.send_frame_acked(frame, timeout).await?;
            }
            Ok(())
        } else {
            self.send_frame_acked(
                Frame::Message {
                    id: Uuid::now_v7().to_string(),
                    data: payload.to_string(),
                },
                timeout,
            )
            .await
        }
    }

    async fn send_frame_acked(&self, frame: Frame, timeout: Duration) -> Result<(), SocketError> {
        let id = match &frame {
            Frame::Message { id, .. } | Frame::Chunk { id, .. } | Frame::Ack { id } => id.clone(),
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        self.shared.lock_acks().insert(id.clone(), ack_tx);

        if self
            .out_tx
            .send(WsMessage::Text(frame.to_json()))
            .is_err()
        {
            self.shared.lock_acks().remove(&id);
            return Err(SocketError::NotConnected);
        }

        match tokio::time::timeout(timeout, ack_rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SocketError::NotConnected),
            Err(_) => {
                self.shared.lock_acks().remove(&id);
                Err(SocketError::Timeout(timeout.as_millis()))
            }
        }
    }

    /// Liveness round trip. The pong must echo our sequenced payload.
    pub async fn ping(&self) -> Result<(), SocketError> {
        if !self.is_open() {
            return Err(SocketError::NotConnected);
        }
        let seq = self.ping_seq.fetch_add(1, Ordering::Relaxed);
        let (pong_tx, pong_rx) = oneshot::channel();
        self.shared.lock_pongs().insert(seq, pong_tx);

        if self
            .out_tx
            .send(WsMessage::Ping(seq.to_be_bytes().to_vec()))
            .is_err()
        {
            self.shared.lock_pongs().remove(&seq);
            return Err(SocketError::NotConnected);
        }

        match tokio::time::timeout(self.ping_timeout, pong_rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SocketError::NotConnected),
            Err(_) => {
                self.shared.lock_pongs().remove(&seq);
                Err(SocketError::Timeout(self.ping_timeout.as_millis()))
            }
        }
    }

    /// Politely close: send a close frame and stop accepting sends. The
    /// reader drains until the peer confirms or the stream ends.
    pub fn close(&self) {
        self.shared.shut();
        let _ = self.out_tx.send(WsMessage::Close(None));
    }

    /// Tear down without ceremony. Used by `immediately_close` and by the
    /// ping loop when the peer has gone unresponsive.
    ///
    /// The reader is aborted before it can observe the closed stream, so
    /// the close event is emitted here instead.
    pub fn force_close(&self) {
        let was_open = self.shared.open.swap(false, Ordering::SeqCst);
        self.shared.shut();
        self.reader.abort();
        self.writer.abort();
        if was_open {
            let _ = self.event_tx.send(SocketEvent::Close {
                code: None,
                reason: Some("closed by host".to_string()),
            });
        }
    }
}

fn pong_seq(payload: &[u8]) -> Option<u64> {
    payload.try_into().ok().map(u64::from_be_bytes)
}

fn handle_frame(
    frame: Frame,
    shared: &SocketShared,
    out: &mpsc::UnboundedSender<WsMessage>,
    events: &mpsc::UnboundedSender<SocketEvent>,
    chunks: &mut HashMap<String, ChunkBuffer>,
) {
    match frame {
        Frame::Ack { id } => {
            if let Some(waiter) = shared.lock_acks().remove(&id) {
                let _ = waiter.send(());
            }
        }
        Frame::Message { id, data } => {
            let ack = Frame::Ack { id };
            let _ = out.send(WsMessage::Text(ack.to_json()));
            let _ = events.send(SocketEvent::Message(data));
        }
        Frame::Chunk {
            id,
            message_id,
            seq,
            total,
            part,
        } => {
            let ack = Frame::Ack { id };
            let _ = out.send(WsMessage::Text(ack.to_json()));
            let buffer = chunks.entry(message_id.clone()).or_default();
            if let Some(payload) = buffer.accept(seq, total, part) {
                chunks.remove(&message_id);
                let _ = events.send(SocketEvent::Message(payload));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn test_config(endpoint: String) -> SocketConfig {
        SocketConfig {
            endpoint,
            instance_id: Uuid::new_v4().to_string(),
            api_key: Some("test-key".to_string()),
            connect_timeout: Duration::from_secs(2),
            send_timeout: Duration::from_millis(500),
            ping_timeout: Duration::from_millis(500),
            chunk_size: 32,
            verbose_message_logs: false,
        }
    }

    #[tokio::test]
    async fn connect_sends_instance_and_api_key_headers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request};

            let (stream, _) = listener.accept().await.unwrap();
            let mut seen = (false, false);
            let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp| {
                seen.0 = req.headers().contains_key("x-instance-id");
                seen.1 = req.headers().get("x-api-key").map(|v| v.as_bytes())
                    == Some(b"test-key".as_ref());
                Ok::<_, ErrorResponse>(resp)
            })
            .await
            .unwrap();
            drop(ws);
            seen
        });

        let config = test_config(format!("ws://{addr}"));
        let (_socket, _events) = TransportSocket::connect(config).await.unwrap();
        let (saw_instance, saw_key) = server.await.unwrap();
        assert!(saw_instance, "x-instance-id header missing");
        assert!(saw_key, "x-api-key header missing");
    }

    #[tokio::test]
    async fn send_resolves_on_ack_and_times_out_without_one() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            // Ack the first message frame, ignore the second.
            let mut acked = false;
            while let Some(Ok(msg)) = ws.next().await {
                if let WsMessage::Text(raw) = msg {
                    let frame = Frame::from_json(&raw).unwrap();
                    if let Frame::Message { id, .. } = frame {
                        if !acked {
                            acked = true;
                            let ack = Frame::Ack { id };
                            ws.send(WsMessage::Text(ack.to_json())).await.unwrap();
                        }
                    }
                }
            }
        });

        let config = test_config(format!("ws://{addr}"));
        let (socket, _events) = TransportSocket::connect(config).await.unwrap();

        socket.send("first").await.expect("acked send should succeed");
        let err = socket.send("second").await.unwrap_err();
        assert!(matches!(err, SocketError::Timeout(_)), "got {err:?}");
        drop(socket);
        server.abort();
    }

    #[tokio::test]
    async fn large_payloads_chunk_and_reassemble() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let payload = "abcdefgh".repeat(16); // 128 bytes, chunk_size 32

        let expected = payload.clone();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let mut buffer = ChunkBuffer::default();
            while let Some(Ok(msg)) = ws.next().await {
                let WsMessage::Text(raw) = msg else { continue };
                match Frame::from_json(&raw).unwrap() {
                    Frame::Chunk {
                        id,
                        seq,
                        total,
                        part,
                        ..
                    } => {
                        let ack = Frame::Ack { id };
                        ws.send(WsMessage::Text(ack.to_json())).await.unwrap();
                        if let Some(whole) = buffer.accept(seq, total, part) {
                            assert_eq!(whole, expected);
                            return true;
                        }
                    }
                    other => panic!("expected chunk frames, got {other:?}"),
                }
            }
            false
        });

        let config = test_config(format!("ws://{addr}"));
        let (socket, _events) = TransportSocket::connect(config).await.unwrap();
        socket.send(&payload).await.unwrap();
        assert!(server.await.unwrap(), "server never reassembled the payload");
    }

    #[tokio::test]
    async fn inbound_messages_are_acked_and_surfaced() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let frame = Frame::Message {
                id: "m1".to_string(),
                data: "hello host".to_string(),
            };
            ws.send(WsMessage::Text(frame.to_json())).await.unwrap();
            // Expect the ack back.
            while let Some(Ok(msg)) = ws.next().await {
                if let WsMessage::Text(raw) = msg {
                    if let Ok(Frame::Ack { id }) = Frame::from_json(&raw) {
                        return id == "m1";
                    }
                }
            }
            false
        });

        let config = test_config(format!("ws://{addr}"));
        let (_socket, mut events) = TransportSocket::connect(config).await.unwrap();

        match events.recv().await {
            Some(SocketEvent::Message(data)) => assert_eq!(data, "hello host"),
            other => panic!("expected message event, got {other:?}"),
        }
        assert!(server.await.unwrap(), "host never acked the message");
    }

    #[tokio::test]
    async fn ping_times_out_when_peer_stops_reading() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            // Hold the connection open without reading: no pong ever comes.
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(ws);
        });

        let config = test_config(format!("ws://{addr}"));
        let (socket, _events) = TransportSocket::connect(config).await.unwrap();
        let err = socket.ping().await.unwrap_err();
        assert!(matches!(err, SocketError::Timeout(_)), "got {err:?}");
        server.abort();
    }

    #[tokio::test]
    async fn close_event_fires_when_peer_disconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let config = test_config(format!("ws://{addr}"));
        let (socket, mut events) = TransportSocket::connect(config).await.unwrap();

        loop {
            match events.recv().await {
                Some(SocketEvent::Close { .. }) => break,
                Some(_) => continue,
                None => panic!("event stream ended without a close event"),
            }
        }
        assert!(!socket.is_open());
        server.await.unwrap();

        let err = socket.send("too late").await.unwrap_err();
        assert!(matches!(err, SocketError::NotConnected));
    }
}
