//! Error types, one enum per layer.
//!
//! The kinds mirror what callers branch on: transport waits that elapse
//! (`Timeout`), sends on a dead socket (`NotConnected`), peer-side
//! rejections (`RenderError`), cooperative teardown (`Canceled`,
//! `TransactionClosed`), payloads that fail validation (`SchemaInvalid`),
//! and exhausted retry budgets (`MaxRetries`).

use chronicals_wire::methods::PeerCallError;

/// Transport socket failures.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("timed out after {0}ms")]
    Timeout(u128),
    #[error("socket is not connected")]
    NotConnected,
    #[error("websocket: {0}")]
    WebSocket(String),
    #[error("bad frame: {0}")]
    BadFrame(#[from] serde_json::Error),
}

/// Duplex RPC failures.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error("response to {method} failed validation: {source}")]
    SchemaInvalid {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Peer(#[from] PeerCallError),
    #[error("rpc client shut down before a response arrived")]
    ClientClosed,
}

impl RpcError {
    /// True when the failure was a bounded wait elapsing, the only kind the
    /// outer retry loop re-attempts.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Socket(SocketError::Timeout(_)))
    }
}

/// Failures surfaced to handler code through the IO client.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// The orchestrator rejected a SEND_IO_CALL.
    #[error("orchestrator rejected the render instruction{}", fmt_detail(.0))]
    RenderError(Option<String>),
    /// The orchestrator or user aborted the transaction mid-prompt.
    #[error("transaction was canceled")]
    Canceled,
    /// IO attempted after the transaction closed.
    #[error("transaction is closed")]
    TransactionClosed,
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

fn fmt_detail(detail: &Option<String>) -> String {
    match detail {
        Some(message) => format!(": {message}"),
        None => String::new(),
    }
}

/// Errors raised by handler code. IO failures convert via `?`; anything
/// else becomes a message carried into the FAILURE result envelope.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Io(#[from] IoError),
}

impl HandlerError {
    pub fn msg(message: impl Into<String>) -> Self {
        HandlerError::Message(message.into())
    }

    /// True when the underlying cause was cooperative teardown, in which
    /// case no terminal completion message is owed.
    pub fn is_teardown(&self) -> bool {
        matches!(
            self,
            HandlerError::Io(IoError::Canceled) | HandlerError::Io(IoError::TransactionClosed)
        )
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        HandlerError::Message(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        HandlerError::Message(message.to_string())
    }
}

impl From<HostError> for HandlerError {
    fn from(e: HostError) -> Self {
        HandlerError::Message(e.to_string())
    }
}

/// Host session failures.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("retry budget exhausted after {attempts} attempts calling {method}")]
    MaxRetries { method: &'static str, attempts: u32 },
    #[error("fatal: {0}")]
    Fatal(String),
    #[error("invalid config: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_detection_only_matches_socket_timeouts() {
        assert!(RpcError::Socket(SocketError::Timeout(500)).is_timeout());
        assert!(!RpcError::Socket(SocketError::NotConnected).is_timeout());
        assert!(!RpcError::ClientClosed.is_timeout());
    }

    #[test]
    fn teardown_detection() {
        assert!(HandlerError::Io(IoError::Canceled).is_teardown());
        assert!(HandlerError::Io(IoError::TransactionClosed).is_teardown());
        assert!(!HandlerError::msg("boom").is_teardown());
        assert!(!HandlerError::Io(IoError::RenderError(None)).is_teardown());
    }

    #[test]
    fn render_error_display_includes_detail() {
        let err = IoError::RenderError(Some("bad widget".to_string()));
        assert_eq!(
            err.to_string(),
            "orchestrator rejected the render instruction: bad widget"
        );
        let bare = IoError::RenderError(None);
        assert_eq!(
            bare.to_string(),
            "orchestrator rejected the render instruction"
        );
    }
}
