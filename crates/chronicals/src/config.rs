//! Host configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chronicals_wire::types::{ContextUser, OrganizationDef};
use serde_json::Value;

use crate::logger::LogLevel;

/// Everything about the failed invocation handed to the [`OnErrorFn`] hook.
#[derive(Debug, Clone)]
pub struct OnErrorEvent {
    pub error: String,
    pub message: String,
    pub route: String,
    pub params: Value,
    pub environment: String,
    pub user: ContextUser,
    pub organization: Option<OrganizationDef>,
}

/// User-supplied hook invoked before a handler failure is enveloped.
pub type OnErrorFn = Arc<dyn Fn(OnErrorEvent) + Send + Sync>;

/// Connection and behavior knobs for a host session.
///
/// Durations correspond to the millisecond config keys of the SDK surface
/// (`retryIntervalMs`, `pingIntervalMs`, …).
#[derive(Clone)]
pub struct ChronicalsConfig {
    /// API key sent as the `x-api-key` header. Optional in development.
    pub api_key: Option<String>,
    /// WebSocket endpoint of the orchestrator (`ws://` or `wss://`).
    pub endpoint: String,
    pub log_level: LogLevel,
    /// Base interval for linear retry backoff.
    pub retry_interval: Duration,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    /// How stale the last successful pong may get before the ping loop
    /// force-closes the socket to trigger a reconnect.
    pub close_unresponsive_connection_timeout: Duration,
    /// Debounce window for coalescing route-table changes into one
    /// re-declare.
    pub reinitialize_batch_timeout: Duration,
    /// Grace before resolving a single-shot request, covering the
    /// orchestrator's completion ack round trip.
    pub complete_http_request_delay: Duration,
    /// Grace after the drain empties before `safely_close` resolves.
    pub complete_shutdown_delay: Duration,
    /// Upper bound on drain time during `safely_close`.
    pub shutdown_drain_timeout: Duration,
    pub max_resend_attempts: u32,
    /// Echo every socket frame at debug level.
    pub verbose_message_logs: bool,
    pub on_error: Option<OnErrorFn>,
}

impl ChronicalsConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            api_key: None,
            endpoint: endpoint.into(),
            log_level: LogLevel::Info,
            retry_interval: Duration::from_millis(3_000),
            ping_interval: Duration::from_millis(30_000),
            ping_timeout: Duration::from_millis(5_000),
            connect_timeout: Duration::from_millis(15_000),
            send_timeout: Duration::from_millis(5_000),
            close_unresponsive_connection_timeout: Duration::from_millis(180_000),
            reinitialize_batch_timeout: Duration::from_millis(1_500),
            complete_http_request_delay: Duration::from_millis(3_000),
            complete_shutdown_delay: Duration::from_millis(1_000),
            shutdown_drain_timeout: Duration::from_millis(30_000),
            max_resend_attempts: 10,
            verbose_message_logs: false,
            on_error: None,
        }
    }

    /// Derive the HTTP base URL from the WebSocket endpoint: same
    /// authority, `ws→http` / `wss→https`, empty path.
    pub fn http_base_url(&self) -> Option<String> {
        let (scheme, rest) = self.endpoint.split_once("://")?;
        let authority = rest.split(&['/', '?', '#'][..]).next()?;
        if authority.is_empty() {
            return None;
        }
        let http_scheme = match scheme {
            "ws" => "http",
            "wss" => "https",
            _ => return None,
        };
        Some(format!("{http_scheme}://{authority}"))
    }
}

impl fmt::Debug for ChronicalsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChronicalsConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_deref().map(|_| "<redacted>"))
            .field("log_level", &self.log_level)
            .field("retry_interval", &self.retry_interval)
            .field("max_resend_attempts", &self.max_resend_attempts)
            .finish_non_exhaustive()
    }
}
