//! Single-shot adapter: run a Chronicals host behind an HTTP trigger.
//!
//! Serverless platforms hand us one HTTP request at a time. The adapter
//! answers two request shapes on `POST /`:
//!
//! - `{"requestId": "…"}` — open a fresh connection to the orchestrator,
//!   declare with that request id, serve exactly the one transaction or
//!   page routed back, then close. No reconnection inside a request.
//! - `{"httpHostId": "…"}` — declare this host's routes over plain HTTP
//!   so the orchestrator can start invoking it.
//!
//! `GET /` answers 200 for platform health checks.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};

use chronicals::{Chronicals, ChronicalsConfig, HostError, RouteTable};

mod declare;

pub use declare::{declare_host, DeclareHostResponse};

/// How long a served request may run before the adapter gives up on it.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Everything needed to build a fresh host per request.
pub struct HttpHostState {
    pub config: ChronicalsConfig,
    pub routes: RouteTable,
    pub request_timeout: Duration,
    http: reqwest::Client,
}

impl HttpHostState {
    pub fn new(config: ChronicalsConfig, routes: RouteTable) -> Self {
        Self {
            config,
            routes,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    fn build_host(&self) -> Result<Chronicals, HostError> {
        let mut builder = Chronicals::builder(self.config.endpoint.clone())
            .routes(self.routes.clone())
            .log_level(self.config.log_level)
            .retry_interval(self.config.retry_interval)
            .ping_interval(self.config.ping_interval)
            .ping_timeout(self.config.ping_timeout)
            .connect_timeout(self.config.connect_timeout)
            .send_timeout(self.config.send_timeout)
            .complete_http_request_delay(self.config.complete_http_request_delay)
            .max_resend_attempts(self.config.max_resend_attempts)
            .verbose_message_logs(self.config.verbose_message_logs);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.api_key(api_key.clone());
        }
        if let Some(on_error) = &self.config.on_error {
            builder = builder.on_error(on_error.clone());
        }
        builder.build()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("declare failed: {0}")]
    Declare(String),
    #[error("request failed: {0}")]
    Serve(String),
    #[error("request timed out")]
    Timeout,
}

impl IntoResponse for AdapterError {
    fn into_response(self) -> Response {
        let code = match &self {
            AdapterError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AdapterError::Declare(_) | AdapterError::Serve(_) | AdapterError::Timeout => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (code, body).into_response()
    }
}

/// The two accepted `POST /` bodies.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HttpRequestBody {
    #[serde(rename_all = "camelCase")]
    Serve { request_id: String },
    #[serde(rename_all = "camelCase")]
    Declare { http_host_id: String },
}

/// Build the adapter router. Unknown methods on `/` answer 405.
pub fn router(state: Arc<HttpHostState>) -> Router {
    Router::new()
        .route("/", get(health).post(handle_request))
        .with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn handle_request(
    State(state): State<Arc<HttpHostState>>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AdapterError> {
    let body: HttpRequestBody = serde_json::from_slice(&body)
        .map_err(|e| AdapterError::BadRequest(format!("unrecognized body: {e}")))?;

    match body {
        HttpRequestBody::Serve { request_id } => serve_one(&state, request_id).await,
        HttpRequestBody::Declare { http_host_id } => {
            let response =
                declare_host(&state.http, &state.config, &state.routes, &http_host_id).await?;
            Ok(Json(serde_json::to_value(&response).unwrap_or_default()))
        }
    }
}

/// Open a connection, serve the one request, close.
async fn serve_one(
    state: &HttpHostState,
    request_id: String,
) -> Result<Json<serde_json::Value>, AdapterError> {
    let host = state
        .build_host()
        .map_err(|e| AdapterError::Serve(e.to_string()))?;

    info!(%request_id, "serving single-shot request");
    let served =
        tokio::time::timeout(state.request_timeout, host.serve_request(request_id.as_str())).await;
    match served {
        Ok(Ok(())) => Ok(Json(serde_json::json!({ "requestId": request_id }))),
        Ok(Err(e)) => {
            warn!(error = %e, %request_id, "single-shot request failed");
            Err(AdapterError::Serve(e.to_string()))
        }
        Err(_) => {
            error!(%request_id, "single-shot request timed out");
            host.immediately_close();
            Err(AdapterError::Timeout)
        }
    }
}

/// Convenience entry point: bind `addr` and serve the adapter until the
/// process is told to stop.
pub async fn serve(addr: &str, state: Arc<HttpHostState>) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "single-shot adapter listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
