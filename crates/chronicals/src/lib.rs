//! Host-side SDK runtime for Chronicals.
//!
//! A host process registers named actions and pages, connects out to the
//! orchestrator over a persistent WebSocket, and serves user-initiated
//! invocations. Each invocation is a full duplex conversation: the handler
//! streams render instructions outward and suspends on the user's answers
//! coming back.
//!
//! The runtime's job is the unglamorous middle: reliable, ordered,
//! resumable duplex RPC over a reconnecting transport, multiplexed across
//! many concurrent transactions, with at-most-once completion semantics
//! and graceful shutdown.
//!
//! # Architecture
//!
//! ```text
//! orchestrator ⇄ socket ⇄ rpc demux ⇄ transaction / page managers ⇄ handler
//! ```
//!
//! - [`socket`]: framed, ping-checked WebSocket wrapper; acked sends,
//!   chunked large payloads
//! - [`rpc`]: typed duplex calls correlated by id, rebindable to a fresh
//!   socket after reconnect
//! - [`pending`]: in-flight artifacts replayed by the resend engine
//! - [`transaction`] / [`page`]: per-invocation state machines
//! - [`host`]: the lifecycle (connect → declare → serve → reconnect →
//!   drain) and the [`Chronicals`] entry point
//!
//! # Example
//!
//! ```ignore
//! use chronicals::{Action, Chronicals, HandlerError};
//! use serde_json::json;
//!
//! let host = Chronicals::builder("wss://orchestrator.example.com/websocket")
//!     .api_key(std::env::var("CHRONICALS_KEY").ok().unwrap_or_default())
//!     .route(
//!         "helloCurrentUser",
//!         Action::from_fn(|_io, ctx| async move {
//!             let first = ctx.user.first_name.clone().unwrap_or_default();
//!             let last = ctx.user.last_name.clone().unwrap_or_default();
//!             Ok(json!(format!("Hello, {first} {last}")))
//!         }),
//!     )
//!     .build()?;
//!
//! host.listen().await?;
//! # Ok::<(), chronicals::HostError>(())
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod io;
pub mod logger;
pub mod page;
pub mod pending;
pub mod prelude;
pub mod routes;
pub mod rpc;
pub mod shutdown;
pub mod socket;
pub mod transaction;

// Entry point
pub use host::{Chronicals, ChronicalsBuilder, HostStatus};

// Route surface
pub use routes::{Action, ActionHandler, Page, PageHandler, Route, RouteTable};

// Handler-visible types
pub use context::{HandlerContext, LoadingHandle, NotifyConfig, RedirectProps};
pub use io::IoClient;
pub use page::{Eventual, Layout};

// Configuration
pub use config::{ChronicalsConfig, OnErrorEvent, OnErrorFn};
pub use logger::{LogArg, LogLevel};

// Errors
pub use error::{HandlerError, HostError, IoError, RpcError, SocketError};

// Common wire types handlers touch directly
pub use chronicals_wire::types::{
    AccessControl, ContextUser, LoadingState, MenuItem, OrganizationDef,
};

// Wire contract re-export for adapter crates and tests
pub use chronicals_wire as wire;
