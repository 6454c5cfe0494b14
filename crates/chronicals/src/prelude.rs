//! Prelude for handler authors.
//!
//! Pulls in the types nearly every action or page handler touches.
//!
//! # Example
//!
//! ```ignore
//! use chronicals::prelude::*;
//!
//! let greet = Action::from_fn(|io, ctx| async move {
//!     let answer = io.render(json!({"kind": "INPUT_TEXT"})).await?;
//!     ctx.log(["answered"]).await;
//!     Ok(answer.values.first().cloned().unwrap_or(Value::Null))
//! });
//! ```

pub use async_trait::async_trait;
pub use serde_json::{json, Value};

pub use crate::context::{HandlerContext, NotifyConfig, RedirectProps};
pub use crate::error::{HandlerError, IoError};
pub use crate::host::Chronicals;
pub use crate::io::IoClient;
pub use crate::page::{Eventual, Layout};
pub use crate::routes::{Action, ActionHandler, Page, PageHandler, Route};
pub use chronicals_wire::types::{ContextUser, LoadingState, MenuItem};
