//! Page sessions: long-lived, re-renderable UI surfaces.
//!
//! A page re-renders whenever anything changes — a child instruction, a
//! lazily resolved title, a late error. Sends are coalesced so exactly one
//! SEND_PAGE is in flight per page key and bursts collapse into at most
//! one follow-up carrying the latest state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, warn};

use chronicals_wire::meta::decode_params;
use chronicals_wire::methods::{OpenPageInputs, OpenPageResult, SendPage, SendPageInputs};
use chronicals_wire::types::{BasicLayout, LayoutError, MenuItem};

use crate::context::HandlerContext;
use crate::error::{HandlerError, IoError};
use crate::host::SessionShared;
use crate::io::{IoClient, IoSender};

/// SEND_PAGE attempts before a render is abandoned (until the next change
/// or a reconnect replay).
pub(crate) const MAX_PAGE_RETRIES: u32 = 5;

/// A value that may exist now, on request, or eventually.
///
/// Page titles and descriptions resolve independently of the first render;
/// each arrival schedules another coalesced send.
pub enum Eventual<T> {
    Immediate(T),
    Lazy(Box<dyn FnOnce() -> Result<T, HandlerError> + Send>),
    Future(BoxFuture<'static, Result<T, HandlerError>>),
}

impl<T> Eventual<T> {
    pub fn lazy(f: impl FnOnce() -> Result<T, HandlerError> + Send + 'static) -> Self {
        Eventual::Lazy(Box::new(f))
    }

    pub fn future(
        fut: impl std::future::Future<Output = Result<T, HandlerError>> + Send + 'static,
    ) -> Self {
        Eventual::Future(Box::pin(fut))
    }

    async fn resolve(self) -> Result<T, HandlerError> {
        match self {
            Eventual::Immediate(value) => Ok(value),
            Eventual::Lazy(f) => f(),
            Eventual::Future(fut) => fut.await,
        }
    }
}

impl From<&str> for Eventual<String> {
    fn from(value: &str) -> Self {
        Eventual::Immediate(value.to_string())
    }
}

impl From<String> for Eventual<String> {
    fn from(value: String) -> Self {
        Eventual::Immediate(value)
    }
}

/// What a page handler returns. Children are opaque render instructions;
/// errors found later (eventual failures, child render failures) are
/// appended by the session, not the handler.
#[derive(Default)]
pub struct Layout {
    pub title: Option<Eventual<String>>,
    pub description: Option<Eventual<String>>,
    pub children: Option<Vec<Value>>,
    pub menu_items: Option<Vec<MenuItem>>,
}

impl Layout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<Eventual<String>>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<Eventual<String>>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_children(mut self, children: Vec<Value>) -> Self {
        self.children = Some(children);
        self
    }

    pub fn with_menu_items(mut self, menu_items: Vec<MenuItem>) -> Self {
        self.menu_items = Some(menu_items);
        self
    }
}

/// Rendered state, serialized into the wire layout on every send.
#[derive(Default)]
struct RenderState {
    title: Option<String>,
    description: Option<String>,
    menu_items: Option<Vec<MenuItem>>,
    children: Option<Value>,
    errors: Vec<LayoutError>,
}

/// Coalescing flags. Exactly one of the paths through `schedule` arms the
/// zero-delay timer; everything else just records that more work exists.
#[derive(Default)]
struct CoalesceState {
    in_flight: bool,
    timer_armed: bool,
    pending: bool,
}

pub(crate) struct PageSession {
    page_key: String,
    shared: Arc<SessionShared>,
    closed: Arc<AtomicBool>,
    state: Mutex<RenderState>,
    coalesce: Mutex<CoalesceState>,
}

impl PageSession {
    fn lock_state(&self) -> MutexGuard<'_, RenderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_coalesce(&self) -> MutexGuard<'_, CoalesceState> {
        self.coalesce.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Request a (re-)send. Collapses into the in-flight send's follow-up
    /// when one is already running.
    pub(crate) fn schedule_send(self: &Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut coalesce = self.lock_coalesce();
            coalesce.pending = true;
            if coalesce.in_flight || coalesce.timer_armed {
                return;
            }
            coalesce.timer_armed = true;
        }
        let session = self.clone();
        tokio::spawn(async move {
            // Zero-delay hop: lets a burst of same-tick updates merge into
            // one send.
            tokio::task::yield_now().await;
            session.process().await;
        });
    }

    async fn process(self: Arc<Self>) {
        {
            let mut coalesce = self.lock_coalesce();
            coalesce.timer_armed = false;
            coalesce.pending = false;
            coalesce.in_flight = true;
        }
        self.send_page().await;
        let again = {
            let mut coalesce = self.lock_coalesce();
            coalesce.in_flight = false;
            coalesce.pending
        };
        if again {
            self.schedule_send();
        }
    }

    /// One delivery attempt series for the current state: up to
    /// [`MAX_PAGE_RETRIES`] tries with a fixed interval between them.
    async fn send_page(&self) {
        let payload = {
            let state = self.lock_state();
            let layout = BasicLayout {
                kind: BasicLayout::KIND.to_string(),
                title: state.title.clone(),
                description: state.description.clone(),
                menu_items: state.menu_items.clone(),
                children: state.children.clone(),
                errors: state.errors.clone(),
            };
            match serde_json::to_string(&layout) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, page_key = %self.page_key, "layout failed to serialize");
                    return;
                }
            }
        };

        self.shared.pending.set_layout(&self.page_key, payload.clone());
        let inputs = SendPageInputs {
            page_key: self.page_key.clone(),
            page: Some(payload),
        };

        for attempt in 1..=MAX_PAGE_RETRIES {
            match self.shared.rpc.send::<SendPage>(&inputs, 1).await {
                Ok(output) => {
                    if !output.is_success() {
                        warn!(page_key = %self.page_key, "orchestrator rejected page send");
                    }
                    self.shared.pending.remove_layout(&self.page_key);
                    return;
                }
                Err(e) if attempt < MAX_PAGE_RETRIES => {
                    debug!(
                        error = %e,
                        page_key = %self.page_key,
                        attempt,
                        "page send failed, retrying"
                    );
                    tokio::time::sleep(self.shared.config.retry_interval).await;
                }
                Err(e) => {
                    // Out of budget. The pending layout stays for the
                    // resend engine.
                    debug!(
                        error = %e,
                        page_key = %self.page_key,
                        "page send abandoned after max retries"
                    );
                }
            }
        }
    }

    fn record_error(&self, layout_key: &str, e: &HandlerError) {
        self.lock_state().errors.push(LayoutError {
            layout_key: layout_key.to_string(),
            error: "Error".to_string(),
            message: e.to_string(),
        });
    }
}

/// Delivery path for a page's IO client: stash the latest instruction and
/// schedule a coalesced send. Never fails — page renders are best-effort
/// until delivered.
struct PageIoSender {
    session: std::sync::Weak<PageSession>,
}

#[async_trait::async_trait]
impl IoSender for PageIoSender {
    async fn send_render(&self, serialized: String) -> Result<(), IoError> {
        let Some(session) = self.session.upgrade() else {
            return Err(IoError::TransactionClosed);
        };
        match serde_json::from_str::<Value>(&serialized) {
            Ok(children) => session.lock_state().children = Some(children),
            Err(e) => {
                warn!(error = %e, page_key = %session.page_key, "bad child instruction");
                return Ok(());
            }
        }
        session.schedule_send();
        Ok(())
    }
}

/// Live page sessions keyed by page key.
#[derive(Default)]
pub(crate) struct PageManager {
    sessions: Mutex<HashMap<String, Arc<PageSession>>>,
}

impl PageManager {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<PageSession>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Handle OPEN_PAGE. The handler runs to its layout before SUCCESS is
    /// returned; rendering and eventual resolution continue afterwards.
    pub(crate) async fn open_page(
        &self,
        shared: &Arc<SessionShared>,
        inputs: OpenPageInputs,
    ) -> OpenPageResult {
        if shared.shutdown.is_shutting_down() {
            return OpenPageResult::Error {
                message: Some("host is shutting down".to_string()),
            };
        }
        if shared.organization().is_none() {
            return OpenPageResult::Error {
                message: Some("host is not initialized".to_string()),
            };
        }

        let handler = {
            let routes = shared.routes.read().unwrap_or_else(|e| e.into_inner());
            routes
                .find_page(&inputs.page.slug)
                .and_then(|page| page.handler.clone())
        };
        let Some(handler) = handler else {
            return OpenPageResult::Error {
                message: Some(format!("no page handler for slug {}", inputs.page.slug)),
            };
        };

        let Some((response_rx, closed)) = shared.io_registry.register(&inputs.page_key) else {
            // Already open under this key; the live session stands.
            return OpenPageResult::Success {
                page_key: inputs.page_key,
            };
        };

        let session = Arc::new(PageSession {
            page_key: inputs.page_key.clone(),
            shared: shared.clone(),
            closed,
            state: Mutex::new(RenderState::default()),
            coalesce: Mutex::new(CoalesceState::default()),
        });
        self.lock().insert(inputs.page_key.clone(), session.clone());

        let io = IoClient::new(
            Arc::new(PageIoSender {
                session: Arc::downgrade(&session),
            }),
            response_rx,
            session.closed.clone(),
        );

        let params = decode_params(inputs.params, inputs.params_meta.as_ref());
        let ctx = HandlerContext::new(
            inputs.user,
            params,
            inputs.environment,
            shared.organization(),
            inputs.page.clone(),
            inputs.page_key.clone(),
            shared.clone(),
        );

        let layout = match handler.run(io, ctx).await {
            Ok(layout) => layout,
            Err(e) => {
                self.close_page(shared, &inputs.page_key);
                return OpenPageResult::Error {
                    message: Some(e.to_string()),
                };
            }
        };

        seed_layout(&session, layout);
        session.schedule_send();

        OpenPageResult::Success {
            page_key: inputs.page_key,
        }
    }

    /// Handle CLOSE_PAGE: tear down the session, the conversation, and
    /// every pending artifact under the key.
    pub(crate) fn close_page(&self, shared: &SessionShared, page_key: &str) {
        self.lock().remove(page_key);
        shared.io_registry.remove(page_key);
        shared.pending.remove_all_for(page_key);
        shared.resolve_single_shot();
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }
}

/// Move a handler's layout into the session and kick off independent
/// resolution of its eventual parts.
fn seed_layout(session: &Arc<PageSession>, layout: Layout) {
    {
        let mut state = session.lock_state();
        state.menu_items = layout.menu_items;
        if let Some(children) = layout.children {
            state.children = Some(Value::Array(children));
        }
    }

    resolve_eventual(session, "title", layout.title, |state, value| {
        state.title = Some(value)
    });
    resolve_eventual(session, "description", layout.description, |state, value| {
        state.description = Some(value)
    });
}

fn resolve_eventual(
    session: &Arc<PageSession>,
    layout_key: &'static str,
    eventual: Option<Eventual<String>>,
    apply: impl FnOnce(&mut RenderState, String) + Send + 'static,
) {
    let Some(eventual) = eventual else { return };

    // Immediate values land before the first send; no extra hop.
    let eventual = match eventual {
        Eventual::Immediate(value) => {
            apply(&mut session.lock_state(), value);
            return;
        }
        deferred => deferred,
    };

    let session = session.clone();
    tokio::spawn(async move {
        match eventual.resolve().await {
            Ok(value) => apply(&mut session.lock_state(), value),
            Err(e) => session.record_error(layout_key, &e),
        }
        session.schedule_send();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn eventual_resolution_paths() {
        let immediate: Eventual<String> = "now".into();
        assert_eq!(immediate.resolve().await.unwrap(), "now");

        let lazy = Eventual::lazy(|| Ok("later".to_string()));
        assert_eq!(lazy.resolve().await.unwrap(), "later");

        let fut = Eventual::future(async { Ok("eventually".to_string()) });
        assert_eq!(fut.resolve().await.unwrap(), "eventually");

        let failing = Eventual::<String>::lazy(|| Err(HandlerError::msg("nope")));
        assert!(failing.resolve().await.is_err());
    }
}
