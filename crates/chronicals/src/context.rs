//! Handler context: everything an action or page handler can reach
//! besides its IO client.
//!
//! Context is plumbed explicitly — it is the first-class argument to every
//! handler, never ambient process state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::warn;

use chronicals_wire::methods::{
    SendLoadingCall, SendLoadingCallInputs, SendLog, SendLogInputs, SendRedirect,
    SendRedirectInputs,
};
use chronicals_wire::types::{
    ActionDescriptor, ContextUser, LoadingState, NotificationDelivery, OrganizationDef,
};

use crate::host::SessionShared;
use crate::logger::{join_log_args, LogArg};

/// Where a redirect should take the user.
#[derive(Debug, Clone, Default)]
pub struct RedirectProps {
    pub route: Option<String>,
    pub url: Option<String>,
    pub params: Option<Value>,
    pub replace: bool,
}

/// A notification request, delegated to the parent `Chronicals` object.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub title: Option<String>,
    pub message: String,
    pub deliveries: Vec<NotificationDelivery>,
}

/// Per-invocation context handed to handlers. Cheap to clone.
#[derive(Clone)]
pub struct HandlerContext {
    pub user: ContextUser,
    pub params: Value,
    pub environment: String,
    pub organization: Option<OrganizationDef>,
    /// The invoked route, as the orchestrator named it.
    pub route: ActionDescriptor,
    scope_key: String,
    log_index: Arc<AtomicU64>,
    shared: Arc<SessionShared>,
}

impl HandlerContext {
    pub(crate) fn new(
        user: ContextUser,
        params: Value,
        environment: String,
        organization: Option<OrganizationDef>,
        route: ActionDescriptor,
        scope_key: String,
        shared: Arc<SessionShared>,
    ) -> Self {
        Self {
            user,
            params,
            environment,
            organization,
            route,
            scope_key,
            log_index: Arc::new(AtomicU64::new(0)),
            shared,
        }
    }

    /// The transaction id (or page key) this context belongs to.
    pub fn scope_key(&self) -> &str {
        &self.scope_key
    }

    /// Send a log entry to the orchestrator.
    ///
    /// Entries carry a per-context monotonic index starting at 0, so the
    /// dashboard can order them even when network retries reorder
    /// delivery. Logging never fails the handler; delivery problems are
    /// reported through the SDK's own diagnostics.
    pub async fn log<I, A>(&self, args: I)
    where
        I: IntoIterator<Item = A>,
        A: Into<LogArg>,
    {
        let args: Vec<LogArg> = args.into_iter().map(Into::into).collect();
        let index = self.log_index.fetch_add(1, Ordering::SeqCst);
        let inputs = SendLogInputs {
            transaction_id: self.scope_key.clone(),
            data: join_log_args(&args),
            index,
            timestamp: Utc::now().timestamp_millis(),
        };
        if let Err(e) = self.shared.send_with_retry::<SendLog>(&inputs).await {
            warn!(error = %e, transaction_id = %self.scope_key, "failed to deliver log");
        }
    }

    /// Loading feedback scoped to this invocation.
    pub fn loading(&self) -> LoadingHandle {
        LoadingHandle {
            scope_key: self.scope_key.clone(),
            shared: self.shared.clone(),
        }
    }

    /// Redirect the user elsewhere when the transaction completes.
    pub async fn redirect(&self, props: RedirectProps) -> Result<(), crate::error::HandlerError> {
        let inputs = SendRedirectInputs {
            transaction_id: self.scope_key.clone(),
            route: props.route,
            url: props.url,
            params: props.params,
            replace: props.replace.then_some(true),
        };
        let output = self.shared.send_with_retry::<SendRedirect>(&inputs).await?;
        if output.is_success() {
            Ok(())
        } else {
            Err(crate::error::HandlerError::msg("redirect was rejected"))
        }
    }

    /// Notify people through the orchestrator's delivery channels.
    pub async fn notify(&self, config: NotifyConfig) -> Result<(), crate::error::HandlerError> {
        self.shared
            .notify(Some(self.scope_key.clone()), config)
            .await
    }
}

/// `ctx.loading()` handle: sets and updates the loading state shown while
/// the handler works.
#[derive(Clone)]
pub struct LoadingHandle {
    scope_key: String,
    shared: Arc<SessionShared>,
}

impl LoadingHandle {
    /// Replace the loading state. The state is remembered as a pending
    /// artifact until an IO call supersedes it or the invocation closes,
    /// so a reconnect replays whatever the user last saw.
    pub async fn set(&self, state: LoadingState) {
        self.shared
            .pending
            .set_loading(&self.scope_key, state.clone());
        let inputs = SendLoadingCallInputs {
            transaction_id: self.scope_key.clone(),
            loading_state: state,
        };
        match self.shared.send_with_retry::<SendLoadingCall>(&inputs).await {
            Ok(output) if output.is_success() => {}
            Ok(_) => {
                warn!(key = %self.scope_key, "orchestrator rejected loading state");
                self.shared.pending.remove_loading(&self.scope_key);
            }
            Err(e) => {
                // Entry stays pending; the resend engine replays it.
                warn!(error = %e, key = %self.scope_key, "loading state delivery deferred");
            }
        }
    }

    /// Bump queue-progress counters on the current state.
    pub async fn update(&self, items_completed: u64) {
        let current = self
            .shared
            .pending
            .loading_states()
            .into_iter()
            .find(|(key, _)| key == &self.scope_key)
            .map(|(_, state)| state)
            .unwrap_or_default();
        self.set(LoadingState {
            items_completed: Some(items_completed),
            ..current
        })
        .await;
    }
}
