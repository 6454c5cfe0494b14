//! Host session: the lifecycle that ties everything together.
//!
//! `Chronicals` is the object applications hold. Internally a
//! [`HostSession`] owns the connection lifecycle — connect, declare,
//! serve, reconnect, drain — and implements the peer-call dispatch that
//! feeds the transaction and page managers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use chronicals_wire::methods::{
    BeginHostShutdown, BeginHostShutdownInputs, HostMethod, InitializeHost, InitializeHostInputs,
    InitializeHostResult, Notify, NotifyInputs, PeerCall, SendIoCall, SendIoCallInputs,
    SendLoadingCall, SendLoadingCallInputs, SendOutput, SendPage, SendPageInputs,
};
use chronicals_wire::types::OrganizationDef;

use crate::config::ChronicalsConfig;
use crate::context::NotifyConfig;
use crate::error::{HandlerError, HostError};
use crate::io::IoResponseRegistry;
use crate::page::PageManager;
use crate::pending::PendingArtifacts;
use crate::routes::{Route, RouteDefinitions, RouteTable};
use crate::rpc::{ConnectionClosed, DuplexRpcClient, PeerRequestHandler};
use crate::shutdown::ShutdownCoordinator;
use crate::socket::{SocketConfig, TransportSocket, DEFAULT_CHUNK_SIZE};
use crate::transaction;

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    Idle,
    Connecting,
    Initializing,
    Serving,
    Reconnecting,
    Draining,
    Closed,
    Failed,
}

/// State shared across the session, the managers, and handler contexts.
pub(crate) struct SessionShared {
    pub(crate) config: ChronicalsConfig,
    pub(crate) rpc: DuplexRpcClient,
    pub(crate) pending: PendingArtifacts,
    pub(crate) io_registry: IoResponseRegistry,
    pub(crate) routes: RwLock<RouteTable>,
    pub(crate) shutdown: ShutdownCoordinator,
    organization: RwLock<Option<OrganizationDef>>,
    environment: RwLock<Option<String>>,
    single_shot: Mutex<Option<oneshot::Sender<()>>>,
}

impl SessionShared {
    /// Whether SDK chatter at `level` should emit under the configured
    /// log level. Warnings and errors bypass this.
    pub(crate) fn log_enabled(&self, level: crate::logger::LogLevel) -> bool {
        self.config.log_level >= level
    }

    pub(crate) fn organization(&self) -> Option<OrganizationDef> {
        self.organization
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn environment(&self) -> Option<String> {
        self.environment
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The outer send: retry TIMEOUTs with linear backoff and a widening
    /// per-attempt window; any other failure is final.
    pub(crate) async fn send_with_retry<M: HostMethod>(
        &self,
        input: &M::Input,
    ) -> Result<M::Output, HostError> {
        let attempts = self.config.max_resend_attempts.max(1);
        for attempt in 1..=attempts {
            match self.rpc.send::<M>(input, attempt).await {
                Ok(output) => return Ok(output),
                Err(e) if e.is_timeout() => {
                    debug!(method = M::NAME, attempt, "rpc send timed out");
                    if attempt < attempts {
                        tokio::time::sleep(self.config.retry_interval * attempt).await;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(HostError::MaxRetries {
            method: M::NAME,
            attempts,
        })
    }

    pub(crate) async fn notify(
        &self,
        transaction_id: Option<String>,
        config: NotifyConfig,
    ) -> Result<(), HandlerError> {
        let inputs = NotifyInputs {
            transaction_id,
            title: config.title,
            message: config.message,
            deliveries: config.deliveries,
        };
        let output = self.send_with_retry::<Notify>(&inputs).await?;
        if output.is_success() {
            Ok(())
        } else {
            Err(HandlerError::msg("notification was rejected"))
        }
    }

    /// Arm single-shot mode: the returned receiver resolves when the one
    /// served request terminates.
    pub(crate) fn arm_single_shot(&self) -> oneshot::Receiver<()> {
        let (done_tx, done_rx) = oneshot::channel();
        *self.lock_single_shot() = Some(done_tx);
        done_rx
    }

    /// Resolve the single-shot completion callback, if armed. Invoked at
    /// most once; later calls are no-ops.
    pub(crate) fn resolve_single_shot(&self) {
        if let Some(done_tx) = self.lock_single_shot().take() {
            let _ = done_tx.send(());
        }
    }

    /// Resolve the single-shot callback after the completion-ack grace
    /// period.
    pub(crate) fn schedule_single_shot_completion(self: &Arc<Self>) {
        if self.lock_single_shot().is_none() {
            return;
        }
        let shared = self.clone();
        let delay = self.config.complete_http_request_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.resolve_single_shot();
        });
    }

    fn lock_single_shot(&self) -> MutexGuard<'_, Option<oneshot::Sender<()>>> {
        self.single_shot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_identity(&self, organization: OrganizationDef, environment: String) {
        *self
            .organization
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(organization);
        *self
            .environment
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(environment);
    }
}

pub(crate) struct HostSession {
    shared: Arc<SessionShared>,
    pages: PageManager,
    instance_id: String,
    status: Mutex<HostStatus>,
    socket: Mutex<Option<Arc<TransportSocket>>>,
    last_pong: Mutex<Instant>,
    intentionally_closed: AtomicBool,
    close_rx: Mutex<Option<mpsc::UnboundedReceiver<ConnectionClosed>>>,
    ping_task: Mutex<Option<JoinHandle<()>>>,
    watcher_task: Mutex<Option<JoinHandle<()>>>,
    reinit_timer: Mutex<Option<JoinHandle<()>>>,
}

impl HostSession {
    fn new(config: ChronicalsConfig, routes: RouteTable) -> Arc<Self> {
        let (close_tx, close_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SessionShared {
            config,
            rpc: DuplexRpcClient::new(close_tx),
            pending: PendingArtifacts::default(),
            io_registry: IoResponseRegistry::default(),
            routes: RwLock::new(routes),
            shutdown: ShutdownCoordinator::default(),
            organization: RwLock::new(None),
            environment: RwLock::new(None),
            single_shot: Mutex::new(None),
        });

        let session = Arc::new(Self {
            shared,
            pages: PageManager::default(),
            instance_id: uuid::Uuid::new_v4().to_string(),
            status: Mutex::new(HostStatus::Idle),
            socket: Mutex::new(None),
            last_pong: Mutex::new(Instant::now()),
            intentionally_closed: AtomicBool::new(false),
            close_rx: Mutex::new(Some(close_rx)),
            ping_task: Mutex::new(None),
            watcher_task: Mutex::new(None),
            reinit_timer: Mutex::new(None),
        });
        let session_dyn: Arc<dyn PeerRequestHandler> = session.clone();
        let weak: Weak<dyn PeerRequestHandler> = Arc::downgrade(&session_dyn);
        session.shared.rpc.set_request_handler(weak);
        session
    }

    fn status(&self) -> HostStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, status: HostStatus) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }

    fn socket_config(&self) -> SocketConfig {
        SocketConfig {
            endpoint: self.shared.config.endpoint.clone(),
            instance_id: self.instance_id.clone(),
            api_key: self.shared.config.api_key.clone(),
            connect_timeout: self.shared.config.connect_timeout,
            send_timeout: self.shared.config.send_timeout,
            ping_timeout: self.shared.config.ping_timeout,
            chunk_size: DEFAULT_CHUNK_SIZE,
            verbose_message_logs: self.shared.config.verbose_message_logs,
        }
    }

    fn current_socket(&self) -> Option<Arc<TransportSocket>> {
        self.socket.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn install_socket(&self, socket: Arc<TransportSocket>) {
        *self.socket.lock().unwrap_or_else(|e| e.into_inner()) = Some(socket);
        *self.last_pong.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    /// Connect, declare, and start serving. Initial connect and declare
    /// failures are terminal — no retry until `listen` is called again.
    ///
    /// When `request_id` is set the session is single-shot: connection
    /// loss ends the request instead of triggering a reconnect.
    async fn listen(self: &Arc<Self>, request_id: Option<String>) -> Result<(), HostError> {
        let single_shot = request_id.is_some();
        self.set_status(HostStatus::Connecting);
        let (socket, events) = match TransportSocket::connect(self.socket_config()).await {
            Ok(connected) => connected,
            Err(e) => {
                self.set_status(HostStatus::Failed);
                return Err(e.into());
            }
        };
        self.shared.rpc.set_communicator(socket.clone(), events);
        self.install_socket(socket);

        self.set_status(HostStatus::Initializing);
        if let Err(e) = self.initialize_host(request_id, true).await {
            self.set_status(HostStatus::Failed);
            return Err(e);
        }

        self.set_status(HostStatus::Serving);
        self.spawn_ping_loop();
        if single_shot {
            self.spawn_single_shot_close_watcher();
        } else {
            self.spawn_close_watcher();
        }
        if self.shared.log_enabled(crate::logger::LogLevel::Info) {
            info!(instance_id = %self.instance_id, "host is serving");
        }
        Ok(())
    }

    /// Single-shot sessions never reconnect: a lost connection terminates
    /// the request.
    fn spawn_single_shot_close_watcher(self: &Arc<Self>) {
        let Some(mut close_rx) = self
            .close_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            return;
        };
        let session = self.clone();
        let task = tokio::spawn(async move {
            if close_rx.recv().await.is_some()
                && !session.intentionally_closed.load(Ordering::SeqCst)
            {
                warn!("connection lost during single-shot request");
                session.shared.resolve_single_shot();
            }
        });
        *self.watcher_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
    }

    /// Declare (or re-declare) the route table.
    ///
    /// `initial` governs the all-slugs-invalid rule: fatal on the first
    /// declare, a warning on re-declares.
    async fn initialize_host(
        &self,
        request_id: Option<String>,
        initial: bool,
    ) -> Result<(), HostError> {
        let defs = {
            let routes = self.shared.routes.read().unwrap_or_else(|e| e.into_inner());
            routes.definitions()
        };
        if !defs.invalid_slugs.is_empty() {
            warn!(slugs = ?defs.invalid_slugs, "declaring routes with invalid slugs");
        }

        let inputs = InitializeHostInputs {
            actions: defs.actions.clone(),
            groups: defs.groups.clone(),
            sdk_name: env!("CARGO_PKG_NAME").to_string(),
            sdk_version: env!("CARGO_PKG_VERSION").to_string(),
            request_id,
            timestamp: Utc::now().timestamp_millis(),
        };

        match self.shared.send_with_retry::<InitializeHost>(&inputs).await? {
            InitializeHostResult::Success {
                organization,
                environment,
                dashboard_url,
                invalid_slugs,
                warnings,
                sdk_alert,
            } => {
                for warning in &warnings {
                    warn!(%warning, "declare warning");
                }
                if let Some(alert) = &sdk_alert {
                    warn!(severity = %alert.severity, message = ?alert.message, "sdk alert");
                }
                if let Some(url) = &dashboard_url {
                    if self.shared.log_enabled(crate::logger::LogLevel::Prod) {
                        info!(dashboard_url = %url, organization = %organization.slug, "declared host");
                    }
                }

                if !invalid_slugs.is_empty() {
                    if initial && covers_all_actions(&defs, &invalid_slugs) {
                        return Err(HostError::Fatal(format!(
                            "every declared slug is invalid: {invalid_slugs:?}"
                        )));
                    }
                    warn!(slugs = ?invalid_slugs, "orchestrator rejected some slugs");
                }

                self.shared.set_identity(organization, environment);
                Ok(())
            }
            InitializeHostResult::Error { message, .. } => Err(HostError::Fatal(
                message.unwrap_or_else(|| "declare was rejected".to_string()),
            )),
        }
    }

    fn spawn_close_watcher(self: &Arc<Self>) {
        let Some(mut close_rx) = self
            .close_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            return;
        };
        let session = self.clone();
        let task = tokio::spawn(async move {
            while let Some(closed) = close_rx.recv().await {
                if session.intentionally_closed.load(Ordering::SeqCst) {
                    break;
                }
                // A close event is only actionable when the current socket
                // really is down; events from sockets already replaced
                // during a reconnect are stale.
                if session
                    .current_socket()
                    .map(|socket| socket.is_open())
                    .unwrap_or(false)
                {
                    debug!(code = ?closed.code, "ignoring stale close event");
                    continue;
                }
                warn!(
                    code = ?closed.code,
                    reason = ?closed.reason,
                    "connection lost, reconnecting"
                );
                session.set_status(HostStatus::Reconnecting);
                session.reconnect().await;
                if session.status() != HostStatus::Serving {
                    break;
                }
            }
        });
        *self.watcher_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
    }

    /// Open replacement sockets under the same instance id until one
    /// declares successfully, then replay pending artifacts.
    async fn reconnect(self: &Arc<Self>) {
        loop {
            if self.intentionally_closed.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(self.shared.config.retry_interval).await;

            let (socket, events) = match TransportSocket::connect(self.socket_config()).await {
                Ok(connected) => connected,
                Err(e) => {
                    debug!(error = %e, "reconnect attempt failed");
                    continue;
                }
            };
            self.shared.rpc.set_communicator(socket.clone(), events);
            self.install_socket(socket.clone());

            match self.initialize_host(None, false).await {
                Ok(()) => {
                    self.set_status(HostStatus::Serving);
                    if self.shared.log_enabled(crate::logger::LogLevel::Prod) {
                        info!(instance_id = %self.instance_id, "reconnected");
                    }
                    replay_pending(&self.shared, None).await;
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "re-declare after reconnect failed");
                    socket.force_close();
                    // The forced close posts another event; consume the
                    // retry from this loop instead.
                    continue;
                }
            }
        }
    }

    fn spawn_ping_loop(self: &Arc<Self>) {
        let session = self.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(session.shared.config.ping_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await; // immediate first tick
            loop {
                interval.tick().await;
                if session.status() != HostStatus::Serving {
                    continue;
                }
                let Some(socket) = session.current_socket() else {
                    continue;
                };
                match socket.ping().await {
                    Ok(()) => {
                        *session.last_pong.lock().unwrap_or_else(|e| e.into_inner()) =
                            Instant::now();
                    }
                    Err(e) => {
                        let stale = session
                            .last_pong
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .elapsed();
                        warn!(error = %e, stale_ms = stale.as_millis() as u64, "ping failed");
                        if stale > session.shared.config.close_unresponsive_connection_timeout {
                            warn!("connection unresponsive, forcing close");
                            socket.force_close();
                        }
                    }
                }
            }
        });
        *self.ping_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
    }

    /// Debounced route-table re-declare.
    fn handle_actions_change(self: &Arc<Self>) {
        let mut timer = self.reinit_timer.lock().unwrap_or_else(|e| e.into_inner());
        if timer.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let session = self.clone();
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(session.shared.config.reinitialize_batch_timeout).await;
            if session.status() != HostStatus::Serving {
                return;
            }
            if let Err(e) = session.initialize_host(None, false).await {
                warn!(error = %e, "re-declare after route change failed");
            }
        }));
    }

    /// Quiesce: refuse new work, drain in-flight conversations, close.
    async fn safely_close(self: &Arc<Self>) {
        if !self.shared.shutdown.begin() {
            return;
        }
        self.set_status(HostStatus::Draining);

        match self
            .shared
            .send_with_retry::<BeginHostShutdown>(&BeginHostShutdownInputs {})
            .await
        {
            Ok(chronicals_wire::methods::ShutdownResult::Success {}) => {}
            Ok(chronicals_wire::methods::ShutdownResult::Error { message }) => {
                warn!(message = ?message, "orchestrator rejected shutdown notice");
            }
            Err(e) => warn!(error = %e, "failed to announce shutdown"),
        }

        let drained = tokio::time::timeout(
            self.shared.config.shutdown_drain_timeout,
            self.shared.io_registry.wait_empty(),
        )
        .await;
        if drained.is_err() {
            warn!(
                remaining = self.shared.io_registry.len(),
                "drain timed out with conversations still live"
            );
        }
        tokio::time::sleep(self.shared.config.complete_shutdown_delay).await;

        self.immediately_close();
    }

    /// Synchronous teardown: terminate RPC, close the socket, forget all
    /// pending state.
    fn immediately_close(&self) {
        self.intentionally_closed.store(true, Ordering::SeqCst);
        self.set_status(HostStatus::Closed);

        self.shared.rpc.shutdown();
        if let Some(socket) = self
            .socket
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            socket.close();
            socket.force_close();
        }
        for task in [&self.ping_task, &self.watcher_task, &self.reinit_timer] {
            if let Some(task) = task.lock().unwrap_or_else(|e| e.into_inner()).take() {
                task.abort();
            }
        }
        self.shared.pending.clear();
        self.shared.io_registry.clear();
        self.pages.clear();
        self.shared.resolve_single_shot();
    }
}

#[async_trait]
impl PeerRequestHandler for HostSession {
    async fn handle_peer_call(&self, call: PeerCall) -> Value {
        match call {
            PeerCall::StartTransaction(inputs) => {
                transaction::handle_start_transaction(&self.shared, inputs);
                Value::Null
            }
            PeerCall::IoResponse(inputs) => {
                transaction::handle_io_response(&self.shared, inputs);
                Value::Null
            }
            PeerCall::CloseTransaction(inputs) => {
                transaction::handle_close_transaction(&self.shared, &inputs.transaction_id);
                Value::Null
            }
            PeerCall::OpenPage(inputs) => {
                let result = self.pages.open_page(&self.shared, inputs).await;
                serde_json::to_value(result).unwrap_or(Value::Null)
            }
            PeerCall::ClosePage(inputs) => {
                self.pages.close_page(&self.shared, &inputs.page_key);
                Value::Null
            }
        }
    }
}

fn covers_all_actions(defs: &RouteDefinitions, invalid_slugs: &[String]) -> bool {
    let invalid: HashSet<&str> = invalid_slugs.iter().map(String::as_str).collect();
    !defs.actions.is_empty()
        && defs
            .actions
            .iter()
            .all(|action| invalid.contains(action.slug.as_str()))
}

/// Replay the pending maps after a reconnect.
///
/// `only` limits the replay to a subset of ids (unused at reconnect;
/// reserved for the single-shot adapter). Attempt numbering starts at 1
/// for every artifact kind, and backoff is linear in the attempt.
pub(crate) async fn replay_pending(shared: &Arc<SessionShared>, only: Option<&HashSet<String>>) {
    let wanted = |id: &str| only.map_or(true, |keys| keys.contains(id));

    for (transaction_id, io_call) in shared.pending.io_calls() {
        if !wanted(&transaction_id) {
            continue;
        }
        let inputs = SendIoCallInputs {
            transaction_id: transaction_id.clone(),
            io_call,
        };
        let delivered = replay_one::<SendIoCall>(shared, &inputs, &transaction_id).await;
        if delivered {
            shared.pending.remove_io_call(&transaction_id);
        }
    }

    for (page_key, page) in shared.pending.layouts() {
        if !wanted(&page_key) {
            continue;
        }
        let inputs = SendPageInputs {
            page_key: page_key.clone(),
            page: Some(page),
        };
        let delivered = replay_one::<SendPage>(shared, &inputs, &page_key).await;
        if delivered {
            shared.pending.remove_layout(&page_key);
        }
    }

    for (transaction_id, loading_state) in shared.pending.loading_states() {
        if !wanted(&transaction_id) {
            continue;
        }
        let inputs = SendLoadingCallInputs {
            transaction_id: transaction_id.clone(),
            loading_state,
        };
        let delivered = replay_one::<SendLoadingCall>(shared, &inputs, &transaction_id).await;
        if delivered {
            shared.pending.remove_loading(&transaction_id);
        }
    }
}

/// Replay a single artifact. Returns `true` when the entry should leave
/// the pending map: delivered, or terminally rejected by the peer.
async fn replay_one<M>(shared: &Arc<SessionShared>, inputs: &M::Input, id: &str) -> bool
where
    M: HostMethod<Output = SendOutput>,
{
    let attempts = shared.config.max_resend_attempts.max(1);
    for attempt in 1..=attempts {
        match shared.rpc.send::<M>(inputs, attempt).await {
            Ok(SendOutput::Success {}) => return true,
            Ok(SendOutput::Error { message }) => {
                // Terminal: the transaction or page is gone on the peer.
                debug!(method = M::NAME, id, message = ?message, "replay rejected");
                return true;
            }
            Err(e) => {
                debug!(method = M::NAME, id, attempt, error = %e, "replay attempt failed");
                if attempt < attempts {
                    tokio::time::sleep(shared.config.retry_interval * attempt).await;
                }
            }
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// A Chronicals host: routes plus a connection lifecycle.
pub struct Chronicals {
    session: Arc<HostSession>,
}

impl std::fmt::Debug for Chronicals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chronicals").finish_non_exhaustive()
    }
}

impl Chronicals {
    /// Start building a host against an orchestrator endpoint.
    pub fn builder(endpoint: impl Into<String>) -> ChronicalsBuilder {
        ChronicalsBuilder {
            config: ChronicalsConfig::new(endpoint),
            routes: RouteTable::default(),
        }
    }

    /// Connect, declare routes, and serve until closed. Resolves once the
    /// host reaches `Serving`; work continues on background tasks.
    pub async fn listen(&self) -> Result<(), HostError> {
        self.session.listen(None).await
    }

    /// Serve exactly one request: connect with `request_id`, handle the
    /// one transaction or page the orchestrator routes back, then close.
    /// No reconnection is attempted within the request.
    pub async fn serve_request(&self, request_id: impl Into<String>) -> Result<(), HostError> {
        let done = self.session.shared.arm_single_shot();
        self.session.listen(Some(request_id.into())).await?;
        let _ = done.await;
        self.session.immediately_close();
        Ok(())
    }

    /// Add or replace a route. Triggers a debounced re-declare when
    /// serving.
    pub fn add_route(&self, slug: impl Into<String>, route: impl Into<Route>) {
        {
            let mut routes = self
                .session
                .shared
                .routes
                .write()
                .unwrap_or_else(|e| e.into_inner());
            routes.insert(slug, route);
        }
        self.session.handle_actions_change();
    }

    /// Remove a route. Triggers a debounced re-declare when serving.
    pub fn remove_route(&self, slug: &str) {
        {
            let mut routes = self
                .session
                .shared
                .routes
                .write()
                .unwrap_or_else(|e| e.into_inner());
            routes.remove(slug);
        }
        self.session.handle_actions_change();
    }

    /// Send a notification outside any transaction context.
    pub async fn notify(&self, config: NotifyConfig) -> Result<(), HandlerError> {
        self.session.shared.notify(None, config).await
    }

    pub fn status(&self) -> HostStatus {
        self.session.status()
    }

    /// The organization this host declared under, once serving.
    pub fn organization(&self) -> Option<OrganizationDef> {
        self.session.shared.organization()
    }

    /// The environment the orchestrator assigned, once serving.
    pub fn environment(&self) -> Option<String> {
        self.session.shared.environment()
    }

    /// Refuse new work, drain in-flight conversations (bounded), then
    /// close.
    pub async fn safely_close(&self) {
        self.session.safely_close().await;
    }

    /// Tear everything down right now.
    pub fn immediately_close(&self) {
        self.session.immediately_close();
    }
}

/// Builder for [`Chronicals`], mirroring the config surface.
pub struct ChronicalsBuilder {
    config: ChronicalsConfig,
    routes: RouteTable,
}

impl ChronicalsBuilder {
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.config.api_key = Some(api_key.into());
        self
    }

    pub fn log_level(mut self, log_level: crate::logger::LogLevel) -> Self {
        self.config.log_level = log_level;
        self
    }

    pub fn route(mut self, slug: impl Into<String>, route: impl Into<Route>) -> Self {
        self.routes.insert(slug, route);
        self
    }

    pub fn routes(mut self, routes: RouteTable) -> Self {
        self.routes = routes;
        self
    }

    pub fn retry_interval(mut self, value: std::time::Duration) -> Self {
        self.config.retry_interval = value;
        self
    }

    pub fn ping_interval(mut self, value: std::time::Duration) -> Self {
        self.config.ping_interval = value;
        self
    }

    pub fn ping_timeout(mut self, value: std::time::Duration) -> Self {
        self.config.ping_timeout = value;
        self
    }

    pub fn connect_timeout(mut self, value: std::time::Duration) -> Self {
        self.config.connect_timeout = value;
        self
    }

    pub fn send_timeout(mut self, value: std::time::Duration) -> Self {
        self.config.send_timeout = value;
        self
    }

    pub fn close_unresponsive_connection_timeout(mut self, value: std::time::Duration) -> Self {
        self.config.close_unresponsive_connection_timeout = value;
        self
    }

    pub fn reinitialize_batch_timeout(mut self, value: std::time::Duration) -> Self {
        self.config.reinitialize_batch_timeout = value;
        self
    }

    pub fn complete_http_request_delay(mut self, value: std::time::Duration) -> Self {
        self.config.complete_http_request_delay = value;
        self
    }

    pub fn complete_shutdown_delay(mut self, value: std::time::Duration) -> Self {
        self.config.complete_shutdown_delay = value;
        self
    }

    pub fn shutdown_drain_timeout(mut self, value: std::time::Duration) -> Self {
        self.config.shutdown_drain_timeout = value;
        self
    }

    pub fn max_resend_attempts(mut self, value: u32) -> Self {
        self.config.max_resend_attempts = value;
        self
    }

    pub fn verbose_message_logs(mut self, value: bool) -> Self {
        self.config.verbose_message_logs = value;
        self
    }

    pub fn on_error(mut self, hook: crate::config::OnErrorFn) -> Self {
        self.config.on_error = Some(hook);
        self
    }

    /// Validate and construct the host.
    pub fn build(self) -> Result<Chronicals, HostError> {
        if !(self.config.endpoint.starts_with("ws://")
            || self.config.endpoint.starts_with("wss://"))
        {
            return Err(HostError::Config(format!(
                "endpoint must be a ws:// or wss:// url, got {}",
                self.config.endpoint
            )));
        }
        Ok(Chronicals {
            session: HostSession::new(self.config, self.routes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicals_wire::types::ActionDefinition;

    fn action_def(slug: &str) -> ActionDefinition {
        ActionDefinition {
            group_slug: None,
            slug: slug.to_string(),
            name: None,
            description: None,
            backgroundable: false,
            warn_on_close: false,
            unlisted: false,
            access: None,
        }
    }

    #[test]
    fn covers_all_actions_requires_every_slug() {
        let defs = RouteDefinitions {
            actions: vec![action_def("!bad"), action_def("fine")],
            groups: Vec::new(),
            invalid_slugs: Vec::new(),
        };
        assert!(!covers_all_actions(&defs, &["!bad".to_string()]));
        assert!(covers_all_actions(
            &defs,
            &["!bad".to_string(), "fine".to_string()]
        ));
    }

    #[test]
    fn covers_all_actions_is_false_for_empty_tables() {
        let defs = RouteDefinitions::default();
        assert!(!covers_all_actions(&defs, &[]));
    }

    #[test]
    fn builder_rejects_non_websocket_endpoints() {
        let err = Chronicals::builder("https://example.com").build().unwrap_err();
        assert!(matches!(err, HostError::Config(_)));

        assert!(Chronicals::builder("wss://example.com/ws").build().is_ok());
    }
}
