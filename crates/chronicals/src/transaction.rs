//! Transaction lifecycle: one action invocation and its bidirectional
//! conversation.
//!
//! A transaction exists from START_TRANSACTION until CLOSE_TRANSACTION or
//! handler completion (deferred when `displayResolvesImmediately` asks the
//! result screen to stay interactive). The io-response registry entry *is*
//! the liveness record: claiming it makes duplicate starts idempotent, and
//! removing it is what cancels a suspended prompt.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use chronicals_wire::meta::decode_params;
use chronicals_wire::methods::{
    IoResponseInputs, MarkTransactionComplete, MarkTransactionCompleteInputs, SendIoCall,
    SendIoCallInputs, SendOutput, StartTransactionInputs,
};
use chronicals_wire::types::{IoResponseMessage, TransactionResultEnvelope};

use crate::config::OnErrorEvent;
use crate::context::HandlerContext;
use crate::error::{HandlerError, IoError};
use crate::host::SessionShared;
use crate::io::{IoClient, IoSender};
use crate::routes::ActionHandler;

/// Delivery path for a transaction's render instructions: record as a
/// pending artifact, push through the RPC layer, and map the outcome.
pub(crate) struct TransactionIoSender {
    pub(crate) shared: Arc<SessionShared>,
    pub(crate) transaction_id: String,
}

#[async_trait::async_trait]
impl IoSender for TransactionIoSender {
    async fn send_render(&self, serialized: String) -> Result<(), IoError> {
        self.shared
            .pending
            .set_io_call(&self.transaction_id, serialized.clone());
        let inputs = SendIoCallInputs {
            transaction_id: self.transaction_id.clone(),
            io_call: serialized,
        };
        match self.shared.send_with_retry::<SendIoCall>(&inputs).await {
            Ok(SendOutput::Success {}) => {
                self.shared.pending.remove_io_call(&self.transaction_id);
                self.shared.pending.remove_loading(&self.transaction_id);
                Ok(())
            }
            Ok(SendOutput::Error { message }) => {
                self.shared.pending.remove_io_call(&self.transaction_id);
                Err(IoError::RenderError(message))
            }
            Err(e) => {
                // Connection trouble is invisible to handlers: the entry
                // stays pending and the resend engine replays it, after
                // which the user's answer routes back normally.
                warn!(
                    error = %e,
                    transaction_id = %self.transaction_id,
                    "io call delivery deferred to resend"
                );
                Ok(())
            }
        }
    }
}

/// Handle START_TRANSACTION. Dropped silently while shutting down, on an
/// unknown slug, and on a duplicate transaction id.
pub(crate) fn handle_start_transaction(shared: &Arc<SessionShared>, inputs: StartTransactionInputs) {
    if shared.shutdown.is_shutting_down() {
        debug!(transaction_id = %inputs.transaction_id, "refusing transaction during shutdown");
        return;
    }

    let handler = {
        let routes = shared.routes.read().unwrap_or_else(|e| e.into_inner());
        routes
            .find_action(&inputs.action.slug)
            .map(|(handler, _)| handler)
    };
    let Some(handler) = handler else {
        warn!(slug = %inputs.action.slug, "no action handler for slug");
        return;
    };

    let Some((response_rx, closed)) = shared.io_registry.register(&inputs.transaction_id) else {
        debug!(transaction_id = %inputs.transaction_id, "duplicate start ignored");
        return;
    };

    let sender = Arc::new(TransactionIoSender {
        shared: shared.clone(),
        transaction_id: inputs.transaction_id.clone(),
    });
    let io = IoClient::new(sender, response_rx, closed);

    let params = decode_params(inputs.params, inputs.params_meta.as_ref());
    let ctx = HandlerContext::new(
        inputs.user.clone(),
        params.clone(),
        inputs.environment.clone(),
        shared.organization(),
        inputs.action.clone(),
        inputs.transaction_id.clone(),
        shared.clone(),
    );

    let shared = shared.clone();
    tokio::spawn(run_transaction(
        shared,
        handler,
        io,
        ctx,
        TransactionInfo {
            transaction_id: inputs.transaction_id,
            slug: inputs.action.slug,
            params,
            environment: inputs.environment,
            user: inputs.user,
            display_resolves_immediately: inputs.display_resolves_immediately.unwrap_or(false),
        },
    ));
}

struct TransactionInfo {
    transaction_id: String,
    slug: String,
    params: Value,
    environment: String,
    user: chronicals_wire::types::ContextUser,
    display_resolves_immediately: bool,
}

async fn run_transaction(
    shared: Arc<SessionShared>,
    handler: Arc<dyn ActionHandler>,
    io: IoClient,
    ctx: HandlerContext,
    info: TransactionInfo,
) {
    let result = handler.run(io.clone(), ctx).await;

    if let Err(e) = &result {
        if e.is_teardown() {
            // The peer already tore this transaction down; no terminal
            // completion message is owed.
            debug!(transaction_id = %info.transaction_id, "handler unwound after teardown");
            close_transaction(&shared, &info.transaction_id, &io);
            return;
        }
    }

    let envelope = match result {
        Ok(data) => TransactionResultEnvelope::success(data, None),
        Err(e) => {
            if let Some(on_error) = &shared.config.on_error {
                on_error(OnErrorEvent {
                    error: error_kind(&e).to_string(),
                    message: e.to_string(),
                    route: info.slug.clone(),
                    params: info.params.clone(),
                    environment: info.environment.clone(),
                    user: info.user.clone(),
                    organization: shared.organization(),
                });
            }
            TransactionResultEnvelope::failure(error_kind(&e), e.to_string(), None)
        }
    };

    let complete = MarkTransactionCompleteInputs {
        transaction_id: info.transaction_id.clone(),
        result_status: envelope.status,
        result: serde_json::to_string(&envelope).unwrap_or_default(),
    };
    if let Err(e) = shared
        .send_with_retry::<MarkTransactionComplete>(&complete)
        .await
    {
        warn!(
            error = %e,
            transaction_id = %info.transaction_id,
            "failed to deliver transaction completion"
        );
    }

    shared.schedule_single_shot_completion();

    if !info.display_resolves_immediately {
        close_transaction(&shared, &info.transaction_id, &io);
    }
}

fn close_transaction(shared: &SessionShared, transaction_id: &str, io: &IoClient) {
    shared.io_registry.remove(transaction_id);
    shared.pending.remove_all_for(transaction_id);
    let dropped = io.drain_inline_actions();
    if !dropped.is_empty() {
        debug!(
            transaction_id = %transaction_id,
            count = dropped.len(),
            "dropped inline action keys"
        );
    }
}

fn error_kind(e: &HandlerError) -> &'static str {
    match e {
        HandlerError::Message(_) => "Error",
        HandlerError::Io(IoError::RenderError(_)) => "RenderError",
        HandlerError::Io(IoError::Rpc(_)) => "RpcError",
        HandlerError::Io(IoError::Canceled) => "Canceled",
        HandlerError::Io(IoError::TransactionClosed) => "TransactionClosed",
    }
}

/// Route an IO_RESPONSE to the owning conversation by the transaction id
/// embedded in its serialized `value`.
pub(crate) fn handle_io_response(shared: &SessionShared, inputs: IoResponseInputs) {
    match serde_json::from_str::<IoResponseMessage>(&inputs.value) {
        Ok(message) => shared.io_registry.route(message),
        Err(e) => warn!(error = %e, "discarding unparseable io response"),
    }
}

/// Handle CLOSE_TRANSACTION: cancel the suspended prompt, fail later io
/// attempts, and clear pending artifacts.
pub(crate) fn handle_close_transaction(shared: &SessionShared, transaction_id: &str) {
    shared.io_registry.remove(transaction_id);
    shared.pending.remove_all_for(transaction_id);
    // In single-shot mode a closed transaction terminates the request.
    shared.resolve_single_shot();
}
