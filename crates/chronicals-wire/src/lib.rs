//! Wire protocol contract for the Chronicals host SDK.
//!
//! This crate defines everything that crosses the WebSocket between a host
//! and the orchestrator, and nothing that doesn't:
//!
//! - [`frame`]: the socket-level envelope (messages, acks, chunks)
//! - [`envelope`]: the duplex RPC envelope (calls and responses correlated
//!   by id)
//! - [`methods`]: the two method dictionaries — what the host may call on
//!   the orchestrator and what the orchestrator may call on the host — with
//!   typed inputs and outputs
//! - [`types`]: shared payload types (users, definitions, loading states,
//!   transaction results, page layouts)
//! - [`meta`]: the tagged-meta codec used to revive rich values (dates)
//!   out of plain JSON params
//! - [`slug`]: route slug validation
//!
//! Render instructions and IO responses are deliberately opaque here: the
//! host relays them as serialized strings and never interprets widget
//! contents.

pub mod envelope;
pub mod frame;
pub mod meta;
pub mod methods;
pub mod slug;
pub mod types;

pub use envelope::RpcEnvelope;
pub use frame::Frame;
pub use methods::{
    BeginHostShutdownInputs, CloseTransactionInputs, ClosePageInputs, HostMethod,
    InitializeHostInputs, InitializeHostResult, IoResponseInputs, MarkTransactionCompleteInputs,
    NotifyInputs, OpenPageInputs, OpenPageResult, PeerCall, PeerCallError, SendIoCallInputs,
    SendLoadingCallInputs, SendLogInputs, SendOutput, SendPageInputs, SendRedirectInputs,
    ShutdownResult, StartTransactionInputs,
};
pub use slug::is_valid_slug;
pub use types::{
    AccessControl, AccessLevel, ActionDefinition, ActionDescriptor, BasicLayout, ContextUser,
    IoResponseKind, IoResponseMessage, LayoutError, LoadingState, MenuItem,
    NotificationDelivery, OrganizationDef, PageDefinition, ResultStatus, SdkAlert,
    TransactionResultEnvelope,
};
