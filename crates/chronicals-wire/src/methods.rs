//! The two duplex RPC method dictionaries.
//!
//! Host-to-peer methods are zero-sized markers implementing [`HostMethod`],
//! pairing a wire name with typed inputs and outputs; the RPC client is
//! generic over them, so a call site names the method once and both sides
//! of the exchange are validated by construction.
//!
//! Peer-to-host methods arrive as `(methodName, data)` pairs and parse into
//! the [`PeerCall`] enum; an unrecognized name or a payload that doesn't
//! validate is a [`PeerCallError`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{
    ActionDefinition, ActionDescriptor, ContextUser, LoadingState, NotificationDelivery,
    OrganizationDef, PageDefinition, ResultStatus, SdkAlert,
};

/// A method the host may call on the orchestrator.
pub trait HostMethod {
    const NAME: &'static str;
    type Input: Serialize + Send + Sync;
    type Output: DeserializeOwned + Send;
}

macro_rules! host_method {
    ($marker:ident, $name:literal, $input:ty, $output:ty) => {
        pub struct $marker;

        impl HostMethod for $marker {
            const NAME: &'static str = $name;
            type Input = $input;
            type Output = $output;
        }
    };
}

host_method!(InitializeHost, "INITIALIZE_HOST", InitializeHostInputs, InitializeHostResult);
host_method!(BeginHostShutdown, "BEGIN_HOST_SHUTDOWN", BeginHostShutdownInputs, ShutdownResult);
host_method!(SendIoCall, "SEND_IO_CALL", SendIoCallInputs, SendOutput);
host_method!(SendPage, "SEND_PAGE", SendPageInputs, SendOutput);
host_method!(SendLoadingCall, "SEND_LOADING_CALL", SendLoadingCallInputs, SendOutput);
host_method!(SendLog, "SEND_LOG", SendLogInputs, SendOutput);
host_method!(SendRedirect, "SEND_REDIRECT", SendRedirectInputs, SendOutput);
host_method!(MarkTransactionComplete, "MARK_TRANSACTION_COMPLETE", MarkTransactionCompleteInputs, SendOutput);
host_method!(Notify, "NOTIFY", NotifyInputs, SendOutput);

// ---------------------------------------------------------------------------
// Host-to-peer inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeHostInputs {
    pub actions: Vec<ActionDefinition>,
    pub groups: Vec<PageDefinition>,
    pub sdk_name: String,
    pub sdk_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Milliseconds since the epoch at declare time.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeginHostShutdownInputs {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendIoCallInputs {
    pub transaction_id: String,
    /// Serialized render instruction; opaque to the runtime.
    pub io_call: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendPageInputs {
    pub page_key: String,
    /// Serialized layout; absent to clear.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendLoadingCallInputs {
    pub transaction_id: String,
    #[serde(flatten)]
    pub loading_state: LoadingState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendLogInputs {
    pub transaction_id: String,
    pub data: String,
    /// Per-transaction monotonic ordering key; the orchestrator sorts by
    /// this, not by arrival.
    pub index: u64,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRedirectInputs {
    pub transaction_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replace: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkTransactionCompleteInputs {
    pub transaction_id: String,
    pub result_status: ResultStatus,
    /// Stringified [`crate::types::TransactionResultEnvelope`].
    pub result: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyInputs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deliveries: Vec<NotificationDelivery>,
}

// ---------------------------------------------------------------------------
// Host-to-peer outputs
// ---------------------------------------------------------------------------

/// INITIALIZE_HOST result. The lowercase tag matches the declare surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InitializeHostResult {
    #[serde(rename_all = "camelCase")]
    Success {
        organization: OrganizationDef,
        environment: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        dashboard_url: Option<String>,
        #[serde(default)]
        invalid_slugs: Vec<String>,
        #[serde(default)]
        warnings: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sdk_alert: Option<SdkAlert>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sdk_alert: Option<SdkAlert>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ShutdownResult {
    Success {},
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// Generic outcome for the send-style methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SendOutput {
    Success {},
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl SendOutput {
    pub fn is_success(&self) -> bool {
        matches!(self, SendOutput::Success {})
    }
}

// ---------------------------------------------------------------------------
// Peer-to-host methods
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTransactionInputs {
    pub transaction_id: String,
    pub action: ActionDescriptor,
    pub user: ContextUser,
    pub environment: String,
    #[serde(default)]
    pub params: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params_meta: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_resolves_immediately: Option<bool>,
}

/// The user's answer to a rendered IO call, still serialized: `value` is a
/// JSON string containing a [`crate::types::IoResponseMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoResponseInputs {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseTransactionInputs {
    pub transaction_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPageInputs {
    pub page_key: String,
    pub page: ActionDescriptor,
    pub user: ContextUser,
    pub environment: String,
    #[serde(default)]
    pub params: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params_meta: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OpenPageResult {
    #[serde(rename = "SUCCESS", rename_all = "camelCase")]
    Success { page_key: String },
    #[serde(rename = "ERROR")]
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosePageInputs {
    pub page_key: String,
}

/// A validated inbound call.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerCall {
    StartTransaction(StartTransactionInputs),
    IoResponse(IoResponseInputs),
    CloseTransaction(CloseTransactionInputs),
    OpenPage(OpenPageInputs),
    ClosePage(ClosePageInputs),
}

#[derive(Debug, thiserror::Error)]
pub enum PeerCallError {
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("invalid payload for {method}: {source}")]
    InvalidPayload {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl PeerCall {
    /// Wire names of every method the host implements.
    pub const METHOD_NAMES: [&'static str; 5] = [
        "START_TRANSACTION",
        "IO_RESPONSE",
        "CLOSE_TRANSACTION",
        "OPEN_PAGE",
        "CLOSE_PAGE",
    ];

    pub fn parse(method_name: &str, data: Value) -> Result<Self, PeerCallError> {
        fn decode<T: DeserializeOwned>(
            method: &'static str,
            data: Value,
        ) -> Result<T, PeerCallError> {
            serde_json::from_value(data)
                .map_err(|source| PeerCallError::InvalidPayload { method, source })
        }

        match method_name {
            "START_TRANSACTION" => {
                Ok(PeerCall::StartTransaction(decode("START_TRANSACTION", data)?))
            }
            "IO_RESPONSE" => Ok(PeerCall::IoResponse(decode("IO_RESPONSE", data)?)),
            "CLOSE_TRANSACTION" => {
                Ok(PeerCall::CloseTransaction(decode("CLOSE_TRANSACTION", data)?))
            }
            "OPEN_PAGE" => Ok(PeerCall::OpenPage(decode("OPEN_PAGE", data)?)),
            "CLOSE_PAGE" => Ok(PeerCall::ClosePage(decode("CLOSE_PAGE", data)?)),
            other => Err(PeerCallError::UnknownMethod(other.to_string())),
        }
    }

    pub fn method_name(&self) -> &'static str {
        match self {
            PeerCall::StartTransaction(_) => "START_TRANSACTION",
            PeerCall::IoResponse(_) => "IO_RESPONSE",
            PeerCall::CloseTransaction(_) => "CLOSE_TRANSACTION",
            PeerCall::OpenPage(_) => "OPEN_PAGE",
            PeerCall::ClosePage(_) => "CLOSE_PAGE",
        }
    }
}
