//! Shared wire payload types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The user on whose behalf a transaction or page was invoked.
///
/// Identity is asserted by the orchestrator; the host never authenticates
/// end users itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextUser {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub teams: Vec<String>,
}

/// The organization this host was declared under, echoed back by the
/// orchestrator on initialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationDef {
    pub name: String,
    pub slug: String,
}

/// Who may invoke a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccessControl {
    /// The orchestrator's organization-wide default.
    Level(AccessLevel),
    /// Restricted to the named teams.
    Teams { teams: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessLevel {
    EntireOrganization,
    OrganizationDefault,
}

impl Default for AccessControl {
    fn default() -> Self {
        AccessControl::Level(AccessLevel::OrganizationDefault)
    }
}

/// An action as declared to the orchestrator. No handler crosses the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_slug: Option<String>,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub backgroundable: bool,
    #[serde(default)]
    pub warn_on_close: bool,
    #[serde(default)]
    pub unlisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessControl>,
}

/// A page (route group) as declared to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDefinition {
    pub slug: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub has_handler: bool,
    #[serde(default)]
    pub unlisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessControl>,
}

/// The invoked action, as the orchestrator names it in START_TRANSACTION.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDescriptor {
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Loading feedback shown while a handler works.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_in_queue: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_completed: Option<u64>,
}

/// How a user's answer came back for a rendered IO call.
///
/// `SetState` updates are intermediate (e.g. a search query changed);
/// `Return` resolves the prompt; `Canceled` tears it down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IoResponseKind {
    Return,
    SetState,
    Canceled,
}

/// The parsed body of an IO_RESPONSE `value` string. Routed by
/// `transaction_id`; page sessions receive these under their page key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IoResponseMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub transaction_id: String,
    pub kind: IoResponseKind,
    #[serde(default)]
    pub values: Vec<Value>,
}

/// Terminal status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Success,
    Failure,
}

/// The envelope stringified into MARK_TRANSACTION_COMPLETE's `result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResultEnvelope {
    pub schema_version: u32,
    pub status: ResultStatus,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Current result envelope schema version.
pub const RESULT_SCHEMA_VERSION: u32 = 1;

impl TransactionResultEnvelope {
    pub fn success(data: Value, meta: Option<Value>) -> Self {
        Self {
            schema_version: RESULT_SCHEMA_VERSION,
            status: ResultStatus::Success,
            data,
            meta,
        }
    }

    pub fn failure(error: impl Into<String>, message: impl Into<String>, cause: Option<String>) -> Self {
        let mut data = serde_json::Map::new();
        data.insert("error".to_string(), Value::String(error.into()));
        data.insert("message".to_string(), Value::String(message.into()));
        if let Some(cause) = cause {
            data.insert("cause".to_string(), Value::String(cause));
        }
        Self {
            schema_version: RESULT_SCHEMA_VERSION,
            status: ResultStatus::Failure,
            data: Value::Object(data),
            meta: None,
        }
    }
}

/// A failure surfaced inside a page layout, tagged with the part of the
/// layout that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutError {
    pub layout_key: String,
    pub error: String,
    pub message: String,
}

/// An entry in a page's action menu.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
}

/// The wire form of a rendered page, sent in SEND_PAGE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicLayout {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub menu_items: Option<Vec<MenuItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<LayoutError>,
}

impl BasicLayout {
    pub const KIND: &'static str = "BASIC";
}

/// An advisory from the orchestrator about this SDK build (e.g. a newer
/// version exists).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdkAlert {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_sdk_version: Option<String>,
    pub severity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One destination for a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDelivery {
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}
