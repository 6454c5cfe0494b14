//! Duplex RPC envelope.
//!
//! One envelope per socket message payload. Calls carry a monotonic id
//! assigned by the calling side; the response echoes it. Ids are scoped to
//! the caller, so both peers may use overlapping counters without
//! ambiguity — a `Response` always answers one of *our* `Call`s.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An RPC call or response, serialized as the payload of a socket
/// `Message` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcEnvelope {
    #[serde(rename_all = "camelCase")]
    Call {
        id: u64,
        method_name: String,
        data: Value,
    },
    #[serde(rename_all = "camelCase")]
    Response {
        id: u64,
        method_name: String,
        data: Value,
    },
}

impl RpcEnvelope {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
