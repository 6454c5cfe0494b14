//! One-shot host declaration over HTTP.
//!
//! Serverless hosts can't hold a socket open between invocations, so the
//! route table is declared out-of-band: a `POST /api/hosts/declare`
//! against the HTTP base derived from the WebSocket endpoint (same
//! authority, `ws→http`).

use serde::{Deserialize, Serialize};
use tracing::warn;

use chronicals::{ChronicalsConfig, RouteTable};
use chronicals_wire::types::{ActionDefinition, PageDefinition};

use crate::{now_millis, AdapterError};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeclareHostRequest<'a> {
    http_host_id: &'a str,
    actions: &'a [ActionDefinition],
    groups: &'a [PageDefinition],
    sdk_name: &'a str,
    sdk_version: &'a str,
    timestamp: i64,
}

/// The orchestrator's declare verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeclareHostResponse {
    #[serde(rename_all = "camelCase")]
    Success {
        #[serde(default)]
        invalid_slugs: Vec<String>,
        #[serde(default)]
        warnings: Vec<String>,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// Declare the host's routes under `http_host_id`.
///
/// An error response, or an answer rejecting every declared action slug,
/// is fatal for the declare.
pub async fn declare_host(
    http: &reqwest::Client,
    config: &ChronicalsConfig,
    routes: &RouteTable,
    http_host_id: &str,
) -> Result<DeclareHostResponse, AdapterError> {
    let base = config
        .http_base_url()
        .ok_or_else(|| AdapterError::Declare("endpoint has no derivable http base".to_string()))?;
    let defs = routes.definitions();
    if !defs.invalid_slugs.is_empty() {
        warn!(slugs = ?defs.invalid_slugs, "declaring routes with invalid slugs");
    }

    let request = DeclareHostRequest {
        http_host_id,
        actions: &defs.actions,
        groups: &defs.groups,
        sdk_name: env!("CARGO_PKG_NAME"),
        sdk_version: env!("CARGO_PKG_VERSION"),
        timestamp: now_millis(),
    };

    let mut builder = http.post(format!("{base}/api/hosts/declare")).json(&request);
    if let Some(api_key) = &config.api_key {
        builder = builder.header("x-api-key", api_key);
    }
    let response = builder
        .send()
        .await
        .map_err(|e| AdapterError::Declare(e.to_string()))?
        .error_for_status()
        .map_err(|e| AdapterError::Declare(e.to_string()))?;
    let verdict: DeclareHostResponse = response
        .json()
        .await
        .map_err(|e| AdapterError::Declare(format!("unparseable declare response: {e}")))?;

    match &verdict {
        DeclareHostResponse::Success {
            invalid_slugs,
            warnings,
        } => {
            for warning in warnings {
                warn!(%warning, "declare warning");
            }
            if !invalid_slugs.is_empty() {
                let all_invalid = !defs.actions.is_empty()
                    && defs
                        .actions
                        .iter()
                        .all(|action| invalid_slugs.contains(&action.slug));
                if all_invalid {
                    return Err(AdapterError::Declare(format!(
                        "every declared slug is invalid: {invalid_slugs:?}"
                    )));
                }
                warn!(slugs = ?invalid_slugs, "orchestrator rejected some slugs");
            }
            Ok(verdict)
        }
        DeclareHostResponse::Error { message } => Err(AdapterError::Declare(
            message
                .clone()
                .unwrap_or_else(|| "declare was rejected".to_string()),
        )),
    }
}
