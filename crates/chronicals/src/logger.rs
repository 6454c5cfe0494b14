//! Transaction log formatting and SDK diagnostics gating.
//!
//! Handler `ctx.log(…)` output crosses the wire to the orchestrator, so
//! formatting is part of the contract: args join with single spaces,
//! strings stay verbatim, everything else pretty-prints as JSON, and the
//! result is capped at [`MAX_LOG_LENGTH`] characters. SDK-internal
//! diagnostics go through `tracing` instead and are gated by [`LogLevel`].

use serde_json::Value;

/// Hard cap on a single log entry, advisory suffix included.
pub const MAX_LOG_LENGTH: usize = 10_000;

const TRUNCATION_ADVISORY: &str = " (truncated)";

/// Verbosity of the SDK's own diagnostics, least to most chatty.
/// Warnings and errors always emit; handler logs always flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    /// Warnings and errors only.
    Quiet,
    /// Plus the messages a production operator wants.
    Prod,
    /// Plus lifecycle chatter.
    #[default]
    Info,
    /// Everything, including per-frame traffic.
    Debug,
}

impl LogLevel {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "quiet" => Some(LogLevel::Quiet),
            "prod" => Some(LogLevel::Prod),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

/// One positional argument to `ctx.log(…)`.
#[derive(Debug, Clone)]
pub enum LogArg {
    Str(String),
    Json(Value),
    /// An absent value; renders as the literal string `undefined`.
    Undefined,
}

impl From<&str> for LogArg {
    fn from(value: &str) -> Self {
        LogArg::Str(value.to_string())
    }
}

impl From<String> for LogArg {
    fn from(value: String) -> Self {
        LogArg::Str(value)
    }
}

impl From<Value> for LogArg {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => LogArg::Str(s),
            Value::Null => LogArg::Undefined,
            other => LogArg::Json(other),
        }
    }
}

/// Join log args the way handlers expect to read them back in the
/// dashboard: space-separated, strings verbatim, other values as 2-space
/// indented JSON, absent values as `undefined`.
pub fn join_log_args(args: &[LogArg]) -> String {
    let joined = args
        .iter()
        .map(|arg| match arg {
            LogArg::Str(s) => s.clone(),
            LogArg::Json(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
            LogArg::Undefined => "undefined".to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ");
    truncate_log(joined)
}

fn truncate_log(data: String) -> String {
    if data.chars().count() <= MAX_LOG_LENGTH {
        return data;
    }
    let keep = MAX_LOG_LENGTH - TRUNCATION_ADVISORY.chars().count();
    let mut out: String = data.chars().take(keep).collect();
    out.push_str(TRUNCATION_ADVISORY);
    out
}
