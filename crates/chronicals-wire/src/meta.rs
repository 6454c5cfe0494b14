//! Tagged-meta param codec.
//!
//! Invocation params travel as plain JSON plus a side-channel `paramsMeta`
//! describing which paths carry rich values. The only rich type the runtime
//! revives is dates: a tagged path's raw value (an ISO-8601 string or
//! epoch-millisecond number) is normalized to a canonical RFC 3339 UTC
//! string, so handlers see one representation no matter how the
//! orchestrator encoded it.
//!
//! Meta shape: `{"values": {"a.b.0.c": ["Date"], …}}` — dotted paths where
//! numeric segments index into arrays.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/// Decode `params` in place according to `meta`. Unknown tags and paths
/// that don't resolve are left untouched; this codec never fails an
/// incoming transaction over malformed meta.
pub fn decode_params(mut params: Value, meta: Option<&Value>) -> Value {
    let Some(values) = meta.and_then(|m| m.get("values")).and_then(Value::as_object) else {
        return params;
    };
    for (path, tags) in values {
        let is_date = tags
            .as_array()
            .map(|tags| tags.iter().any(|t| t.as_str() == Some("Date")))
            .unwrap_or(false);
        if !is_date {
            continue;
        }
        if let Some(slot) = resolve_path_mut(&mut params, path) {
            if let Some(normalized) = normalize_date(slot) {
                *slot = Value::String(normalized.to_rfc3339());
            }
        }
    }
    params
}

fn resolve_path_mut<'a>(root: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get_mut(segment)?,
            Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn normalize_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(num) => {
            let millis = num.as_i64()?;
            Utc.timestamp_millis_opt(millis).single()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn revives_epoch_millis_to_rfc3339() {
        let params = json!({"since": 1700000000000_i64});
        let meta = json!({"values": {"since": ["Date"]}});
        let decoded = decode_params(params, Some(&meta));
        assert_eq!(decoded["since"], json!("2023-11-14T22:13:20+00:00"));
    }

    #[test]
    fn normalizes_offset_strings_to_utc() {
        let params = json!({"when": "2024-03-01T10:00:00+02:00"});
        let meta = json!({"values": {"when": ["Date"]}});
        let decoded = decode_params(params, Some(&meta));
        assert_eq!(decoded["when"], json!("2024-03-01T08:00:00+00:00"));
    }

    #[test]
    fn walks_nested_objects_and_arrays() {
        let params = json!({"filters": [{"createdAt": 0_i64}]});
        let meta = json!({"values": {"filters.0.createdAt": ["Date"]}});
        let decoded = decode_params(params, Some(&meta));
        assert_eq!(
            decoded["filters"][0]["createdAt"],
            json!("1970-01-01T00:00:00+00:00")
        );
    }

    #[test]
    fn leaves_untagged_and_unresolvable_paths_alone() {
        let params = json!({"name": "ada", "since": 12});
        let meta = json!({"values": {"missing.path": ["Date"], "name": ["BigInt"]}});
        let decoded = decode_params(params.clone(), Some(&meta));
        assert_eq!(decoded, params);
    }

    #[test]
    fn no_meta_is_a_passthrough() {
        let params = json!({"x": 1});
        assert_eq!(decode_params(params.clone(), None), params);
    }
}
