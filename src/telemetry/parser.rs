//! Tolerant extraction of a flat `TelemetrySample` from a nested, partly
//! untrusted instance response (§4.6).

use serde_json::Value;

pub const TELEMETRY_SCHEMA_VERSION: &str = "1";

#[derive(Debug, Clone)]
pub struct ParsedTelemetry {
    pub accepted: bool,
    pub dedup_hit: bool,
    pub schema_ver: String,
    pub collected_at: String,
    pub verify_ms: Option<i64>,
    pub raw_json: String,
}

/// Non-empty trimmed strings only; otherwise `None`.
fn read_string(value: Option<&Value>) -> Option<String> {
    let s = value?.as_str()?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Accepts `true`/`false`, `0`/`1`, and `"true"/"false"/"1"/"0"`
/// (case-insensitive); otherwise `None`.
fn read_boolean(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Finite numbers rounded to an integer; decimal strings parsed base 10;
/// otherwise `None`.
fn read_number(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i)
            } else {
                n.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64)
            }
        }
        Value::String(s) => s.trim().parse::<i64>().ok().or_else(|| {
            s.trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(|f| f.round() as i64)
        }),
        _ => None,
    }
}

fn dig<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = root;
    for segment in path {
        current = current.get(segment)?;
    }
    Some(current)
}

fn first_bool_fallback(root: &Value, field: &str) -> bool {
    read_boolean(dig(root, &["data", "protocolVerification", field]))
        .or_else(|| read_boolean(dig(root, &["data", field])))
        .or_else(|| read_boolean(dig(root, &[field])))
        .unwrap_or(false)
}

/// Truncate `raw` to at most `max_bytes`, never splitting a UTF-8 codepoint.
fn truncate_on_char_boundary(raw: &str, max_bytes: usize) -> String {
    if raw.len() <= max_bytes {
        return raw.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !raw.is_char_boundary(end) {
        end -= 1;
    }
    raw[..end].to_string()
}

/// Project `body` (the instance's trigger response) into a flat sample.
/// `now` supplies the default `collected_at`; `raw_text` is the exact wire
/// body, truncated to `max_raw_bytes`.
pub fn parse_telemetry(body: &Value, raw_text: &str, now: &str, max_raw_bytes: usize) -> ParsedTelemetry {
    let accepted = first_bool_fallback(body, "accepted");
    let dedup_hit = first_bool_fallback(body, "dedupHit");

    let schema_ver = read_string(dig(body, &["data", "schemaVer"]))
        .or_else(|| read_string(dig(body, &["schemaVer"])))
        .unwrap_or_else(|| TELEMETRY_SCHEMA_VERSION.to_string());

    let collected_at = read_string(dig(body, &["data", "collectedAt"]))
        .or_else(|| read_string(dig(body, &["collectedAt"])))
        .unwrap_or_else(|| now.to_string());

    let verify_ms = read_number(dig(body, &["data", "protocolVerification", "verifyMs"]));

    ParsedTelemetry {
        accepted,
        dedup_hit,
        schema_ver,
        collected_at,
        verify_ms,
        raw_json: truncate_on_char_boundary(raw_text, max_raw_bytes),
    }
}
