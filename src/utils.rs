use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use url::Url;

use crate::error::{InboxError, InboxResult};

pub fn normalize_url(input: &str) -> String {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// Push endpoint for a REST base url: same host, `ws`/`wss` scheme, `/ws` path.
pub fn derive_ws_url(base_url: &str) -> InboxResult<Url> {
    let mut url = Url::parse(&normalize_url(base_url))?;
    let scheme = if url.scheme() == "http" { "ws" } else { "wss" };
    url.set_scheme(scheme)
        .map_err(|_| InboxError::Config(format!("cannot derive push url from {}", base_url)))?;
    url.set_path("/ws");
    url.set_query(None);
    Ok(url)
}

pub fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

/// Accepts RFC 3339 strings, epoch milliseconds, or digit strings holding epoch milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            s.parse::<i64>()
                .ok()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        }
        _ => None,
    }
}

pub fn str_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| value.get(*k))
        .find_map(|v| v.as_str().filter(|s| !s.is_empty()))
}

/// Ids show up as strings or numbers depending on the endpoint.
pub fn id_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().filter_map(|k| value.get(*k)).find_map(|v| match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Lists come back bare or wrapped under one of `keys`.
pub fn list_items(json: &Value, keys: &[&str]) -> Vec<Value> {
    if let Some(arr) = json.as_array() {
        return arr.clone();
    }
    keys.iter()
        .filter_map(|k| json.get(*k))
        .find_map(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
}
