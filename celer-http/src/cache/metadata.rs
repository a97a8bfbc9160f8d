//! Persisted per-entry metadata.

use faststr::FastStr;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};

/// One row of the cache metadata store: the observable identity of a cached
/// request/response pair plus its freshness timestamps (seconds since the
/// Unix epoch).
#[derive(Clone, Debug, PartialEq)]
pub struct HttpCacheMetadata {
    pub key: FastStr,
    pub url: FastStr,
    pub method: Method,
    pub status_code: StatusCode,
    pub status_message: String,
    pub response_headers: HeaderMap,
    pub response_body_size: u64,
    pub sent_request_at: u64,
    pub received_response_at: u64,
    pub created_at: u64,
    pub last_accessed_at: u64,
}

/// Wire form of one header in the metadata store's JSON column.
///
/// Headers are stored as an array, not an object, so repeated names keep
/// their insertion order.
#[derive(Serialize, Deserialize)]
struct HeaderEntry {
    name: String,
    value: String,
}

pub(crate) fn headers_to_json(headers: &HeaderMap) -> String {
    let entries: Vec<HeaderEntry> = headers
        .iter()
        .map(|(name, value)| HeaderEntry {
            name: name.as_str().to_string(),
            value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
        })
        .collect();
    serde_json::to_string(&entries).unwrap_or_else(|_| "[]".to_string())
}

pub(crate) fn headers_from_json(json: &str) -> HeaderMap {
    let entries: Vec<HeaderEntry> = match serde_json::from_str(json) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("discarding unreadable header column: {e}");
            return HeaderMap::new();
        }
    };
    let mut headers = HeaderMap::new();
    for entry in entries {
        match (
            HeaderName::from_bytes(entry.name.as_bytes()),
            HeaderValue::from_str(&entry.value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => tracing::warn!("discarding malformed stored header {:?}", entry.name),
        }
    }
    headers
}
