//! # HTTP Ingress
//!
//! The public-facing HTTP surface (§4.8). Registered as the ingress
//! router's fallback so it matches any method/path not claimed by the
//! operator API's explicit routes (§4.9, §6's path grammar) — the same
//! "everything else is tunneled" split the teacher draws between its own
//! `/api/*` routes and its WebSocket upgrade route in `server/src/main.rs`.

use axum::body::{to_bytes, Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;

use crate::dispatcher;
use crate::error::DispatchError;
use crate::state::AppState;

/// `axum::body::to_bytes` needs an explicit limit; §4.8 bounds the ingress
/// body to the relay's configured `max_body_size`.
async fn read_bounded_body(body: Body, limit: usize) -> Result<Bytes, Response> {
    to_bytes(body, limit).await.map_err(|_| {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            "request body exceeds the configured size limit",
        )
            .into_response()
    })
}

/// Normalizes a JSON body to its canonical serialized form (so incidental
/// whitespace differences don't leak through the tunnel) and forwards any
/// non-JSON body byte-for-byte (§4.8).
fn canonicalize_body(bytes: Bytes) -> Vec<u8> {
    match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(value) => serde_json::to_vec(&value).unwrap_or_else(|_| bytes.to_vec()),
        Err(_) => bytes.to_vec(),
    }
}

fn headers_to_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

/// Parses a raw query string into `{str:any}` (§6), grouping repeated keys
/// into a JSON array so multi-valued query parameters survive the trip
/// across the tunnel (§4.2 re-expands them back into repeated keys on egress).
fn query_to_map(query: &str) -> HashMap<String, serde_json::Value> {
    let mut map: HashMap<String, serde_json::Value> = HashMap::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let value = serde_json::Value::String(value.into_owned());
        map.entry(key.into_owned())
            .and_modify(|existing| match existing {
                serde_json::Value::Array(items) => items.push(value.clone()),
                other => {
                    let first = other.clone();
                    *other = serde_json::Value::Array(vec![first, value.clone()]);
                }
            })
            .or_insert(value);
    }
    map
}

/// The catch-all ingress handler: anything not claimed by the operator API
/// routes lands here and is tunneled via [`dispatcher::dispatch`].
pub async fn handle(
    State(state): State<AppState>,
    method: Method,
    uri: axum::http::Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let bytes = match read_bounded_body(body, state.config.max_body_size).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let body_bytes = canonicalize_body(bytes);
    let query = query_to_map(uri.query().unwrap_or(""));

    let result = dispatcher::dispatch(
        &state,
        method.as_str(),
        uri.path(),
        headers_to_map(&headers),
        body_bytes,
        query,
    )
    .await;

    match result {
        Ok(response) => write_response(response),
        Err(err) => err.into_response(),
    }
}

pub fn write_response(response: dispatcher::DispatchedResponse) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::OK));
    // Content-length is recomputed from the decoded body, never copied from
    // the tunneled headers (§4.8) — the agent's reported length describes
    // the base64 wire form, not these raw bytes. Drop any copy of it here so
    // the recomputed one below isn't duplicated alongside it.
    for (name, value) in &response.headers {
        if name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        builder = builder.header(name, value);
    }
    builder = builder.header("content-length", response.body.len());
    builder
        .body(Body::from(response.body))
        .unwrap_or_else(|_| DispatchError::SendFailed("malformed response".into()).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_json_whitespace() {
        let bytes = Bytes::from_static(b"{ \"a\" :  1 }");
        let out = canonicalize_body(bytes);
        assert_eq!(out, b"{\"a\":1}");
    }

    #[test]
    fn forwards_non_json_byte_for_byte() {
        let bytes = Bytes::from_static(b"not json at all");
        let out = canonicalize_body(bytes.clone());
        assert_eq!(out, bytes.to_vec());
    }

    #[test]
    fn single_valued_query_becomes_a_plain_string() {
        let map = query_to_map("x=1");
        assert_eq!(map.get("x"), Some(&serde_json::Value::String("1".into())));
    }

    #[test]
    fn repeated_query_keys_become_an_array() {
        let map = query_to_map("tag=a&tag=b");
        assert_eq!(
            map.get("tag"),
            Some(&serde_json::Value::Array(vec![
                serde_json::Value::String("a".into()),
                serde_json::Value::String("b".into()),
            ]))
        );
    }

    #[test]
    fn write_response_never_duplicates_content_length() {
        let mut headers = HashMap::new();
        headers.insert("content-length".to_string(), "999".to_string());
        headers.insert("content-type".to_string(), "application/json".to_string());
        let response = dispatcher::DispatchedResponse {
            status_code: 200,
            headers,
            body: b"{\"ok\":true}".to_vec(),
        };

        let http_response = write_response(response);
        let values: Vec<_> = http_response
            .headers()
            .get_all("content-length")
            .iter()
            .collect();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0], "11");
    }
}
