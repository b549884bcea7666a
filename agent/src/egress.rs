//! # Local HTTP Egress
//!
//! Issues the HTTP request carried in a `request` frame against the
//! agent's chosen local target, and folds the outcome — success, timeout,
//! or transport error — into a `ResponseFramePayload` that is always a
//! valid answer (§4.2). Built on `reqwest`, which the teacher never uses
//! (its tunnel only ever relays raw TCP bytes); pulled in because this
//! agent is an HTTP client, the same role `reqwest` plays for upstream
//! calls in the pack's `getsentry-synapse` sibling crate.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use tunnel_protocol::{RequestFramePayload, ResponseFramePayload};

/// Header names stripped before forwarding to the local target (§4.2) —
/// these either break hop-by-hop semantics or are recomputed by the
/// egress stack itself.
const DENYLISTED_HEADERS: &[&str] = &[
    "host",
    "connection",
    "upgrade",
    "transfer-encoding",
    "content-length",
];

/// Methods whose body is dropped regardless of what the ingress sent (§4.2).
const BODYLESS_METHODS: &[&str] = &["GET", "HEAD", "DELETE"];

pub fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .build()
        .expect("reqwest client with default TLS config always builds")
}

/// Issues `request` against `base_url`, returning a response payload that
/// is always valid HTTP — transport failures and timeouts are folded into
/// a synthesized 503 rather than surfaced as a protocol error (§4.2).
pub async fn issue(
    client: &reqwest::Client,
    base_url: &str,
    request: &RequestFramePayload,
    timeout: Duration,
) -> ResponseFramePayload {
    match try_issue(client, base_url, request, timeout).await {
        Ok(response) => response,
        Err(detail) => synthesize_failure(&detail),
    }
}

async fn try_issue(
    client: &reqwest::Client,
    base_url: &str,
    request: &RequestFramePayload,
    timeout: Duration,
) -> Result<ResponseFramePayload, String> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
        .map_err(|_| format!("unsupported HTTP method '{}'", request.method))?;
    let url = effective_url(base_url, request);
    let headers = build_headers(&request.headers);

    let mut builder = client
        .request(method, url.as_str())
        .headers(headers)
        .timeout(timeout);

    if !BODYLESS_METHODS.contains(&request.method.to_ascii_uppercase().as_str()) {
        if let Some(body) = &request.body {
            let bytes = BASE64
                .decode(body.as_bytes())
                .map_err(|e| format!("request body is not valid base64: {e}"))?;
            builder = builder.body(bytes);
        }
    }

    let started = Instant::now();
    let response = builder
        .send()
        .await
        .map_err(|e| describe_error(&e, started))?;

    let status_code = response.status().as_u16();
    let mut flat_headers = HashMap::new();
    for (name, value) in response.headers() {
        if let Ok(v) = value.to_str() {
            // Last value wins on duplicates (§4.2) — iteration order is
            // the order the target sent them, so a later insert overwrites.
            flat_headers.insert(name.as_str().to_string(), v.to_string());
        }
    }
    let body = response
        .bytes()
        .await
        .map_err(|e| describe_error(&e, started))?;

    Ok(ResponseFramePayload {
        status_code,
        headers: flat_headers,
        body: BASE64.encode(&body),
        // Filled in by the relay's pending table on resolve, not here (§4.6).
        duration: None,
        mapping: None,
    })
}

/// `base_url + request.path` plus an encoded query string; multi-valued
/// query entries become repeated keys (§4.2).
fn effective_url(base_url: &str, request: &RequestFramePayload) -> String {
    let base = base_url.trim_end_matches('/');
    let path = if request.path.starts_with('/') {
        request.path.clone()
    } else {
        format!("/{}", request.path)
    };
    format!("{base}{path}{}", encode_query(&request.query))
}

fn encode_query(query: &HashMap<String, serde_json::Value>) -> String {
    if query.is_empty() {
        return String::new();
    }
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in query {
        match value {
            serde_json::Value::Array(items) => {
                for item in items {
                    serializer.append_pair(key, &scalar_to_string(item));
                }
            }
            other => {
                serializer.append_pair(key, &scalar_to_string(other));
            }
        }
    }
    format!("?{}", serializer.finish())
}

fn scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn build_headers(headers: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let lower = name.to_ascii_lowercase();
        if DENYLISTED_HEADERS.contains(&lower.as_str()) {
            continue;
        }
        let (Ok(header_name), Ok(header_value)) = (
            HeaderName::from_bytes(lower.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            continue;
        };
        map.insert(header_name, header_value);
    }
    map
}

fn describe_error(err: &reqwest::Error, started: Instant) -> String {
    if err.is_timeout() {
        format!(
            "request to local target timed out after {:?}",
            started.elapsed()
        )
    } else {
        err.to_string()
    }
}

#[derive(Serialize)]
struct FailureBody<'a> {
    error: &'a str,
    message: String,
    code: &'a str,
}

/// The synthesized 503 envelope §4.2 mandates on timeout or transport
/// error, so the relay always has a valid HTTP response to hand back to
/// its caller instead of a protocol error frame.
fn synthesize_failure(detail: &str) -> ResponseFramePayload {
    let body = FailureBody {
        error: "Service Unavailable",
        message: detail.to_string(),
        code: "HTTP_REQUEST_FAILED",
    };
    let json = serde_json::to_vec(&body).unwrap_or_default();
    let mut headers = HashMap::new();
    headers.insert(
        "content-type".to_string(),
        "application/json".to_string(),
    );
    ResponseFramePayload {
        status_code: 503,
        headers,
        body: BASE64.encode(&json),
        duration: None,
        mapping: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: &str, path: &str) -> RequestFramePayload {
        RequestFramePayload {
            method: method.to_string(),
            path: path.to_string(),
            headers: HashMap::new(),
            body: None,
            query: HashMap::new(),
            target_mapping: None,
        }
    }

    #[test]
    fn effective_url_joins_base_and_path() {
        let req = request("GET", "/api/test");
        assert_eq!(
            effective_url("http://localhost:8080", &req),
            "http://localhost:8080/api/test"
        );
    }

    #[test]
    fn effective_url_tolerates_trailing_slash_on_base() {
        let req = request("GET", "/api/test");
        assert_eq!(
            effective_url("http://localhost:8080/", &req),
            "http://localhost:8080/api/test"
        );
    }

    #[test]
    fn effective_url_encodes_multi_valued_query_as_repeated_keys() {
        let mut req = request("GET", "/x");
        req.query
            .insert("tag".to_string(), serde_json::json!(["a", "b"]));
        let url = effective_url("http://localhost", &req);
        assert!(url.contains("tag=a"));
        assert!(url.contains("tag=b"));
    }

    #[test]
    fn denylisted_headers_are_stripped_case_insensitively() {
        let mut headers = HashMap::new();
        headers.insert("Host".to_string(), "example.com".to_string());
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        let built = build_headers(&headers);
        assert!(built.get("host").is_none());
        assert!(built.get("content-type").is_some());
    }

    #[test]
    fn synthesized_failure_matches_the_spec_shape() {
        let response = synthesize_failure("boom");
        assert_eq!(response.status_code, 503);
        assert_eq!(
            response.headers.get("content-type").map(String::as_str),
            Some("application/json")
        );
        let decoded = BASE64.decode(response.body.as_bytes()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(value["error"], "Service Unavailable");
        assert_eq!(value["code"], "HTTP_REQUEST_FAILED");
        assert_eq!(value["message"], "boom");
    }
}
