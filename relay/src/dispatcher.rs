//! # Request Dispatcher
//!
//! Turns one inbound HTTP request into a tunnel round-trip (§4.7). There is
//! no teacher equivalent — the teacher's tunnel is a raw byte relay with no
//! request/response framing to dispatch — so this module is built straight
//! from §4.6/§4.7, reusing the `AgentRegistry`/`PendingTable` the way the
//! teacher's `handlers.rs` reuses its own registry and session map.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use uuid::Uuid;

use tunnel_protocol::{Frame, FrameKind, RequestFramePayload};

use crate::error::DispatchError;
use crate::pending::PendingOutcome;
use crate::state::AppState;

/// Header names stripped before a request is forwarded to an agent (§4.7).
/// Distinct from (and in addition to) the egress-side deny-list in §4.2 —
/// this one also strips WebSocket-upgrade and forwarding headers that make
/// no sense replayed across the tunnel.
const DENYLISTED_HEADERS: &[&str] = &[
    "host",
    "connection",
    "upgrade",
    "sec-websocket-key",
    "sec-websocket-version",
    "sec-websocket-extensions",
    "x-forwarded-for",
    "x-forwarded-proto",
    "x-forwarded-host",
];

/// Drops denylisted header names (case-insensitively), keeping the rest.
/// Last-value-wins is the caller's responsibility — `headers` is already a
/// flat map by the time it reaches here.
pub fn sanitize_headers(headers: HashMap<String, String>) -> HashMap<String, String> {
    headers
        .into_iter()
        .filter(|(name, _)| {
            let lower = name.to_ascii_lowercase();
            !DENYLISTED_HEADERS.contains(&lower.as_str())
        })
        .collect()
}

/// The decoded result of a dispatched request, ready for the ingress to
/// write back onto the HTTP response.
pub struct DispatchedResponse {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// Dispatches one inbound HTTP request to a selected agent and awaits its
/// response (§4.7 steps 1-5).
pub async fn dispatch(
    state: &AppState,
    method: &str,
    path: &str,
    headers: HashMap<String, String>,
    body: Vec<u8>,
    query: HashMap<String, serde_json::Value>,
) -> Result<DispatchedResponse, DispatchError> {
    let request_id = Uuid::new_v4().to_string();

    let (agent, target, rewritten_path) = state.registry.pick_for(path).map_err(DispatchError::from)?;

    let payload = RequestFramePayload {
        method: method.to_string(),
        path: rewritten_path,
        headers: sanitize_headers(headers),
        body: if body.is_empty() {
            None
        } else {
            Some(BASE64.encode(&body))
        },
        query,
        target_mapping: Some(target),
    };

    let frame = Frame::new(request_id.clone(), FrameKind::Request, crate::registry::now_millis())
        .with_agent_id(agent.id.clone())
        .with_payload(payload)
        .map_err(|e| DispatchError::SendFailed(e.to_string()))?;

    // Registered before the send so a response racing in has somewhere to
    // land even if it arrives microseconds after this call returns (§4.7
    // step 4, §9 "idempotent resolve").
    let rx = state
        .pending
        .add(request_id.clone(), agent.clone(), state.config.request_timeout);

    if let Err(e) = agent.link.send(frame) {
        state.pending.reject(&request_id, DispatchError::SendFailed(e.clone()));
        return Err(DispatchError::SendFailed(e));
    }

    match rx.await {
        Ok(PendingOutcome::Response(response)) => {
            let body = BASE64
                .decode(response.body.as_bytes())
                .unwrap_or_else(|_| response.body.into_bytes());
            Ok(DispatchedResponse {
                status_code: response.status_code,
                headers: response.headers,
                body,
            })
        }
        Ok(PendingOutcome::Error(err)) => Err(err),
        // The sender side was dropped without ever completing — treat as a
        // disconnect, the only way this can happen in practice.
        Err(_) => Err(DispatchError::AgentDisconnected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_denylisted_headers_case_insensitively() {
        let mut headers = HashMap::new();
        headers.insert("Host".to_string(), "example.com".to_string());
        headers.insert("X-Forwarded-For".to_string(), "1.2.3.4".to_string());
        headers.insert("Content-Type".to_string(), "application/json".to_string());

        let sanitized = sanitize_headers(headers);

        assert_eq!(sanitized.len(), 1);
        assert_eq!(
            sanitized.get("Content-Type").map(String::as_str),
            Some("application/json")
        );
    }

    #[test]
    fn leaves_ordinary_headers_untouched() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer x".to_string());
        let sanitized = sanitize_headers(headers.clone());
        assert_eq!(sanitized, headers);
    }
}
