//! Relay error types and their mapping to HTTP status + JSON envelope (§7).
//!
//! Grounded in `getsentry-synapse`'s `ingest-router/src/errors.rs`: a
//! `thiserror` enum with a `status_code()` method and an `IntoResponse`
//! impl, rather than the teacher's inline `String` errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::registry::PickError;

/// Errors surfaced while dispatching an inbound HTTP request to an agent (§7).
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Client '{0}' not found")]
    AgentNotFound(String),

    #[error("No connected clients available")]
    NoAgentsAvailable,

    #[error("Client disconnected")]
    AgentDisconnected,

    #[error("Request timeout")]
    RequestTimeout,

    #[error("failed to send request to agent: {0}")]
    SendFailed(String),

    #[error("agent reported an error: {0}")]
    AgentError(String),
}

impl From<PickError> for DispatchError {
    fn from(err: PickError) -> Self {
        match err {
            PickError::NotFound(id) => DispatchError::AgentNotFound(id),
            PickError::NoneAvailable => DispatchError::NoAgentsAvailable,
        }
    }
}

impl DispatchError {
    fn status_code(&self) -> StatusCode {
        // §7: every dispatch failure surfaces as HTTP 500 to the caller;
        // the distinguishing detail lives in the JSON `message` field.
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// The JSON envelope every ingress failure surfaces to the HTTP caller (§4.8, §7).
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: &'static str,
    pub message: String,
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            error: "Proxy error",
            message: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_dispatch_error_surfaces_as_500() {
        let errors: Vec<DispatchError> = vec![
            DispatchError::AgentNotFound("a1".into()),
            DispatchError::NoAgentsAvailable,
            DispatchError::AgentDisconnected,
            DispatchError::RequestTimeout,
            DispatchError::SendFailed("closed".into()),
            DispatchError::AgentError("boom".into()),
        ];
        for err in errors {
            assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[test]
    fn agent_not_found_message_matches_spec_wording() {
        let err = DispatchError::AgentNotFound("a1".into());
        assert_eq!(err.to_string(), "Client 'a1' not found");
    }
}
