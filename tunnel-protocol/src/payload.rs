//! Kind-dependent payload shapes carried inside a [`crate::Frame`] (§6).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::mapping::Mapping;

/// `register` payload sent by the agent when it dials in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequestPayload {
    pub name: String,
    #[serde(rename = "defaultTarget")]
    pub default_target: String,
    #[serde(default)]
    pub mappings: Vec<Mapping>,
    #[serde(rename = "agentId", default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

/// `register` payload the relay answers with once an agent is admitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterConfirmPayload {
    pub confirmed: bool,
}

/// `request` payload: an HTTP request translated into tunnel terms (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFramePayload {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Base64-encoded request body, or `None` for bodiless requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default)]
    pub query: HashMap<String, serde_json::Value>,
    #[serde(
        rename = "targetMapping",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub target_mapping: Option<String>,
}

/// `response` payload: the agent's answer, ready to replay as HTTP (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFramePayload {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Base64-encoded response body.
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<String>,
}

/// `error` payload: a handler-internal failure (§4.4, §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorFramePayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}
