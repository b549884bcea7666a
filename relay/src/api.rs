//! # Operator API
//!
//! Read-only views over the agent registry plus one tunneled health probe
//! (§4.9). Response shapes here are this build's own — spec.md explicitly
//! declines to specify their rendering ("specified here only as a
//! surface") — kept to small, deliberate summary structs rather than
//! exposing `AgentRecord` directly, the same instinct behind the teacher's
//! own `AgentListItem` in `server/src/api.rs`.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::dispatcher;
use crate::error::DispatchError;
use crate::registry::AgentRecord;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthSummary {
    pub status: &'static str,
    pub connected_agents: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthSummary> {
    Json(HealthSummary {
        status: "ok",
        connected_agents: state.registry.list_connected().len(),
    })
}

#[derive(Serialize)]
pub struct AgentSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "defaultTarget")]
    pub default_target: String,
    pub connected: bool,
    #[serde(rename = "requestCount")]
    pub request_count: u64,
    #[serde(rename = "lastHeartbeatAgeMillis")]
    pub last_heartbeat_age_millis: u128,
    #[serde(rename = "mappingCount")]
    pub mapping_count: usize,
}

impl From<&AgentRecord> for AgentSummary {
    fn from(record: &AgentRecord) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            default_target: record.default_target.clone(),
            connected: record.is_connected(),
            request_count: record.request_count.load(Ordering::Relaxed),
            last_heartbeat_age_millis: record.heartbeat_age().as_millis(),
            mapping_count: record.mappings.len(),
        }
    }
}

#[derive(Serialize)]
pub struct StatusSummary {
    pub connected_agents: usize,
    pub agents: Vec<AgentSummary>,
}

pub async fn status(State(state): State<AppState>) -> Json<StatusSummary> {
    let agents: Vec<AgentSummary> = state
        .registry
        .list_connected()
        .iter()
        .map(|a| AgentSummary::from(a.as_ref()))
        .collect();
    Json(StatusSummary {
        connected_agents: agents.len(),
        agents,
    })
}

/// `GET /clients` — identical data to `/status`, shaped for enumeration
/// (§4.9 lists these as two separate routes over the same underlying data).
pub async fn clients(state: State<AppState>) -> Json<Vec<AgentSummary>> {
    let Json(summary) = status(state).await;
    Json(summary.agents)
}

pub async fn client_by_id(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.registry.get(&id) {
        Some(record) if record.is_connected() => {
            Json(AgentSummary::from(record.as_ref())).into_response()
        }
        _ => DispatchError::AgentNotFound(id).into_response(),
    }
}

/// `GET /client/{id}/health` — the one operator route that actually engages
/// the tunnel: it synthesizes a `GET /health` request into agent `{id}`
/// through the normal dispatcher path (§4.9) instead of reading the
/// registry directly, so it reports what the agent's local target itself
/// says rather than merely whether the link is open.
pub async fn client_health(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let result = dispatcher::dispatch(
        &state,
        "GET",
        &format!("/client/{id}/health"),
        HashMap::new(),
        Vec::new(),
        HashMap::new(),
    )
    .await;

    match result {
        Ok(response) => crate::http_ingress::write_response(response),
        Err(err) => err.into_response(),
    }
}

#[derive(serde::Deserialize)]
pub struct RouteInfoQuery {
    pub path: String,
}

#[derive(Serialize)]
pub struct RouteInfo {
    #[serde(rename = "agentId")]
    pub agent_id: String,
    pub target: String,
    #[serde(rename = "rewrittenPath")]
    pub rewritten_path: String,
}

/// `GET /route-info?path=<p>` — reports what `pick_for` would do for `<p>`
/// without executing it (§4.9).
pub async fn route_info(State(state): State<AppState>, Query(q): Query<RouteInfoQuery>) -> Response {
    match state.registry.pick_for(&q.path) {
        Ok((agent, target, rewritten_path)) => Json(RouteInfo {
            agent_id: agent.id.clone(),
            target,
            rewritten_path,
        })
        .into_response(),
        Err(err) => DispatchError::from(err).into_response(),
    }
}
