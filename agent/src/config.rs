//! # Agent Configuration
//!
//! Loads the persisted JSON configuration document (§6) and layers the
//! `SERVER_WS_URL` / `RECONNECT_INTERVAL` / `HEARTBEAT_INTERVAL`
//! environment overrides on top. Absence of the file is a fatal startup
//! error, matching the agent's non-zero exit code contract (§6, §7).
//!
//! The teacher's client instead keeps all of this in Tauri-managed UI
//! state edited interactively (`client/src-tauri/src/state.rs`,
//! `commands.rs`); this build has no GUI shell, so the same shape of data
//! is read once from disk at startup per §6's literal schema.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tunnel_protocol::Mapping;

use crate::error::ConfigError;

/// `client` section of the persisted config (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "defaultTarget")]
    pub default_target: String,
}

/// `options` section: reserved for future behavior, ignored by this build (§6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptionsSection {
    #[serde(rename = "enableFallback", default)]
    pub enable_fallback: bool,
    #[serde(rename = "healthCheckInterval", default)]
    pub health_check_interval: Option<u64>,
    #[serde(rename = "retryFailedRequests", default)]
    pub retry_failed_requests: bool,
    #[serde(rename = "maxRetries", default)]
    pub max_retries: Option<u32>,
}

/// The full persisted document (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedConfig {
    pub client: ClientSection,
    #[serde(default)]
    pub mappings: Vec<Mapping>,
    #[serde(default)]
    pub options: OptionsSection,
}

/// Fully resolved agent configuration: the persisted document plus the
/// environment overrides layered on top (§6 "Environment knobs").
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub agent_id: Option<String>,
    pub name: String,
    pub default_target: String,
    pub mappings: Vec<Mapping>,
    pub server_ws_url: String,
    pub reconnect_interval: Duration,
    pub heartbeat_interval: Duration,
    /// Per-request wall-clock timeout enforced by the local HTTP egress
    /// (§4.2, default 30s). Not one of §6's named environment knobs; kept
    /// overridable anyway via `REQUEST_TIMEOUT_SECS` for symmetry with the
    /// relay's own timeout knob, since an egress with no way to retune its
    /// timeout independently of the relay's is an incomplete ambient stack.
    pub request_timeout: Duration,
}

const DEFAULT_CONFIG_PATH: &str = "agent.json";
const DEFAULT_SERVER_WS_URL: &str = "ws://localhost:3001/ws";

impl AgentConfig {
    /// Loads configuration from the path named by `AGENT_CONFIG`
    /// (default `agent.json`), failing fatally if the file is absent or
    /// malformed (§6).
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("AGENT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let text = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::Missing(path.clone())
            } else {
                ConfigError::Io(path.clone(), e)
            }
        })?;
        let persisted: PersistedConfig =
            serde_json::from_str(&text).map_err(|e| ConfigError::Malformed(path.clone(), e))?;

        Ok(Self {
            agent_id: persisted.client.id,
            name: persisted.client.name,
            default_target: persisted.client.default_target,
            mappings: persisted.mappings,
            server_ws_url: std::env::var("SERVER_WS_URL")
                .unwrap_or_else(|_| DEFAULT_SERVER_WS_URL.to_string()),
            reconnect_interval: env_secs("RECONNECT_INTERVAL").unwrap_or(Duration::from_secs(5)),
            heartbeat_interval: env_secs("HEARTBEAT_INTERVAL").unwrap_or(Duration::from_secs(30)),
            request_timeout: env_secs("REQUEST_TIMEOUT_SECS").unwrap_or(Duration::from_secs(30)),
        })
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persisted_config_round_trips_the_wire_schema() {
        let json = r#"{
            "client": {"id": "a1", "name": "box-1", "defaultTarget": "http://localhost:8080"},
            "mappings": [{"prefix": "api", "target": "http://localhost:5000", "description": "", "enabled": true}],
            "options": {"enableFallback": true, "retryFailedRequests": false, "maxRetries": 3}
        }"#;
        let parsed: PersistedConfig = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.client.id.as_deref(), Some("a1"));
        assert_eq!(parsed.mappings.len(), 1);
        assert_eq!(parsed.options.max_retries, Some(3));
    }

    #[test]
    fn missing_options_section_defaults_cleanly() {
        let json = r#"{"client": {"name": "box-1", "defaultTarget": "http://localhost:8080"}}"#;
        let parsed: PersistedConfig = serde_json::from_str(json).unwrap();
        assert!(parsed.mappings.is_empty());
        assert!(!parsed.options.enable_fallback);
    }
}
