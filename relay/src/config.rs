//! Relay startup configuration, read once from the environment (§6).
//!
//! The teacher hardcodes its listening port as a literal in `main.rs`; this
//! generalizes that single value into the full set of knobs §4/§6 name,
//! collected in one place so the rest of the relay never touches
//! `std::env::var` directly.

use std::time::Duration;

/// Fully resolved relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Port the HTTP ingress listens on (§6: `PORT`, default 3000).
    pub http_port: u16,
    /// Port the tunnel (agent) listener listens on (§6: `WS_PORT`, default 3001).
    pub ws_port: u16,
    /// How long a response may take before the pending request times out (§4.6).
    pub request_timeout: Duration,
    /// How long an agent may go without a heartbeat before it's swept (§4.5).
    pub heartbeat_timeout: Duration,
    /// Maximum size of a single tunnel frame (§4.1).
    pub max_frame_size: usize,
    /// Maximum size of a single HTTP request body accepted by the ingress (§4.8).
    pub max_body_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            http_port: 3000,
            ws_port: 3001,
            request_timeout: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            max_frame_size: tunnel_protocol::DEFAULT_MAX_FRAME_SIZE,
            max_body_size: 10 * 1024 * 1024,
        }
    }
}

impl RelayConfig {
    /// Reads the configuration from environment variables, falling back to
    /// [`RelayConfig::default`] for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            http_port: env_parsed("PORT").unwrap_or(defaults.http_port),
            ws_port: env_parsed("WS_PORT").unwrap_or(defaults.ws_port),
            request_timeout: env_secs("REQUEST_TIMEOUT_SECS")
                .unwrap_or(defaults.request_timeout),
            heartbeat_timeout: env_secs("HEARTBEAT_TIMEOUT_SECS")
                .unwrap_or(defaults.heartbeat_timeout),
            max_frame_size: env_parsed("MAX_FRAME_SIZE_BYTES").unwrap_or(defaults.max_frame_size),
            max_body_size: env_parsed("MAX_BODY_SIZE_BYTES").unwrap_or(defaults.max_body_size),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parsed::<u64>(key).map(Duration::from_secs)
}
