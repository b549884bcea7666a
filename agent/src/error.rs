//! Agent-side error types (§6, §7).
//!
//! Grounded in the same `thiserror` pattern as the relay's
//! [`tunnel_relay's error module`](../../relay/src/error.rs) (itself
//! borrowed from `getsentry-synapse`'s `IngestRouterError`), since the
//! teacher's agent shell only ever logged `String`s and never exited
//! non-zero on a config problem the way §6 requires.

use thiserror::Error;

/// Errors that abort agent startup with a non-zero exit code (§6: "Agent
/// exits non-zero on missing or malformed config").
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found at {0}")]
    Missing(String),
    #[error("config file at {0} is not valid JSON: {1}")]
    Malformed(String, serde_json::Error),
    #[error("failed to read config file at {0}: {1}")]
    Io(String, std::io::Error),
}
