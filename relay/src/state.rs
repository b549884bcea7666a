//! Shared application state, cloned into every handler.
//!
//! Per §9's "Global state on the relay" design note, the registry and
//! pending table are values constructed once at startup (in [`AppState::new`])
//! and passed explicitly into the ingress handler, the agent-link accept
//! handler, and the sweep task — never reached for via a module-level
//! singleton the way the source's registry/pending table behave.

use std::sync::Arc;

use tunnel_protocol::FrameCodec;

use crate::config::RelayConfig;
use crate::pending::PendingTable;
use crate::registry::AgentRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: AgentRegistry,
    pub pending: PendingTable,
    pub codec: FrameCodec,
    pub config: Arc<RelayConfig>,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        let codec = FrameCodec::new(config.max_frame_size);
        Self {
            registry: AgentRegistry::new(),
            pending: PendingTable::new(),
            codec,
            config: Arc::new(config),
        }
    }
}
