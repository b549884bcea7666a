//! # Liveness Sweep
//!
//! Periodically evicts agents whose heartbeat has gone stale (§4.5, §8
//! "liveness sweep"). There is no teacher equivalent — its tunnel relies on
//! TCP half-close detection, not an application-level heartbeat — so this
//! is a fresh periodic task built from §4.5's `sweep()` operation and wired
//! the way `main.rs` spawns any other background task.

use std::time::Duration;

use tracing::info;

use crate::state::AppState;

/// Runs forever, sweeping every `interval` and failing the pending requests
/// of any agent the sweep evicts (§4.6 "agent disconnect" terminal outcome).
pub async fn run(state: AppState, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let evicted = state.registry.sweep(state.config.heartbeat_timeout);
        for record in evicted {
            info!("sweep evicted stale agent {}", record.id);
            state.pending.reject_for_agent(&record.id);
        }
    }
}
