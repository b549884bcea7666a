//! # Tunnel Agent
//!
//! Dials the relay, registers with a stable identity and mapping table,
//! and services incoming request frames by issuing local HTTP calls and
//! returning response frames. Reconnects on a fixed interval after any
//! disconnect (§2, §4.4).
//!
//! ## Modules
//!
//! - [`config`] — persisted JSON configuration + environment overrides (§6)
//! - [`error`]  — fatal startup error types (§7)
//! - [`egress`] — local HTTP egress: issue a request, fold failures into a synthesized response (§4.2)
//! - [`link`]   — the dial/register/heartbeat/serve state machine (§4.4)

mod config;
mod egress;
mod error;
mod link;

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};

use crate::config::AgentConfig;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tunnel_agent=info".into()),
        )
        .init();

    let config = match AgentConfig::load() {
        Ok(config) => config,
        Err(e) => {
            // §6/§7: a missing or malformed config file is a fatal startup
            // error, so the process exits non-zero before dialing anything.
            error!("failed to load agent configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        "starting agent '{}', relay at {}",
        config.name, config.server_ws_url
    );

    tokio::select! {
        _ = link::run(Arc::new(config)) => {
            // link::run loops forever over dial/register/serve/reconnect;
            // reaching here means that loop panicked or was otherwise
            // unwound, which is an unhandled internal failure (§6).
            error!("agent link loop exited unexpectedly");
            ExitCode::FAILURE
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received, closing link");
            ExitCode::SUCCESS
        }
    }
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to install SIGTERM handler: {e}");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
