//! # Tunnel Relay
//!
//! Public-facing process of a reverse HTTP tunnel: accepts inbound HTTP on
//! one port and framed tunnel connections from agents on a second, picks an
//! agent for each inbound request, and writes the eventual response back to
//! the HTTP caller (§2).
//!
//! ## Modules
//!
//! - [`config`]     — environment-driven startup configuration (§6)
//! - [`error`]       — dispatch error types and their HTTP/JSON mapping (§7)
//! - [`registry`]    — connected-agent bookkeeping and selection (§4.5)
//! - [`pending`]     — request/response correlation and timeouts (§4.6)
//! - [`dispatcher`]  — turns one inbound HTTP request into a tunnel round trip (§4.7)
//! - [`http_ingress`] — the generic HTTP ⇄ tunnel translation layer (§4.8)
//! - [`api`]         — read-only operator endpoints (§4.9)
//! - [`link`]        — per-agent WebSocket connection handling (§4.4's relay side)
//! - [`sweep`]       — periodic heartbeat-liveness eviction (§4.5)
//! - [`state`]       — shared application state

mod api;
mod config;
mod dispatcher;
mod error;
mod http_ingress;
mod link;
mod pending;
mod registry;
mod state;
mod sweep;

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::RelayConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tunnel_relay=info".into()),
        )
        .init();

    let config = RelayConfig::from_env();
    let state = AppState::new(config);

    let http_addr = SocketAddr::from(([0, 0, 0, 0], state.config.http_port));
    let ws_addr = SocketAddr::from(([0, 0, 0, 0], state.config.ws_port));
    let heartbeat_timeout = state.config.heartbeat_timeout;

    tokio::spawn(sweep::run(state.clone(), heartbeat_timeout / 3));

    let http_app = Router::new()
        .route("/health", get(api::health))
        .route("/status", get(api::status))
        .route("/clients", get(api::clients))
        .route("/clients/{id}", get(api::client_by_id))
        .route("/client/{id}/health", get(api::client_health))
        .route("/route-info", get(api::route_info))
        .fallback(http_ingress::handle)
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    let ws_app = Router::new()
        .route("/ws", get(link::ws_handler))
        .with_state(state);

    let http_listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .expect("failed to bind HTTP ingress listener");
    let ws_listener = tokio::net::TcpListener::bind(ws_addr)
        .await
        .expect("failed to bind agent tunnel listener");

    info!("HTTP ingress listening on {}", http_addr);
    info!("agent tunnel listening on {}", ws_addr);

    let http_server = axum::serve(http_listener, http_app).with_graceful_shutdown(shutdown_signal());
    let ws_server = axum::serve(ws_listener, ws_app).with_graceful_shutdown(shutdown_signal());

    let (http_result, ws_result) = tokio::join!(http_server, ws_server);
    if let Err(e) = http_result {
        tracing::error!("HTTP ingress server error: {e}");
    }
    if let Err(e) = ws_result {
        tracing::error!("agent tunnel server error: {e}");
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, draining connections");
}
