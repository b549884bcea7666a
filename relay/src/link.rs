//! # Agent Link (relay side)
//!
//! Upgrades an inbound WebSocket into an agent connection, runs its
//! register/heartbeat/response/error frame dispatch, and tears down the
//! registry + pending-request entries on disconnect (§4.4 "Any state →
//! closing", §4.5 `register`/`unregister`).
//!
//! Grounded directly in the teacher's `server/src/handlers.rs`
//! (`ws_handler` → `handle_connection`: split the socket, spawn an
//! outbound-drain task, read-loop on the inbound half, clean up on exit)
//! but dispatching tunnel [`Frame`]s instead of the teacher's
//! `WsMessage` TCP-relay variants.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use tunnel_protocol::{
    CodecError, ErrorFramePayload, Frame, FrameKind, RegisterConfirmPayload, RegisterRequestPayload,
};

use crate::error::DispatchError;
use crate::registry::now_millis;
use crate::state::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

/// Per-link mutable context threaded through frame dispatch: the agent
/// identity is unknown until a `register` frame arrives, and the kill
/// sender is handed off to the registry exactly once, at that point.
struct LinkContext {
    agent_id: Option<String>,
    conn_token: Option<u64>,
    kill_tx: Option<oneshot::Sender<()>>,
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    let (kill_tx, mut kill_rx) = oneshot::channel::<()>();

    let codec = state.codec;

    // ── Outbound Task ──
    // Drains the per-link queue and writes each frame as a text message,
    // serializing sends so JSON boundaries are never interleaved (§5).
    let outbound = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match codec.encode(&frame) {
                Ok(t) => t,
                Err(e) => {
                    warn!("dropping outbound frame that failed to encode: {e}");
                    continue;
                }
            };
            if ws_sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut ctx = LinkContext {
        agent_id: None,
        conn_token: None,
        kill_tx: Some(kill_tx),
    };

    loop {
        tokio::select! {
            biased;
            _ = &mut kill_rx => {
                debug!("link forced closed (displaced or swept)");
                break;
            }
            frame = ws_stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match state.codec.decode(&text) {
                            Ok(decoded) => handle_frame(&state, &tx, &mut ctx, decoded).await,
                            Err(CodecError::FrameTooLarge { limit, actual }) => {
                                warn!("agent sent an oversize frame ({actual} > {limit}), closing link");
                                break;
                            }
                            Err(e) => warn!("malformed frame, dropping: {e}"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("websocket error: {e}");
                        break;
                    }
                }
            }
        }
    }

    outbound.abort();

    if let (Some(id), Some(token)) = (ctx.agent_id, ctx.conn_token) {
        if let Some(record) = state.registry.unregister(&id, token) {
            info!("agent {} disconnected", record.id);
            state.pending.reject_for_agent(&record.id);
        }
    }
}

async fn handle_frame(
    state: &AppState,
    tx: &mpsc::UnboundedSender<Frame>,
    ctx: &mut LinkContext,
    frame: Frame,
) {
    // Any inbound traffic proves liveness, not just heartbeats (§3: "most
    // recent inbound heartbeat or other traffic").
    if let Some(id) = ctx.agent_id.as_deref() {
        state.registry.on_heartbeat(id);
    }

    match frame.kind {
        FrameKind::Register => {
            if ctx.agent_id.is_some() {
                debug!("ignoring re-register on an already-registered link");
                return;
            }
            let Ok(req) = frame.payload_as::<RegisterRequestPayload>() else {
                warn!("register frame missing a valid payload; dropping");
                return;
            };
            let Some(kill_tx) = ctx.kill_tx.take() else {
                return;
            };

            // §3/§6: the stable id travels in the frame envelope's `clientId`
            // on register; the payload's `agentId` is a fallback for an agent
            // that only set it there.
            let requested_id = frame.agent_id.clone().or(req.agent_id);

            let (record, displaced) = state.registry.register(
                requested_id,
                req.name,
                req.default_target,
                req.mappings,
                tx.clone(),
                kill_tx,
            );

            ctx.agent_id = Some(record.id.clone());
            ctx.conn_token = Some(record.conn_token());

            if let Some(old) = displaced {
                info!("agent {} reconnected, displacing previous link", record.id);
                old.link.close();
                state.pending.reject_for_agent(&old.id);
            }

            info!("agent {} registered", record.id);
            let confirm = Frame::new(frame.id, FrameKind::Register, now_millis())
                .with_agent_id(record.id.clone())
                .with_payload(RegisterConfirmPayload { confirmed: true })
                .expect("RegisterConfirmPayload always serializes");
            let _ = tx.send(confirm);
        }
        FrameKind::Response => match frame.payload_as() {
            Ok(payload) => state.pending.resolve(&frame.id, payload),
            Err(e) => warn!("response frame missing a valid payload; dropping: {e}"),
        },
        FrameKind::Error => {
            let message = frame
                .payload_as::<ErrorFramePayload>()
                .map(|p| p.message)
                .unwrap_or_else(|_| "agent reported an unspecified error".to_string());
            state
                .pending
                .reject(&frame.id, DispatchError::AgentError(message));
        }
        FrameKind::Heartbeat => {
            let pong = Frame::new(frame.id, FrameKind::Pong, now_millis());
            let _ = tx.send(pong);
        }
        FrameKind::Pong => {
            // Consumed silently (§4.4).
        }
        FrameKind::Unknown => {
            debug!("discarding frame of unknown kind");
        }
    }
}
