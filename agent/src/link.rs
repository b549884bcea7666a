//! # Agent Link
//!
//! The dial → register → heartbeat → serve state machine that runs the
//! agent's side of one connection to the relay (§4.4). Grounded in the
//! teacher's `run_agent_loop`/`handle_server_message`
//! (`client/src-tauri/src/agent.rs`): an outer reconnect loop around
//! `tokio_tungstenite::connect_async`, an unbounded `mpsc` outbound queue
//! drained by a writer task (the teacher's "Outbound Sender Task"), a
//! heartbeat task on a fixed interval (the teacher's "Heartbeat Task",
//! generalized from a literal `Ping` to the spec's `heartbeat` frame kind),
//! and an inbound loop dispatching by frame kind.
//!
//! Unlike the teacher — which only ever sends `Ping`/reads `RegisterOk` —
//! this build runs the three-frame register handshake of §4.4/§9 (a
//! `register` prompt or unsolicited send, answered with another
//! `register`, confirmed with a third carrying `payload.confirmed =
//! true`), and treats inbound `heartbeat` frames as requiring a `pong`
//! reply, not just inbound `pong`s. Reconnect uses a fixed interval with
//! no backoff, narrowing the teacher's own already-backoff-free 3s
//! literal to the spec's configurable 5s default (§4.4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use tunnel_protocol::{
    mapping, CodecError, ErrorFramePayload, Frame, FrameCodec, FrameKind,
    RegisterConfirmPayload, RegisterRequestPayload, RequestFramePayload,
};
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::egress;

type RelaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Drives the state machine of §4.4 across one dial attempt. Transitions
/// are logged for operability; the loop only ever observes a legal one
/// because each state's exit is gated on the event that legally follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Open,
    Registering,
    Active,
}

/// Runs forever: dial, register, serve, and on any failure sleep for
/// `config.reconnect_interval` and dial again (§4.4 "Any state → closing").
/// The agent's identity — configured or relay-minted on first connect — is
/// carried across reconnect attempts so it presents the same stable
/// identity each time (§4.4).
pub async fn run(config: Arc<AgentConfig>) {
    let codec = FrameCodec::default();
    let http_client = egress::build_http_client();
    let mut agent_id = config.agent_id.clone();

    loop {
        info!("dialing relay at {}", config.server_ws_url);
        match connect_async(config.server_ws_url.as_str()).await {
            Ok((socket, _response)) => {
                info!("connected to relay");
                agent_id = run_session(&config, &codec, &http_client, socket, agent_id).await;
            }
            Err(e) => {
                error!("failed to connect to relay: {e}");
            }
        }

        info!("reconnecting in {:?}", config.reconnect_interval);
        tokio::time::sleep(config.reconnect_interval).await;
    }
}

/// Runs one connection end to end and returns the agent id learned during
/// it (or unchanged, if registration never completed), so the outer loop
/// can carry it into the next reconnect attempt.
async fn run_session(
    config: &Arc<AgentConfig>,
    codec: &FrameCodec,
    http_client: &reqwest::Client,
    socket: RelaySocket,
    agent_id: Option<String>,
) -> Option<String> {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();

    let codec_out = *codec;
    let outbound = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match codec_out.encode(&frame) {
                Ok(text) => {
                    if ws_sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("dropping outbound frame that failed to encode: {e}"),
            }
        }
    });

    if tx.send(register_frame(config, agent_id.clone())).is_err() {
        outbound.abort();
        return agent_id;
    }

    let mut state = LinkState::Open;
    let mut active_agent_id = agent_id;
    let mut heartbeat_handle: Option<JoinHandle<()>> = None;

    loop {
        match ws_stream.next().await {
            Some(Ok(Message::Text(text))) => match codec.decode(&text) {
                Ok(frame) => {
                    state = handle_frame(
                        config,
                        http_client,
                        &tx,
                        frame,
                        state,
                        &mut active_agent_id,
                        &mut heartbeat_handle,
                    )
                    .await;
                }
                Err(CodecError::FrameTooLarge { limit, actual }) => {
                    warn!("relay sent an oversize frame ({actual} > {limit}), closing link");
                    break;
                }
                Err(e) => warn!("malformed frame from relay, dropping: {e}"),
            },
            Some(Ok(Message::Close(_))) | None => {
                info!("relay closed the link");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("websocket error, closing link: {e}");
                break;
            }
        }
    }

    if let Some(handle) = heartbeat_handle.take() {
        handle.abort();
    }
    outbound.abort();
    active_agent_id
}

fn register_frame(config: &AgentConfig, agent_id: Option<String>) -> Frame {
    let payload = RegisterRequestPayload {
        name: config.name.clone(),
        default_target: config.default_target.clone(),
        mappings: config.mappings.clone(),
        agent_id: agent_id.clone(),
    };
    // §3/§6 carry the stable id in the frame envelope's `clientId`; it's also
    // set on the payload so a relay that only reads `agentId` there still works.
    let mut frame = Frame::new(Uuid::new_v4().to_string(), FrameKind::Register, now_millis())
        .with_payload(payload)
        .expect("RegisterRequestPayload always serializes");
    if let Some(id) = agent_id {
        frame = frame.with_agent_id(id);
    }
    frame
}

async fn handle_frame(
    config: &Arc<AgentConfig>,
    http_client: &reqwest::Client,
    tx: &mpsc::UnboundedSender<Frame>,
    frame: Frame,
    state: LinkState,
    active_agent_id: &mut Option<String>,
    heartbeat_handle: &mut Option<JoinHandle<()>>,
) -> LinkState {
    match frame.kind {
        FrameKind::Register => handle_register(
            config,
            tx,
            frame,
            state,
            active_agent_id,
            heartbeat_handle,
        ),
        FrameKind::Request => {
            match frame.payload_as::<RequestFramePayload>() {
                Ok(payload) => spawn_request_handler(
                    config.clone(),
                    http_client.clone(),
                    tx.clone(),
                    frame.id,
                    payload,
                ),
                Err(e) => {
                    let err = Frame::new(frame.id, FrameKind::Error, now_millis())
                        .with_payload(ErrorFramePayload {
                            message: format!("unparseable request payload: {e}"),
                            code: Some("BAD_REQUEST".to_string()),
                        })
                        .expect("ErrorFramePayload always serializes");
                    let _ = tx.send(err);
                }
            }
            state
        }
        FrameKind::Heartbeat => {
            let pong = Frame::new(frame.id, FrameKind::Pong, now_millis());
            let _ = tx.send(pong);
            state
        }
        FrameKind::Pong => state,
        FrameKind::Error => {
            let message = frame
                .payload_as::<ErrorFramePayload>()
                .map(|p| p.message)
                .unwrap_or_else(|_| "relay reported an unspecified error".to_string());
            warn!("relay sent an error frame: {message}");
            state
        }
        FrameKind::Response => {
            debug!("ignoring unexpected response frame from relay");
            state
        }
        FrameKind::Unknown => {
            debug!("discarding frame of unknown kind");
            state
        }
    }
}

fn handle_register(
    config: &Arc<AgentConfig>,
    tx: &mpsc::UnboundedSender<Frame>,
    frame: Frame,
    state: LinkState,
    active_agent_id: &mut Option<String>,
    heartbeat_handle: &mut Option<JoinHandle<()>>,
) -> LinkState {
    if frame.payload.is_none() {
        // The relay's post-accept prompt (§4.4: "open → registering"): an
        // empty `register` frame inviting us to (re)send ours.
        debug!("relay prompted for registration");
        let _ = tx.send(register_frame(config, active_agent_id.clone()));
        return LinkState::Registering;
    }

    match frame.payload_as::<RegisterConfirmPayload>() {
        Ok(confirm) if confirm.confirmed => {
            let id = frame
                .agent_id
                .clone()
                .or_else(|| active_agent_id.clone())
                .unwrap_or_default();
            info!("registered with relay as '{id}'");
            *active_agent_id = Some(id.clone());

            if let Some(handle) = heartbeat_handle.take() {
                handle.abort();
            }
            let hb_tx = tx.clone();
            let interval = config.heartbeat_interval;
            *heartbeat_handle = Some(tokio::spawn(heartbeat_loop(hb_tx, interval, id)));

            LinkState::Active
        }
        _ => {
            debug!("ignoring register frame without a confirmation");
            state
        }
    }
}

/// Emits a heartbeat frame every `interval` while the link is active (§4.4).
async fn heartbeat_loop(tx: mpsc::UnboundedSender<Frame>, interval: Duration, agent_id: String) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // the first tick fires immediately; skip it
    loop {
        ticker.tick().await;
        let frame = Frame::new(Uuid::new_v4().to_string(), FrameKind::Heartbeat, now_millis())
            .with_agent_id(agent_id.clone());
        if tx.send(frame).is_err() {
            break;
        }
    }
}

/// Services one `request` frame concurrently with any others in flight on
/// this link (§4.4: "Request handling is concurrent").
fn spawn_request_handler(
    config: Arc<AgentConfig>,
    http_client: reqwest::Client,
    tx: mpsc::UnboundedSender<Frame>,
    request_id: String,
    mut payload: RequestFramePayload,
) {
    tokio::spawn(async move {
        let (base_url, path) = resolve_target(&config, &payload);
        payload.path = path;
        let response = egress::issue(&http_client, &base_url, &payload, config.request_timeout).await;
        let frame = Frame::new(request_id, FrameKind::Response, now_millis())
            .with_payload(response)
            .expect("ResponseFramePayload always serializes");
        let _ = tx.send(frame);
    });
}

/// Picks the local-target base URL and rewritten path for a `request`
/// frame (§4.3's closing paragraph): trust the relay's `target_mapping`
/// annotation when present — it already carries the rewrite the relay
/// computed — otherwise re-resolve against this agent's own table.
fn resolve_target(config: &AgentConfig, payload: &RequestFramePayload) -> (String, String) {
    match &payload.target_mapping {
        Some(target) => (target.clone(), payload.path.clone()),
        None => mapping::resolve(&payload.path, &config.mappings, &config.default_target),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunnel_protocol::Mapping;

    fn config(mappings: Vec<Mapping>) -> AgentConfig {
        AgentConfig {
            agent_id: Some("a1".into()),
            name: "agent-one".into(),
            default_target: "http://default".into(),
            mappings,
            server_ws_url: "ws://localhost:3001/ws".into(),
            reconnect_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
        }
    }

    fn request(path: &str, target_mapping: Option<&str>) -> RequestFramePayload {
        RequestFramePayload {
            method: "GET".into(),
            path: path.to_string(),
            headers: HashMap::new(),
            body: None,
            query: HashMap::new(),
            target_mapping: target_mapping.map(str::to_string),
        }
    }

    #[test]
    fn trusts_the_relays_target_mapping_annotation_when_present() {
        let cfg = config(vec![]);
        let req = request("/v1/x", Some("http://five-thousand"));
        let (base, path) = resolve_target(&cfg, &req);
        assert_eq!(base, "http://five-thousand");
        assert_eq!(path, "/v1/x");
    }

    #[test]
    fn re_resolves_against_its_own_table_when_annotation_absent() {
        let mapping = Mapping {
            prefix: "api".into(),
            target: "http://five-thousand".into(),
            description: String::new(),
            enabled: true,
            health_check: None,
            protected: None,
        };
        let cfg = config(vec![mapping]);
        let req = request("/api/v1/x", None);
        let (base, path) = resolve_target(&cfg, &req);
        assert_eq!(base, "http://five-thousand");
        assert_eq!(path, "/v1/x");
    }
}
