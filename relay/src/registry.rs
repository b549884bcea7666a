//! # Agent Registry
//!
//! Tracks connected agents and the liveness/load data needed to pick one
//! for an inbound request (§4.5). Grounded in the teacher's
//! `server/src/state.rs` (`DashMap`-backed registries, the
//! `generate_agent_id` short-code scheme) but generalized from a bare
//! "sender + nothing else" `AgentInfo` into the full record §3 specifies
//! (mappings, default target, liveness, load).
//!
//! Per the cyclic-ownership design note (§9), the registry never reaches
//! into the pending-request table itself. `register`/`unregister`/`sweep`
//! return the displaced/evicted records to their caller, who is
//! responsible for failing those agents' pending requests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tunnel_protocol::{mapping, Frame, Mapping};
use uuid::Uuid;

/// Generates a short, human-readable agent ID from a UUID, e.g. `A3F8-B2C1`.
pub fn generate_agent_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{}-{}", uuid[..4].to_uppercase(), uuid[4..8].to_uppercase())
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// The live connection half of an [`AgentRecord`]: a channel to push frames
/// out to the agent, and a one-shot used to force the connection task to
/// tear itself down (on displacement or sweep eviction).
pub struct AgentLink {
    sender: mpsc::UnboundedSender<Frame>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
}

impl AgentLink {
    pub fn new(sender: mpsc::UnboundedSender<Frame>, kill: oneshot::Sender<()>) -> Self {
        Self {
            sender,
            kill: Mutex::new(Some(kill)),
        }
    }

    /// Queues `frame` for delivery; fails if the connection has already closed.
    pub fn send(&self, frame: Frame) -> Result<(), String> {
        self.sender
            .send(frame)
            .map_err(|_| "agent link closed".to_string())
    }

    /// Forces the owning connection task to close, if it hasn't already.
    pub fn close(&self) {
        if let Some(tx) = self.kill.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }
}

/// A connected agent (§3).
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    pub default_target: String,
    pub mappings: Vec<Mapping>,
    pub link: AgentLink,
    connected: AtomicBool,
    /// §3: "last_heartbeat only increases" — backed by `Instant`, not
    /// wall-clock time, so a clock step backwards can never violate that.
    last_heartbeat: Mutex<Instant>,
    pub request_count: AtomicU64,
    /// Distinguishes this connection from any other that later claims the
    /// same `id` — guards `unregister`/`sweep` against tearing down a
    /// record that already displaced this one.
    conn_token: u64,
}

impl AgentRecord {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Elapsed time since the most recent inbound heartbeat or other
    /// traffic (§3).
    pub fn heartbeat_age(&self) -> Duration {
        self.last_heartbeat.lock().unwrap().elapsed()
    }

    pub fn touch_heartbeat(&self) {
        *self.last_heartbeat.lock().unwrap() = Instant::now();
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn conn_token(&self) -> u64 {
        self.conn_token
    }
}

static NEXT_CONN_TOKEN: AtomicU64 = AtomicU64::new(1);

#[derive(Clone)]
pub struct AgentRegistry {
    agents: Arc<DashMap<String, Arc<AgentRecord>>>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: Arc::new(DashMap::new()),
        }
    }

    /// Admits a newly-registered agent (§4.5).
    ///
    /// If `requested_id` is already connected, that record is displaced:
    /// it's marked disconnected and returned to the caller so its link can
    /// be closed and its pending requests failed. The invariant that at
    /// most one record per `id` is connected holds the instant this
    /// function returns (§3).
    pub fn register(
        &self,
        requested_id: Option<String>,
        name: String,
        default_target: String,
        mappings: Vec<Mapping>,
        sender: mpsc::UnboundedSender<Frame>,
        kill: oneshot::Sender<()>,
    ) -> (Arc<AgentRecord>, Option<Arc<AgentRecord>>) {
        let id = requested_id
            .filter(|s| !s.is_empty())
            .unwrap_or_else(generate_agent_id);

        let record = Arc::new(AgentRecord {
            id: id.clone(),
            name,
            default_target,
            mappings,
            link: AgentLink::new(sender, kill),
            connected: AtomicBool::new(true),
            last_heartbeat: Mutex::new(Instant::now()),
            request_count: AtomicU64::new(0),
            conn_token: NEXT_CONN_TOKEN.fetch_add(1, Ordering::Relaxed),
        });

        let displaced = self.agents.insert(id, record.clone());
        if let Some(old) = &displaced {
            old.mark_disconnected();
        }
        (record, displaced)
    }

    /// Removes the connection identified by `(id, conn_token)`, but only if
    /// it is still the record installed in the map — a connection that was
    /// already displaced by a newer registration must not evict the
    /// replacement (§3 invariant).
    pub fn unregister(&self, id: &str, conn_token: u64) -> Option<Arc<AgentRecord>> {
        let removed = self
            .agents
            .remove_if(id, |_, rec| rec.conn_token == conn_token);
        removed.map(|(_, rec)| {
            rec.mark_disconnected();
            rec
        })
    }

    pub fn get(&self, id: &str) -> Option<Arc<AgentRecord>> {
        self.agents.get(id).map(|e| e.value().clone())
    }

    pub fn list_connected(&self) -> Vec<Arc<AgentRecord>> {
        self.agents
            .iter()
            .filter(|e| e.is_connected())
            .map(|e| e.value().clone())
            .collect()
    }

    /// Picks the agent and resolved `(target, rewritten_path)` for an
    /// inbound HTTP path (§4.5, §6).
    ///
    /// `/client/{id}/...` pins the agent; otherwise the connected agent
    /// with the smallest `request_count` is selected.
    pub fn pick_for(&self, path: &str) -> Result<(Arc<AgentRecord>, String, String), PickError> {
        if let Some(rest) = path.strip_prefix("/client/") {
            let mut parts = rest.splitn(2, '/');
            let id = parts.next().unwrap_or("");
            let remainder = parts.next().unwrap_or("");
            let agent = self.get(id).ok_or_else(|| PickError::NotFound(id.to_string()))?;
            if !agent.is_connected() {
                return Err(PickError::NotFound(id.to_string()));
            }
            let remainder_path = format!("/{remainder}");
            let (target, rewritten) = mapping::resolve(&remainder_path, &agent.mappings, &agent.default_target);
            return Ok((agent, target, rewritten));
        }

        let agent = self
            .list_connected()
            .into_iter()
            .min_by_key(|a| a.request_count.load(Ordering::Relaxed))
            .ok_or(PickError::NoneAvailable)?;
        let (target, rewritten) = mapping::resolve(path, &agent.mappings, &agent.default_target);
        Ok((agent, target, rewritten))
    }

    pub fn on_heartbeat(&self, id: &str) {
        if let Some(rec) = self.get(id) {
            rec.touch_heartbeat();
        }
    }

    /// Evicts every agent whose last heartbeat is strictly older than
    /// `heartbeat_timeout` and returns the evicted records so the caller
    /// can fail their pending requests (§4.5, §8).
    pub fn sweep(&self, heartbeat_timeout: Duration) -> Vec<Arc<AgentRecord>> {
        let expired: Vec<Arc<AgentRecord>> = self
            .agents
            .iter()
            .filter(|e| e.value().heartbeat_age() > heartbeat_timeout)
            .map(|e| e.value().clone())
            .collect();

        for rec in &expired {
            self.unregister(&rec.id, rec.conn_token);
            rec.link.close();
        }
        expired
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickError {
    NotFound(String),
    NoneAvailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (mpsc::UnboundedSender<Frame>, oneshot::Sender<()>) {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (kill_tx, _kill_rx) = oneshot::channel();
        (tx, kill_tx)
    }

    #[test]
    fn duplicate_registration_displaces_the_old_record() {
        let registry = AgentRegistry::new();
        let (tx1, kill1) = channel();
        let (record1, displaced1) = registry.register(
            Some("a1".into()),
            "agent-one".into(),
            "http://localhost:8080".into(),
            vec![],
            tx1,
            kill1,
        );
        assert!(displaced1.is_none());
        assert!(record1.is_connected());

        let (tx2, kill2) = channel();
        let (record2, displaced2) = registry.register(
            Some("a1".into()),
            "agent-one-reconnected".into(),
            "http://localhost:8080".into(),
            vec![],
            tx2,
            kill2,
        );

        let displaced = displaced2.expect("first record should be displaced");
        assert!(!displaced.is_connected());
        assert!(record2.is_connected());

        // only the new connection is reachable by id
        let fetched = registry.get("a1").unwrap();
        assert!(Arc::ptr_eq(&fetched, &record2));
    }

    #[test]
    fn stale_unregister_does_not_evict_the_replacement() {
        let registry = AgentRegistry::new();
        let (tx1, kill1) = channel();
        let (record1, _) = registry.register(
            Some("a1".into()),
            "first".into(),
            "http://localhost:8080".into(),
            vec![],
            tx1,
            kill1,
        );
        let stale_token = record1.conn_token;

        let (tx2, kill2) = channel();
        registry.register(
            Some("a1".into()),
            "second".into(),
            "http://localhost:9090".into(),
            vec![],
            tx2,
            kill2,
        );

        // A disconnect notification racing in for the *old* connection
        // must not remove the new one.
        let result = registry.unregister("a1", stale_token);
        assert!(result.is_none());
        assert!(registry.get("a1").is_some());
    }

    #[test]
    fn pick_for_pins_to_client_path_id() {
        let registry = AgentRegistry::new();
        let (tx, kill) = channel();
        registry.register(
            Some("a1".into()),
            "agent-one".into(),
            "http://localhost:8080".into(),
            vec![],
            tx,
            kill,
        );

        let (agent, target, path) = registry.pick_for("/client/a1/api/test").unwrap();
        assert_eq!(agent.id, "a1");
        assert_eq!(target, "http://localhost:8080");
        assert_eq!(path, "/api/test");
    }

    #[test]
    fn pick_for_reports_not_found_for_unknown_agent() {
        let registry = AgentRegistry::new();
        let err = registry.pick_for("/client/ghost/x").unwrap_err();
        assert_eq!(err, PickError::NotFound("ghost".into()));
    }

    #[test]
    fn pick_for_least_loaded_without_pin() {
        let registry = AgentRegistry::new();
        let (tx1, kill1) = channel();
        let (busy, _) = registry.register(
            Some("busy".into()),
            "busy".into(),
            "http://busy".into(),
            vec![],
            tx1,
            kill1,
        );
        busy.request_count.store(5, Ordering::Relaxed);

        let (tx2, kill2) = channel();
        registry.register(
            Some("idle".into()),
            "idle".into(),
            "http://idle".into(),
            vec![],
            tx2,
            kill2,
        );

        let (agent, _, _) = registry.pick_for("/anything").unwrap();
        assert_eq!(agent.id, "idle");
    }

    #[test]
    fn sweep_evicts_stale_agents() {
        let registry = AgentRegistry::new();
        let (tx, kill) = channel();
        registry.register(
            Some("a1".into()),
            "agent-one".into(),
            "http://localhost:8080".into(),
            vec![],
            tx,
            kill,
        );
        // Let the heartbeat age past a short timeout instead of rewinding a
        // clock — last_heartbeat is monotonic and can't be wound backwards.
        std::thread::sleep(Duration::from_millis(20));

        let evicted = registry.sweep(Duration::from_millis(10));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, "a1");
        assert!(registry.get("a1").is_none());
    }
}
