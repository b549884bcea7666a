//! # Pending-Request Table
//!
//! Correlates outstanding requests with the oneshot completion channel a
//! waiting HTTP handler is parked on, and owns each request's deadline
//! timer (§4.6). There is no teacher equivalent — the teacher never
//! correlates a response to a specific caller, since its tunnel is a raw
//! byte relay with no request/response framing — so this module is built
//! directly from §3/§4.6/§8, using the same `DashMap` discipline as
//! [`crate::registry`] for consistency with the rest of the relay.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tunnel_protocol::ResponseFramePayload;

use crate::error::DispatchError;
use crate::registry::AgentRecord;

/// The terminal outcome of a pending request.
pub enum PendingOutcome {
    Response(ResponseFramePayload),
    Error(DispatchError),
}

struct PendingRecord {
    agent: Arc<AgentRecord>,
    created_at: Instant,
    completion: Mutex<Option<oneshot::Sender<PendingOutcome>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl PendingRecord {
    /// Signals `outcome` to the waiter, if nobody has already done so.
    /// Idempotent: a second call (e.g. a response racing a timeout) is a
    /// silent no-op (§9).
    ///
    /// `request_count` is decremented only when `outcome` is a real
    /// response — a rejected request (timeout, disconnect, send failure)
    /// leaves the counter incremented, matching §8 scenario 3 verbatim
    /// ("the agent's `request_count` remains incremented" after a timeout).
    fn complete(&self, outcome: PendingOutcome) {
        if let Some(handle) = self.timer.lock().unwrap().take() {
            handle.abort();
        }
        if matches!(outcome, PendingOutcome::Response(_)) {
            self.agent
                .request_count
                .fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
        }
        if let Some(tx) = self.completion.lock().unwrap().take() {
            let _ = tx.send(outcome);
        }
    }
}

#[derive(Clone)]
pub struct PendingTable {
    entries: Arc<DashMap<String, Arc<PendingRecord>>>,
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Registers a new pending request and starts its deadline timer.
    /// Increments `agent.request_count` (§4.6); the matching decrement
    /// happens in [`PendingRecord::complete`] regardless of which of
    /// resolve/reject/timeout/reject_for_agent fires first.
    pub fn add(
        &self,
        request_id: String,
        agent: Arc<AgentRecord>,
        deadline: Duration,
    ) -> oneshot::Receiver<PendingOutcome> {
        let (tx, rx) = oneshot::channel();
        agent
            .request_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let record = Arc::new(PendingRecord {
            agent,
            created_at: Instant::now(),
            completion: Mutex::new(Some(tx)),
            timer: Mutex::new(None),
        });
        self.entries.insert(request_id.clone(), record.clone());

        let entries = self.entries.clone();
        let rid = request_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if let Some((_, rec)) = entries.remove(&rid) {
                rec.complete(PendingOutcome::Error(DispatchError::RequestTimeout));
            }
        });
        *record.timer.lock().unwrap() = Some(handle);

        rx
    }

    /// Resolves a pending request with a response frame (§4.6). Annotates
    /// `response.duration` with the elapsed time since `add`.
    pub fn resolve(&self, request_id: &str, mut response: ResponseFramePayload) {
        if let Some((_, rec)) = self.entries.remove(request_id) {
            response.duration = Some(rec.created_at.elapsed().as_millis() as i64);
            rec.complete(PendingOutcome::Response(response));
        }
    }

    /// Fails a single pending request.
    pub fn reject(&self, request_id: &str, error: DispatchError) {
        if let Some((_, rec)) = self.entries.remove(request_id) {
            rec.complete(PendingOutcome::Error(error));
        }
    }

    /// Fails every pending request bound to `agent_id` — and only those,
    /// fixing the source's `rejectRequestsForClient` bug that rejected
    /// every pending request regardless of owner (§9).
    pub fn reject_for_agent(&self, agent_id: &str) {
        let ids: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().agent.id == agent_id)
            .map(|e| e.key().clone())
            .collect();
        for id in ids {
            self.reject(&id, DispatchError::AgentDisconnected);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AgentRegistry;
    use tokio::sync::mpsc;

    fn test_agent(registry: &AgentRegistry, id: &str) -> Arc<AgentRecord> {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (kill_tx, _kill_rx) = oneshot::channel();
        let (record, _) = registry.register(
            Some(id.to_string()),
            "name".into(),
            "http://localhost".into(),
            vec![],
            tx,
            kill_tx,
        );
        record
    }

    #[tokio::test]
    async fn resolve_delivers_response_and_decrements_request_count() {
        let table = PendingTable::new();
        let registry = AgentRegistry::new();
        let agent = test_agent(&registry, "a1");

        let rx = table.add("req-1".into(), agent.clone(), Duration::from_secs(30));
        assert_eq!(agent.request_count.load(std::sync::atomic::Ordering::Relaxed), 1);

        table.resolve(
            "req-1",
            ResponseFramePayload {
                status_code: 200,
                headers: Default::default(),
                body: String::new(),
                duration: None,
                mapping: None,
            },
        );

        let outcome = rx.await.unwrap();
        assert!(matches!(outcome, PendingOutcome::Response(_)));
        assert_eq!(agent.request_count.load(std::sync::atomic::Ordering::Relaxed), 0);
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn reject_for_agent_only_affects_that_agent() {
        let table = PendingTable::new();
        let registry = AgentRegistry::new();
        let a1 = test_agent(&registry, "a1");
        let a2 = test_agent(&registry, "a2");

        let rx1 = table.add("req-a1".into(), a1, Duration::from_secs(30));
        let rx2 = table.add("req-a2".into(), a2, Duration::from_secs(30));

        table.reject_for_agent("a1");

        assert!(matches!(rx1.await.unwrap(), PendingOutcome::Error(DispatchError::AgentDisconnected)));
        assert_eq!(table.len(), 1);

        table.reject("req-a2", DispatchError::RequestTimeout);
        assert!(matches!(rx2.await.unwrap(), PendingOutcome::Error(DispatchError::RequestTimeout)));
    }

    #[tokio::test]
    async fn resolve_after_reject_is_a_harmless_no_op() {
        let table = PendingTable::new();
        let registry = AgentRegistry::new();
        let agent = test_agent(&registry, "a1");

        let rx = table.add("req-1".into(), agent, Duration::from_secs(30));
        table.reject("req-1", DispatchError::RequestTimeout);
        // A response racing in after the reject must not panic or resolve twice.
        table.resolve(
            "req-1",
            ResponseFramePayload {
                status_code: 200,
                headers: Default::default(),
                body: String::new(),
                duration: None,
                mapping: None,
            },
        );

        assert!(matches!(rx.await.unwrap(), PendingOutcome::Error(DispatchError::RequestTimeout)));
    }

    #[tokio::test]
    async fn timeout_fires_when_deadline_elapses() {
        let table = PendingTable::new();
        let registry = AgentRegistry::new();
        let agent = test_agent(&registry, "a1");

        let rx = table.add("req-1".into(), agent, Duration::from_millis(20));
        let outcome = rx.await.unwrap();
        assert!(matches!(outcome, PendingOutcome::Error(DispatchError::RequestTimeout)));
    }

    #[tokio::test]
    async fn timeout_leaves_request_count_incremented() {
        // §8 scenario 3: a request that times out leaves request_count as-is.
        let table = PendingTable::new();
        let registry = AgentRegistry::new();
        let agent = test_agent(&registry, "a3");

        let rx = table.add("req-1".into(), agent.clone(), Duration::from_millis(20));
        rx.await.unwrap();
        assert_eq!(agent.request_count.load(std::sync::atomic::Ordering::Relaxed), 1);
    }
}
