//! Session lifecycle management (spec §3 `Session`, §4.1 Session Manager).
//!
//! Grounded on `bridge_server/socket_manager.py`'s `SocketManager` +
//! `ParamManager`: a lazily-created per-client record, mutated only through
//! a handful of funnel methods that bump liveness as a side effect, and a
//! background sweep loop that evicts anything past its TTL. The Python
//! dynamic-attribute `ParamManager` is reimplemented here as an explicit
//! struct behind per-session state, matching spec §9's design note.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::backend::BackendClient;

/// Opaque per-connection identifier (spec §3 `ClientId`).
pub type ClientId = String;

/// Lifecycle state of a session's client-facing WebSocket, mirrored
/// verbatim into the `status` field of every envelope sent to the client
/// (spec §6 client WS envelope).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Pending,
    Connected,
    Listening,
    Progress,
    Closed,
    Error,
}

/// Last progress/status envelope recorded for a session (spec §3
/// `lastExecutionMessage`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecutionInfo {
    pub status: ConnectionStatus,
    pub detail: serde_json::Value,
}

/// Per-client session record (spec §3 `Session`).
///
/// Invariants (S1-S3): a session is uniquely keyed by `ClientId`; at most
/// one backend address is linked for the lifetime of the session
/// (`backend_address` is write-once-then-sticky); `last_activity` only
/// advances through `touch`, never by direct field assignment.
#[derive(Debug, Clone)]
pub struct Session {
    pub client_id: ClientId,
    pub backend_address: Option<String>,
    pub workflow_graph: Option<serde_json::Value>,
    pub backend_prompt_id: Option<String>,
    pub connection_status: ConnectionStatus,
    pub last_execution_message: Option<ExecutionInfo>,
    pub last_activity: DateTime<Utc>,
    relay_started: bool,
}

impl Session {
    fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            backend_address: None,
            workflow_graph: None,
            backend_prompt_id: None,
            connection_status: ConnectionStatus::Pending,
            last_execution_message: None,
            last_activity: Utc::now(),
            relay_started: false,
        }
    }
}

/// Registry of live sessions plus the background TTL sweep.
///
/// `acquire` never blocks and never fails: a first access lazily creates
/// the session record, matching `SocketManager.__getitem__` in the Python
/// original. Every session is wrapped in its own `Mutex` so that the
/// client-relay task and the heartbeat task for the *same* session
/// serialize on it, while unrelated sessions never contend with each other.
#[derive(Debug)]
pub struct SessionManager {
    sessions: RwLock<HashMap<ClientId, Arc<Mutex<Session>>>>,
    life_seconds: u64,
    sweep_interval: Duration,
    backend_client: Arc<BackendClient>,
}

impl SessionManager {
    pub fn new(life_seconds: u64, sweep_interval: Duration, backend_client: Arc<BackendClient>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            life_seconds,
            sweep_interval,
            backend_client,
        }
    }

    /// Fetch or lazily create the session for `client_id`.
    pub async fn acquire(&self, client_id: &str) -> Arc<Mutex<Session>> {
        if let Some(existing) = self.sessions.read().await.get(client_id) {
            return Arc::clone(existing);
        }
        let mut sessions = self.sessions.write().await;
        Arc::clone(
            sessions
                .entry(client_id.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(Session::new(client_id.to_owned())))),
        )
    }

    /// Tear down a session. Idempotent. When a backend prompt id was
    /// assigned, asks the sticky backend to `DELETE /history/{promptId}`
    /// first; a failure there is logged and release proceeds regardless
    /// (spec §4.1 failure semantics). Socket teardown itself happens as a
    /// side effect of the relay/heartbeat tasks exiting (spec §9) — this
    /// only drops the session record and its backend-side history.
    pub async fn release(&self, client_id: &str) {
        let backend = {
            let sessions = self.sessions.read().await;
            match sessions.get(client_id) {
                Some(session) => {
                    let guard = session.lock().await;
                    guard.backend_address.clone().zip(guard.backend_prompt_id.clone())
                }
                None => None,
            }
        };

        if let Some((address, prompt_id)) = backend {
            if let Err(e) = self.backend_client.delete_history(&address, &prompt_id).await {
                warn!(client_id, %address, %prompt_id, error = %e, "failed to delete backend history during release");
            }
        }

        self.sessions.write().await.remove(client_id);
    }

    /// Update a session's status/message, optionally bumping liveness.
    ///
    /// Mirrors `ParamManager.ws_connection_status`/`execution_info`
    /// setters: a status+detail update always bumps `last_activity`
    /// *unless* `update_life` is false (heartbeat `listening` frames and
    /// the final `closed` frame don't reset the TTL clock, spec §4.1).
    pub async fn touch(
        &self,
        session: &Arc<Mutex<Session>>,
        status: ConnectionStatus,
        detail: serde_json::Value,
        update_life: bool,
    ) {
        let mut guard = session.lock().await;
        guard.connection_status = status;
        guard.last_execution_message = Some(ExecutionInfo { status, detail });
        if update_life {
            guard.last_activity = Utc::now();
        }
    }

    /// Record the backend address a session is stuck to. Sticky per S2:
    /// does nothing once already set. Does not bump liveness.
    pub async fn link_backend(&self, session: &Arc<Mutex<Session>>, address: &str) {
        let mut guard = session.lock().await;
        if guard.backend_address.is_none() {
            guard.backend_address = Some(address.to_owned());
        }
    }

    /// Record the backend's write-once prompt id. Does not bump liveness.
    pub async fn set_prompt_id(&self, session: &Arc<Mutex<Session>>, prompt_id: &str) {
        let mut guard = session.lock().await;
        if guard.backend_prompt_id.is_none() {
            guard.backend_prompt_id = Some(prompt_id.to_owned());
        }
    }

    /// Record the resolved workflow graph for this session. Does not bump
    /// liveness.
    pub async fn set_workflow_graph(&self, session: &Arc<Mutex<Session>>, graph: serde_json::Value) {
        session.lock().await.workflow_graph = Some(graph);
    }

    /// Marks a session's backend relay as started, returning `true` only
    /// the first time this is called for a given session. A `/ws` upgrade
    /// and a REST `/generate-based-workflow` submission both race to spawn
    /// the one relay a session gets; whichever calls this first wins, so a
    /// REST session that resubmits, or a PROXY session that later submits
    /// again over the same socket, never ends up with two backend-WS
    /// connections relaying into the same session.
    pub async fn mark_relay_started(&self, session: &Arc<Mutex<Session>>) -> bool {
        let mut guard = session.lock().await;
        if guard.relay_started {
            false
        } else {
            guard.relay_started = true;
            true
        }
    }

    /// Look up a session's linked backend address without creating one.
    pub async fn peek_backend(&self, client_id: &str) -> Option<String> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(client_id)?;
        session.lock().await.backend_address.clone()
    }

    /// Look up a session's backend prompt id without creating one.
    pub async fn peek_prompt_id(&self, client_id: &str) -> Option<String> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(client_id)?;
        session.lock().await.backend_prompt_id.clone()
    }

    /// Snapshot the most recent execution-info envelope for a client, if any.
    pub async fn execution_info(&self, client_id: &str) -> Option<ExecutionInfo> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(client_id)?;
        session.lock().await.last_execution_message.clone()
    }

    /// Run the TTL sweep forever. Spawn this once at startup; it never
    /// returns and never terminates on an individual session's error
    /// (spec §5: "TTL sweep never terminates on exception").
    pub async fn run_sweep(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.sweep_interval);
        loop {
            interval.tick().await;
            self.sweep_once().await;
        }
    }

    async fn sweep_once(&self) {
        let now = Utc::now();
        let expired: Vec<ClientId> = {
            let sessions = self.sessions.read().await;
            let mut expired = Vec::new();
            for (id, session) in sessions.iter() {
                let last_activity = session.lock().await.last_activity;
                let age = (now - last_activity).num_seconds().max(0) as u64;
                if age > self.life_seconds {
                    expired.push(id.clone());
                }
            }
            expired
        };
        for id in &expired {
            debug!(client_id = %id, "sweeping expired session");
            self.release(id).await;
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "TTL sweep released expired sessions");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn acquire_is_lazy_and_idempotent() {
        let mgr = SessionManager::new(60, Duration::from_secs(1), Arc::new(BackendClient::new()));
        let a = mgr.acquire("client-1").await;
        let b = mgr.acquire("client-1").await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn heartbeat_touch_does_not_bump_activity() {
        let mgr = SessionManager::new(60, Duration::from_secs(1), Arc::new(BackendClient::new()));
        let session = mgr.acquire("client-1").await;
        let before = session.lock().await.last_activity;

        tokio::time::sleep(Duration::from_millis(5)).await;
        mgr.touch(
            &session,
            ConnectionStatus::Listening,
            serde_json::json!({}),
            false,
        )
        .await;

        let after = session.lock().await.last_activity;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn progress_touch_bumps_activity() {
        let mgr = SessionManager::new(60, Duration::from_secs(1), Arc::new(BackendClient::new()));
        let session = mgr.acquire("client-1").await;
        let before = session.lock().await.last_activity;

        tokio::time::sleep(Duration::from_millis(5)).await;
        mgr.touch(
            &session,
            ConnectionStatus::Progress,
            serde_json::json!({"value": 1}),
            true,
        )
        .await;

        let after = session.lock().await.last_activity;
        assert!(after > before);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_releases_sessions_past_their_ttl() {
        let mgr = Arc::new(SessionManager::new(2, Duration::from_secs(1), Arc::new(BackendClient::new())));
        let _session = mgr.acquire("client-1").await;

        tokio::time::advance(Duration::from_secs(3)).await;
        mgr.sweep_once().await;

        assert!(mgr.peek_backend("client-1").await.is_none());
        assert!(mgr.sessions.read().await.get("client-1").is_none());
    }

    #[tokio::test]
    async fn backend_address_is_sticky() {
        let mgr = SessionManager::new(60, Duration::from_secs(1), Arc::new(BackendClient::new()));
        let session = mgr.acquire("client-1").await;
        mgr.link_backend(&session, "127.0.0.1:8188").await;
        mgr.link_backend(&session, "127.0.0.1:8189").await;

        assert_eq!(
            mgr.peek_backend("client-1").await,
            Some("127.0.0.1:8188".to_owned())
        );
    }
}
