//! Progress relay and dual-socket supervision (spec §4.3 Progress Relay,
//! §5 Concurrency, §9 "dual-socket supervisor" design note).
//!
//! Grounded on `BridgeServer.track_progress` and
//! `BridgeServer.websocket_connection` in `bridge_server/server.py`: one
//! supervisor per client session spawns a relay task (translates backend
//! WS frames into client-facing status envelopes) and a heartbeat task
//! (periodically sends `listening` without touching the TTL clock, and
//! times the session out after `limit_timeout_count` idle rounds). The
//! supervisor awaits whichever task finishes first, cancels the other,
//! and runs cleanup exactly once.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as ClientMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::backend::ws::{self as backend_ws, BackendStream};
use crate::session::{ConnectionStatus, Session, SessionManager};

/// Tracks cumulative progress for one in-flight prompt execution.
///
/// `total` is computed lazily, read fresh off the session's current
/// `workflow_graph` each time an `execution_start` frame arrives: the node
/// count of the resolved workflow graph plus the sum of every input value
/// whose name *contains* `steps` across it (spec §4.3). A template with no
/// such inputs still has a total equal to its node count, so `total == 0`
/// only when the graph itself is empty — handled by reporting `100.00%`
/// rather than dividing by zero.
#[derive(Debug, Default)]
struct ProgressTracker {
    total: u64,
    completed: u64,
}

impl ProgressTracker {
    fn total_from_workflow(workflow: &Value) -> u64 {
        let Some(nodes) = workflow.as_object() else {
            return 0;
        };
        let node_count = nodes.len() as u64;
        let steps_sum: u64 = nodes
            .values()
            .filter_map(|node| node.get("inputs")?.as_object())
            .flat_map(|inputs| inputs.iter())
            .filter(|(key, _)| key.contains("steps"))
            .filter_map(|(_, value)| value.as_u64())
            .sum();
        node_count + steps_sum
    }

    fn percent(&self) -> String {
        if self.total == 0 {
            return "100.00%".to_owned();
        }
        let pct = (self.completed as f64 / self.total as f64) * 100.0;
        format!("{pct:.2}%")
    }
}

/// Outcome of translating one backend frame: the client-facing status,
/// the detail payload to send, whether it should bump the session's TTL
/// clock, and whether the relay loop should stop after sending it.
struct RelayEvent {
    status: ConnectionStatus,
    detail: Value,
    update_life: bool,
    terminal: bool,
}

fn translate_frame(tracker: &mut ProgressTracker, frame: &Value) -> Option<RelayEvent> {
    let frame_type = frame.get("type")?.as_str()?;
    let data = frame.get("data").cloned().unwrap_or(Value::Null);

    match frame_type {
        "execution_start" => Some(RelayEvent {
            status: ConnectionStatus::Progress,
            detail: json!({"event": "execution_start", "percent": tracker.percent()}),
            update_life: true,
            terminal: false,
        }),
        "execution_cached" => {
            let cached = data.get("nodes").and_then(Value::as_array).map(Vec::len).unwrap_or(0);
            tracker.completed += cached as u64;
            Some(RelayEvent {
                status: ConnectionStatus::Progress,
                detail: json!({"event": "execution_cached", "percent": tracker.percent()}),
                update_life: true,
                terminal: false,
            })
        }
        "progress" => {
            tracker.completed += 1;
            Some(RelayEvent {
                status: ConnectionStatus::Progress,
                detail: json!({"event": "progress", "percent": tracker.percent()}),
                update_life: true,
                terminal: false,
            })
        }
        "executing" => {
            if data.get("node").map(Value::is_null).unwrap_or(true) {
                let prompt_id = data.get("prompt_id").and_then(Value::as_str).map(str::to_owned);
                Some(RelayEvent {
                    status: ConnectionStatus::Closed,
                    detail: json!({"event": "executing", "node": null, "prompt_id": prompt_id}),
                    update_life: false,
                    terminal: true,
                })
            } else {
                tracker.completed += 1;
                Some(RelayEvent {
                    status: ConnectionStatus::Progress,
                    detail: json!({"event": "executing", "percent": tracker.percent()}),
                    update_life: true,
                    terminal: false,
                })
            }
        }
        "prompt_outputs_failed_validation" => Some(RelayEvent {
            status: ConnectionStatus::Error,
            detail: json!({"event": "prompt_outputs_failed_validation", "detail": data}),
            update_life: false,
            terminal: true,
        }),
        _ => None,
    }
}

async fn send_client_envelope(
    client_socket: &Arc<Mutex<futures::stream::SplitSink<WebSocket, ClientMessage>>>,
    status: ConnectionStatus,
    detail: Value,
) -> Result<(), axum::Error> {
    let envelope = json!({ "status": status, "detail": detail });
    client_socket
        .lock()
        .await
        .send(ClientMessage::Text(envelope.to_string().into()))
        .await
}

/// Relay backend WS frames to the client socket (if any) until a terminal
/// frame arrives or the backend socket closes/errors.
///
/// `total` is not known at spawn time: in the canonical PROXY flow the
/// client opens `/ws` before ever submitting a workflow, so the session's
/// `workflow_graph` is still unset when this task starts. Per spec §4.3
/// `total` is instead (re)computed from the session's *current*
/// `workflow_graph` the moment an `execution_start` frame arrives, by
/// which point `/generate-based-workflow` has populated it.
///
/// `client_tx` is `None` for a REST session with no open client socket;
/// the relay still drives `session_manager.touch` so `/execution-info`
/// observes the same state transitions a PROXY client would see.
async fn run_progress_relay(
    mut backend_socket: BackendStream,
    client_tx: Option<Arc<Mutex<futures::stream::SplitSink<WebSocket, ClientMessage>>>>,
    session_manager: Arc<SessionManager>,
    session: Arc<Mutex<Session>>,
) {
    let mut tracker = ProgressTracker::default();

    loop {
        let frame = match backend_ws::next_json_frame(&mut backend_socket).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                session_manager
                    .touch(&session, ConnectionStatus::Closed, json!({"event": "backend_closed"}), false)
                    .await;
                if let Some(tx) = &client_tx {
                    let _ = send_client_envelope(tx, ConnectionStatus::Closed, json!({"event": "backend_closed"})).await;
                }
                break;
            }
            Err(e) => {
                warn!(error = %e, "backend socket errored during relay");
                session_manager
                    .touch(&session, ConnectionStatus::Error, json!({"error": e.to_string()}), false)
                    .await;
                if let Some(tx) = &client_tx {
                    let _ = send_client_envelope(tx, ConnectionStatus::Error, json!({"error": e.to_string()})).await;
                }
                break;
            }
        };

        if frame.get("type").and_then(Value::as_str) == Some("execution_start") {
            let workflow = session.lock().await.workflow_graph.clone().unwrap_or(Value::Null);
            tracker.total = ProgressTracker::total_from_workflow(&workflow);
            tracker.completed = 0;
        }

        let Some(event) = translate_frame(&mut tracker, &frame) else {
            continue;
        };

        if let Some(prompt_id) = event.detail.get("prompt_id").and_then(Value::as_str) {
            session_manager.set_prompt_id(&session, prompt_id).await;
        }

        session_manager
            .touch(&session, event.status, event.detail.clone(), event.update_life)
            .await;
        if let Some(tx) = &client_tx {
            if send_client_envelope(tx, event.status, event.detail).await.is_err() {
                break;
            }
        }
        if event.terminal {
            break;
        }
    }

    backend_ws::close(&mut backend_socket).await;
}

/// Relay backend WS frames for a session with no open client socket
/// (pure-REST flow): drives `session_manager.touch` exactly as the PROXY
/// relay does, so a polling `/execution-info` client observes the same
/// `progress` → `closed`/`error` transitions (spec §8 scenario 1).
pub async fn run_headless_relay(
    backend_socket: BackendStream,
    session_manager: Arc<SessionManager>,
    session: Arc<Mutex<Session>>,
) {
    run_progress_relay(backend_socket, None, session_manager, session).await;
}

/// Send periodic `listening` heartbeats to the client without touching
/// its TTL clock, timing the session out after `limit_timeout_count`
/// consecutive rounds.
async fn run_heartbeat(
    client_tx: Arc<Mutex<futures::stream::SplitSink<WebSocket, ClientMessage>>>,
    session_manager: Arc<SessionManager>,
    session: Arc<Mutex<Session>>,
    interval: Duration,
    limit_timeout_count: u32,
) {
    let mut ticker = tokio::time::interval(interval);
    for _ in 0..limit_timeout_count {
        ticker.tick().await;
        session_manager
            .touch(&session, ConnectionStatus::Listening, json!({}), false)
            .await;
        if send_client_envelope(&client_tx, ConnectionStatus::Listening, json!({})).await.is_err() {
            return;
        }
    }
    warn!("session timed out waiting for backend progress");
    session_manager
        .touch(
            &session,
            ConnectionStatus::Error,
            json!({"error": "timeout"}),
            false,
        )
        .await;
    let _ = send_client_envelope(&client_tx, ConnectionStatus::Error, json!({"error": "timeout"})).await;
}

/// Supervise one client session's dual sockets: split the client socket,
/// spawn the relay and heartbeat tasks, await whichever finishes first,
/// abort the other, and run cleanup exactly once regardless of which path
/// won (spec §5, §9).
pub async fn supervise(
    client_socket: WebSocket,
    backend_socket: BackendStream,
    session_manager: Arc<SessionManager>,
    session: Arc<Mutex<Session>>,
    heartbeat_interval: Duration,
    limit_timeout_count: u32,
) {
    let (tx, _rx) = client_socket.split();
    let client_tx = Arc::new(Mutex::new(tx));

    session_manager
        .touch(&session, ConnectionStatus::Connected, json!({}), true)
        .await;
    let _ = send_client_envelope(&client_tx, ConnectionStatus::Connected, json!({})).await;

    let relay = tokio::spawn(run_progress_relay(
        backend_socket,
        Some(Arc::clone(&client_tx)),
        Arc::clone(&session_manager),
        Arc::clone(&session),
    ));
    let heartbeat = tokio::spawn(run_heartbeat(
        Arc::clone(&client_tx),
        Arc::clone(&session_manager),
        Arc::clone(&session),
        heartbeat_interval,
        limit_timeout_count,
    ));

    tokio::select! {
        _ = relay => heartbeat.abort(),
        _ = heartbeat => relay.abort(),
    }

    session_manager
        .touch(&session, ConnectionStatus::Closed, json!({}), false)
        .await;
    let _ = send_client_envelope(&client_tx, ConnectionStatus::Closed, json!({})).await;
    info!("session supervisor finished");
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn total_counts_nodes_plus_step_inputs() {
        let workflow = json!({
            "3": {"inputs": {"steps": 20}},
            "6": {"inputs": {"text": "a cat"}},
        });
        assert_eq!(ProgressTracker::total_from_workflow(&workflow), 2 + 20);
    }

    #[test]
    fn total_counts_any_input_whose_name_contains_steps() {
        let workflow = json!({
            "3": {"inputs": {"num_steps": 15}},
            "4": {"inputs": {"steps_total": 5}},
            "6": {"inputs": {"text": "a cat"}},
        });
        assert_eq!(ProgressTracker::total_from_workflow(&workflow), 3 + 15 + 5);
    }

    #[test]
    fn empty_workflow_reports_full_percent() {
        let tracker = ProgressTracker::default();
        assert_eq!(tracker.percent(), "100.00%");
    }

    #[test]
    fn execution_start_frame_is_non_terminal() {
        let mut tracker = ProgressTracker {
            total: 10,
            completed: 0,
        };
        let frame = json!({"type": "execution_start", "data": {}});
        let event = translate_frame(&mut tracker, &frame).unwrap();
        assert!(!event.terminal);
        assert_eq!(event.status, ConnectionStatus::Progress);
    }

    #[test]
    fn executing_with_null_node_is_terminal_closed() {
        let mut tracker = ProgressTracker {
            total: 10,
            completed: 10,
        };
        let frame = json!({"type": "executing", "data": {"node": null, "prompt_id": "abc"}});
        let event = translate_frame(&mut tracker, &frame).unwrap();
        assert!(event.terminal);
        assert_eq!(event.status, ConnectionStatus::Closed);
        assert_eq!(event.detail["prompt_id"], "abc");
    }

    #[test]
    fn failed_validation_is_terminal_error() {
        let mut tracker = ProgressTracker::default();
        let frame = json!({"type": "prompt_outputs_failed_validation", "data": {"reason": "bad"}});
        let event = translate_frame(&mut tracker, &frame).unwrap();
        assert!(event.terminal);
        assert_eq!(event.status, ConnectionStatus::Error);
    }

    #[test]
    fn cached_nodes_advance_completed_count() {
        let mut tracker = ProgressTracker { total: 10, completed: 0 };
        let frame = json!({"type": "execution_cached", "data": {"nodes": ["1", "2", "3"]}});
        translate_frame(&mut tracker, &frame).unwrap();
        assert_eq!(tracker.completed, 3);
    }
}
