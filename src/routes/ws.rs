//! `GET /ws` (spec §4.3, §4.4, §9 supervisor).
//!
//! Grounded on `BridgeServer.websocket_connection` in
//! `bridge_server/server.py`: upgrade the client connection, allocate (or
//! reuse) a sticky backend, dial its WebSocket, and hand both sockets to
//! the dual-task supervisor.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;

use crate::backend::ws as backend_ws;
use crate::error::ServerError;
use crate::schemas::ClientIdQuery;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(ws_handler))
}

#[utoipa::path(get, path = "/ws")]
pub(crate) async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClientIdQuery>,
    upgrade: WebSocketUpgrade,
) -> Result<Response, ServerError> {
    let session = state.sessions.acquire(&query.client_id).await;

    let backend_address = match state.sessions.peek_backend(&query.client_id).await {
        Some(address) => address,
        None => {
            let address = state.backend_selector.pick_least_busy(&state.backend_client).await?;
            state.sessions.link_backend(&session, &address).await;
            address
        }
    };

    let backend_socket = backend_ws::connect(&backend_address, &query.client_id).await?;

    let heartbeat_interval = std::time::Duration::from_secs(state.config.timeout_interval);
    let limit_timeout_count = state.config.limit_timeout_count;
    let sessions = Arc::clone(&state.sessions);

    // Mark the relay started so a later `/generate-based-workflow` call on
    // this same session doesn't also spawn the headless REST-mode relay
    // (spec §4.4 `resolve_staged_uploads` populates `workflow_graph` well
    // after this point; the relay itself reads it lazily — see relay.rs).
    state.sessions.mark_relay_started(&session).await;

    Ok(upgrade.on_upgrade(move |client_socket| async move {
        crate::relay::supervise(
            client_socket,
            backend_socket,
            sessions,
            session,
            heartbeat_interval,
            limit_timeout_count,
        )
        .await;
    }))
}

