//! `POST /generate-based-workflow` (spec §4.4 Submit, §6).
//!
//! Grounded on `BridgeServer.generate_based_workflow` in
//! `bridge_server/server.py`: resolve the workflow alias, allocate (or
//! reuse) a sticky backend for the session, substitute kwargs and forward
//! any staged-upload handles, submit to the backend, and persist the
//! generation counter.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::post;
use axum::{Json, Router};

use crate::error::ServerError;
use crate::schemas::{ClientIdQuery, GenerateRequest, GenerateResponse};
use crate::session::ConnectionStatus;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/generate-based-workflow", post(generate_based_workflow))
}

#[utoipa::path(post, path = "/generate-based-workflow")]
pub(crate) async fn generate_based_workflow(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClientIdQuery>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ServerError> {
    let client_id = query.client_id;
    let session = state.sessions.acquire(&client_id).await;

    let backend_address = match state.sessions.peek_backend(&client_id).await {
        Some(address) => address,
        None => {
            let address = state.backend_selector.pick_least_busy(&state.backend_client).await?;
            state.sessions.link_backend(&session, &address).await;
            address
        }
    };

    let tracing_mime_types: Vec<String> = state.config.allowed_mime_extension_map.keys().cloned().collect();
    let (template, parsed) =
        crate::workflow::load_template(&state.workflows, &request.workflow, &tracing_mime_types).await?;

    let resolved = crate::workflow::resolve(
        template,
        &parsed,
        &request.kwargs,
        &state.staged_uploads,
        &state.file_validator,
        &state.backend_client,
        &backend_address,
    )
    .await?;

    state.sessions.set_workflow_graph(&session, resolved.clone()).await;

    let prompt_id = crate::workflow::submit(&state.backend_client, &backend_address, &client_id, &resolved)
        .await?;
    state.sessions.set_prompt_id(&session, &prompt_id).await;

    state
        .sessions
        .touch(
            &session,
            ConnectionStatus::Progress,
            serde_json::json!({"event": "queued", "prompt_id": prompt_id}),
            true,
        )
        .await;

    // A pure-REST client never opens `/ws`, so nothing would otherwise
    // drive this session's progress relay. Spawn it once, headlessly,
    // on first submission — it drives `/execution-info` through
    // `progress` to `closed`/`error` exactly as the PROXY relay does
    // (spec §4.3, §8 scenario 1), just without a client socket to also
    // stream envelopes to.
    if state.sessions.mark_relay_started(&session).await {
        let sessions = Arc::clone(&state.sessions);
        let session_for_relay = Arc::clone(&session);
        let backend_address_for_relay = backend_address.clone();
        let client_id_for_relay = client_id.clone();
        tokio::spawn(async move {
            match crate::backend::ws::connect(&backend_address_for_relay, &client_id_for_relay).await {
                Ok(backend_socket) => {
                    crate::relay::run_headless_relay(backend_socket, sessions, session_for_relay).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to open backend relay socket for REST session");
                    sessions
                        .touch(
                            &session_for_relay,
                            ConnectionStatus::Error,
                            serde_json::json!({"error": e.to_string()}),
                            false,
                        )
                        .await;
                }
            }
        });
    }

    let queue_state = state.backend_client.get_queue_state(&backend_address).await?;
    let queue_length = crate::backend::selector::sum_array_lengths(&queue_state);

    state.generation_state.increment_generation_count().await?;

    Ok(Json(GenerateResponse {
        detail: format!("queued / {queue_length}"),
    }))
}
