//! `GET /execution-info`, `GET /generation-count`, `POST /free`,
//! `POST /interrupt` (spec §6).

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::warn;

use crate::error::ServerError;
use crate::schemas::{ClientIdQuery, FreeQuery, GenerationCountResponse};
use crate::session::ExecutionInfo;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/execution-info", get(execution_info))
        .route("/generation-count", get(generation_count))
        .route("/free", post(free_memory))
        .route("/interrupt", post(interrupt_generation))
}

#[utoipa::path(get, path = "/execution-info")]
pub(crate) async fn execution_info(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClientIdQuery>,
) -> Json<Option<ExecutionInfo>> {
    Json(state.sessions.execution_info(&query.client_id).await)
}

#[utoipa::path(get, path = "/generation-count")]
pub(crate) async fn generation_count(State(state): State<Arc<AppState>>) -> Json<GenerationCountResponse> {
    Json(GenerationCountResponse {
        generation_count: state.generation_state.generation_count().await,
    })
}

/// With `client_id`, free only that session's linked backend. Without
/// one, free every configured backend, continuing past individual
/// failures (spec §6, grounded on `BridgeServer.free_memory`).
#[utoipa::path(post, path = "/free")]
pub(crate) async fn free_memory(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FreeQuery>,
) -> Result<Json<serde_json::Value>, ServerError> {
    match query.client_id {
        Some(client_id) => {
            let address = state
                .sessions
                .peek_backend(&client_id)
                .await
                .ok_or_else(|| ServerError::BadRequest("no backend linked for client".into()))?;
            state.backend_client.post_free_memory(&address).await?;
        }
        None => {
            for address in state.backend_selector.addresses() {
                if let Err(e) = state.backend_client.post_free_memory(address).await {
                    warn!(address, error = %e, "failed to free backend memory");
                }
            }
        }
    }
    Ok(Json(json!({"detail": "ok"})))
}

#[utoipa::path(post, path = "/interrupt")]
pub(crate) async fn interrupt_generation(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClientIdQuery>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let address = state
        .sessions
        .peek_backend(&query.client_id)
        .await
        .ok_or_else(|| ServerError::BadRequest("no backend linked for client".into()))?;
    state.backend_client.post_interrupt(&address).await?;
    state.sessions.release(&query.client_id).await;
    Ok(Json(json!({"detail": "ok"})))
}
