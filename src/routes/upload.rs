//! `POST /upload` (spec §4.5 Upload Pipeline).
//!
//! Grounded on `BridgeServer.upload` in `bridge_server/server.py`: read
//! each multipart part fully, validate and stage it, and abort the whole
//! request on the first invalid part — already-staged parts from earlier
//! in the same request are left staged, matching the original.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Multipart, Query, State};
use axum::routing::post;
use axum::{Json, Router};

use crate::error::ServerError;
use crate::schemas::{ClientIdQuery, UploadResponse};
use crate::state::AppState;
use crate::upload::stage_upload;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/upload", post(upload))
}

#[utoipa::path(post, path = "/upload")]
pub(crate) async fn upload(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClientIdQuery>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ServerError> {
    // The session is only acquired (not linked to a backend) here: uploads
    // may arrive before a backend is ever chosen, but the session must
    // exist so the client's later `/generate-based-workflow` or `/ws` call
    // shares the same `lastActivity` clock (spec §4.1).
    state.sessions.acquire(&query.client_id).await;

    let mut handles = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(e.to_string()))?
    {
        let field_name = field.name().unwrap_or("file").to_owned();
        let filename = field.file_name().unwrap_or("upload").to_owned();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ServerError::BadRequest(format!("{filename}: {e}")))?;

        if bytes.len() > state.config.upload_max_size {
            return Err(ServerError::BadRequest(format!(
                "{filename}: exceeds maximum upload size"
            )));
        }

        let handle = stage_upload(&state.file_validator, &state.staged_uploads, &filename, bytes).await?;
        handles.insert(field_name, handle);
    }

    Ok(Json(UploadResponse(handles)))
}
