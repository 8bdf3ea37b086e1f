//! `GET /workflow-list`, `GET /workflow-info` (spec §6).

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};

use crate::error::ServerError;
use crate::schemas::{WorkflowInfoQuery, WorkflowListEntry};
use crate::state::AppState;
use crate::workflow::ParsedInputs;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/workflow-list", get(workflow_list))
        .route("/workflow-info", get(workflow_info))
}

#[utoipa::path(get, path = "/workflow-list", responses((status = 200, body = Vec<WorkflowListEntry>)))]
pub(crate) async fn workflow_list(State(state): State<Arc<AppState>>) -> Json<Vec<WorkflowListEntry>> {
    Json(
        state
            .workflows
            .list()
            .iter()
            .map(|a| WorkflowListEntry {
                alias: a.alias.clone(),
                fn_: a.fn_.clone(),
                description: a.description.clone(),
            })
            .collect(),
    )
}

#[utoipa::path(get, path = "/workflow-info")]
pub(crate) async fn workflow_info(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WorkflowInfoQuery>,
) -> Result<Json<ParsedInputs>, ServerError> {
    let tracing_mime_types: Vec<String> = state.config.allowed_mime_extension_map.keys().cloned().collect();
    let (_template, parsed) =
        crate::workflow::load_template(&state.workflows, &query.workflow, &tracing_mime_types).await?;
    Ok(Json(parsed))
}
