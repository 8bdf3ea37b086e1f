//! Request/response DTOs shared across route handlers, annotated for
//! OpenAPI generation the way `slab-server/src/schemas/v1/images.rs` does.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Body of `POST /generate-based-workflow`. `clientId` itself travels as a
/// query parameter, not a body field (spec §6).
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct GenerateRequest {
    /// Workflow alias, resolved through the workflow registry.
    pub workflow: String,
    /// Every other field is forwarded as a substitution kwarg.
    #[serde(flatten)]
    pub kwargs: HashMap<String, Value>,
}

/// Response of `POST /generate-based-workflow`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GenerateResponse {
    pub detail: String,
}

/// One entry of `GET /workflow-list` (spec §6: `{alias, fn, description}`).
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WorkflowListEntry {
    pub alias: String,
    #[serde(rename = "fn")]
    pub fn_: String,
    pub description: String,
}

/// Query for `GET /workflow-info`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct WorkflowInfoQuery {
    pub workflow: String,
}

/// Query for `GET /execution-info`. The wire parameter is `clientId`
/// (spec §6); the field is renamed to Rust's snake_case convention.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ClientIdQuery {
    #[serde(rename = "clientId")]
    pub client_id: String,
}

/// Response of `GET /generation-count`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GenerationCountResponse {
    pub generation_count: u64,
}

/// Query of `POST /free`. Without `client_id`, every configured backend is
/// freed (spec §6).
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct FreeQuery {
    #[serde(default, rename = "clientId")]
    pub client_id: Option<String>,
}

/// Query for `GET /history`. `resType` selects whether output bytes come
/// back inline as base64 or as a multipart response part.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct HistoryQuery {
    #[serde(rename = "clientId")]
    pub client_id: String,
    #[serde(default = "default_res_type", rename = "resType")]
    pub res_type: String,
}

fn default_res_type() -> String {
    "multipart".to_owned()
}

/// One validated output file in `GET /history`'s base64 response mode
/// (spec §6/§8 scenario 1: `{file_name, content_type, content}`).
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HistoryOutputFile {
    pub file_name: String,
    pub content_type: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HistoryResponse {
    pub files: Vec<HistoryOutputFile>,
}

/// Response of `POST /upload`: field name → staged-upload handle, one
/// entry per accepted multipart part (spec §6: `{fieldName: handle}`).
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(transparent)]
pub struct UploadResponse(pub HashMap<String, String>);
