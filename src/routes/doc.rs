//! OpenAPI aggregation (ambient stack, spec §A).
//!
//! Grounded on `slab-server/src/routes/doc.rs`: a single `ApiDoc` struct
//! listing every handler, merged into one spec served under
//! `/api-docs/openapi.json`.

use utoipa::OpenApi;

use super::{generate, health, history, session, upload, workflow, ws};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "bridge-server",
        description = "Bridge proxy fronting a pool of ComfyUI-style generation backends",
        version = "0.1.0"
    ),
    paths(
        health::main_page,
        health::health,
        workflow::workflow_list,
        workflow::workflow_info,
        generate::generate_based_workflow,
        upload::upload,
        history::history,
        session::execution_info,
        session::generation_count,
        session::free_memory,
        session::interrupt_generation,
        ws::ws_handler,
    ),
    components(schemas(
        crate::schemas::WorkflowListEntry,
        crate::schemas::GenerateRequest,
        crate::schemas::GenerateResponse,
        crate::schemas::UploadResponse,
        crate::schemas::HistoryOutputFile,
        crate::schemas::HistoryResponse,
        crate::schemas::GenerationCountResponse,
        crate::schemas::FreeQuery,
    ))
)]
pub struct ApiDoc;

pub fn api_docs() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
