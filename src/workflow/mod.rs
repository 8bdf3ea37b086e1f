//! Workflow engine: template discovery, parsing, substitution, staged-file
//! resolution, and submission (spec §4.4).

pub mod alias;
pub mod template;

use std::collections::HashMap;

use serde_json::Value;

pub use alias::{WorkflowAlias, WorkflowRegistry};
pub use template::{ParsedInputSpec, ParsedInputs};

use crate::backend::BackendClient;
use crate::error::ServerError;
use crate::upload::{FileValidator, StagedUploadRegistry};

/// Load a workflow template from disk and parse its exposed inputs.
pub async fn load_template(
    registry: &WorkflowRegistry,
    alias: &str,
    tracing_mime_types: &[String],
) -> Result<(Value, ParsedInputs), ServerError> {
    let path = registry.resolve_path(alias)?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| ServerError::UnknownWorkflow(format!("{alias}: {e}")))?;
    let template: Value = serde_json::from_slice(&bytes)
        .map_err(|e| ServerError::BadTemplate(format!("{alias}: {e}")))?;
    let parsed = template::parse_inputs(&template, tracing_mime_types)?;
    Ok((template, parsed))
}

/// Resolve a workflow template against caller-supplied `kwargs`: type-check
/// and substitute declared inputs, then forward any staged-upload handles
/// to the backend, returning the fully resolved prompt graph ready to
/// submit.
pub async fn resolve(
    mut template: Value,
    parsed: &ParsedInputs,
    kwargs: &HashMap<String, Value>,
    staged_uploads: &StagedUploadRegistry,
    file_validator: &FileValidator,
    backend: &BackendClient,
    backend_address: &str,
) -> Result<Value, ServerError> {
    template::substitute(&mut template, parsed, kwargs)?;
    template::resolve_staged_uploads(&mut template, staged_uploads, file_validator, backend, backend_address)
        .await?;
    Ok(template)
}

/// Submit a resolved prompt graph to `backend_address`, returning the
/// backend-assigned prompt id.
pub async fn submit(
    backend: &BackendClient,
    backend_address: &str,
    client_id: &str,
    prompt: &Value,
) -> Result<String, ServerError> {
    backend.queue_prompt(backend_address, client_id, prompt).await
}
