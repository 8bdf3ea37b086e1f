//! Shared application state threaded through every handler.
//!
//! Grounded on `slab-server/src/state.rs`'s `AppState{config, store,
//! task_manager}` shape, generalized to this bridge's own collaborators.

use std::sync::Arc;

use crate::backend::{BackendClient, BackendSelector};
use crate::config::Config;
use crate::session::SessionManager;
use crate::store::GenerationState;
use crate::upload::{FileValidator, StagedUploadRegistry};
use crate::workflow::WorkflowRegistry;

/// Everything a request handler needs, behind a single `Arc` clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionManager>,
    pub backend_client: Arc<BackendClient>,
    pub backend_selector: Arc<BackendSelector>,
    pub workflows: Arc<WorkflowRegistry>,
    pub generation_state: Arc<GenerationState>,
    pub staged_uploads: Arc<StagedUploadRegistry>,
    pub file_validator: Arc<FileValidator>,
}

impl AppState {
    pub async fn build(config: Config) -> anyhow::Result<Arc<Self>> {
        let config = Arc::new(config);

        let backend_client = Arc::new(BackendClient::new());
        let sessions = Arc::new(SessionManager::new(
            config.life_seconds(),
            std::time::Duration::from_secs(config.timeout_interval),
            Arc::clone(&backend_client),
        ));
        let backend_selector = Arc::new(BackendSelector::new(config.backend_addresses.clone()));
        let workflows = Arc::new(
            WorkflowRegistry::load(&config.workflow_alias_path, config.workflow_dir.clone()).await?,
        );
        let generation_state = Arc::new(GenerationState::load(&config.current_state_path).await?);
        let staged_uploads = Arc::new(StagedUploadRegistry::new());
        let file_validator = Arc::new(FileValidator::new(config.allowed_mime_extension_map.clone()));

        Ok(Arc::new(Self {
            config,
            sessions,
            backend_client,
            backend_selector,
            workflows,
            generation_state,
            staged_uploads,
            file_validator,
        }))
    }
}
