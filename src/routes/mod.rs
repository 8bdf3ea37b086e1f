//! Router assembly (ambient stack, spec §A).
//!
//! Grounded on `slab-server/src/routes/mod.rs`: build the CORS layer,
//! merge each resource group's router, optionally mount Swagger UI, and
//! apply the tracing middleware + state extractor last.

pub mod doc;
pub mod generate;
pub mod health;
pub mod history;
pub mod session;
pub mod upload;
pub mod workflow;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use utoipa_swagger_ui::SwaggerUi;

use crate::middleware::{cors_layer, TraceLayer};
use crate::state::AppState;

pub fn build(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config);

    let mut router = Router::new()
        .merge(health::router())
        .merge(workflow::router())
        .merge(generate::router())
        .merge(upload::router())
        .merge(history::router())
        .merge(session::router())
        .merge(ws::router());

    if state.config.enable_swagger {
        router = router.merge(
            SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", doc::api_docs()),
        );
    }

    router
        .layer(TraceLayer)
        .layer(cors)
        .with_state(state)
}
