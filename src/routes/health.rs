//! `GET /` — the bridge's static banner (spec §6) — plus an ambient
//! `/health` liveness heartbeat, grounded on
//! `slab-server/src/routes/health.rs`.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(main_page))
        .route("/health", get(health))
}

#[utoipa::path(get, path = "/", responses((status = 200, body = String)))]
pub(crate) async fn main_page(State(_state): State<Arc<AppState>>) -> &'static str {
    "Hello, this is bridge server for comfyui!"
}

/// Heartbeat endpoint. Reports process liveness and how many configured
/// backends this bridge currently load-balances over — not their
/// reachability, which is checked lazily on each allocation (spec §4.2).
#[utoipa::path(get, path = "/health", responses((status = 200, body = Value)))]
pub(crate) async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "configured_backends": state.backend_selector.addresses().len(),
    }))
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn main_page_is_a_static_banner() {
        let body = main_page(State(test_state().await)).await;
        assert!(body.contains("comfyui"));
    }

    async fn test_state() -> Arc<AppState> {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("workflows")).await.unwrap();
        let mut config = crate::config::Config::from_env();
        config.current_state_path = dir.path().join("current_state.json").to_string_lossy().into_owned();
        config.workflow_alias_path = dir.path().join("workflow_alias.json").to_string_lossy().into_owned();
        config.workflow_dir = dir.path().join("workflows").to_string_lossy().into_owned();
        AppState::build(config).await.unwrap()
    }
}

