//! Unified bridge error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors are automatically converted
//! to a JSON-body HTTP response with an appropriate status code, matching
//! the `{"detail": "..."}` 4xx contract of spec §6/§7.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// All errors that can occur in the bridge's request lifecycle (spec §7).
#[derive(Debug, Error)]
pub enum ServerError {
    /// Malformed query/body, or a missing/mistyped `clientId`.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The caller referenced a workflow alias with no matching template.
    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    /// A workflow template failed to parse into a valid input schema.
    #[error("bad template: {0}")]
    BadTemplate(String),

    /// A submitted kwarg's runtime type didn't match its declared input type.
    #[error("{0}")]
    TypeMismatch(String),

    /// A staged-upload handle referenced a tmp file that no longer exists.
    #[error("staged file missing: {0}")]
    StagedFileMissing(String),

    /// An uploaded (or outbound) file failed a validator gate.
    #[error("{0}")]
    UnsafeUpload(String),

    /// Every configured backend was unreachable when selecting one.
    #[error("no backend available")]
    NoBackend,

    /// A specific, already-allocated backend could not be reached.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A bounded wait (heartbeat rounds, allocation polling) ran out.
    #[error("{0}")]
    Timeout(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::BadRequest(_)
            | ServerError::UnknownWorkflow(_)
            | ServerError::BadTemplate(_)
            | ServerError::TypeMismatch(_)
            | ServerError::StagedFileMissing(_)
            | ServerError::UnsafeUpload(_) => StatusCode::BAD_REQUEST,
            ServerError::NoBackend | ServerError::BackendUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServerError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(e: anyhow::Error) -> Self {
        ServerError::Internal(e.to_string())
    }
}

impl From<reqwest::Error> for ServerError {
    fn from(e: reqwest::Error) -> Self {
        ServerError::BackendUnavailable(e.to_string())
    }
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        ServerError::Internal(e.to_string())
    }
}
