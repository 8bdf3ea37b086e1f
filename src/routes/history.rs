//! `GET /history` (spec §6).
//!
//! Grounded on `BridgeServer.get_history` in `bridge_server/server.py`:
//! look up a session's backend prompt id (write-once from the backend,
//! per spec §9's resolution of the PromptId-vs-ClientId teardown
//! question), fetch its history document from the sticky backend,
//! validate each output file, skipping rather than failing on an invalid
//! one, and release the session on success. `resType` selects whether
//! output bytes are inlined as base64 JSON or returned as a
//! `multipart/mixed` response.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use axum::Router;
use base64::Engine;
use serde_json::Value;

use crate::error::ServerError;
use crate::schemas::{HistoryOutputFile, HistoryQuery, HistoryResponse};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/history", get(history))
}

struct OutputFile {
    file_name: String,
    content_type: String,
    bytes: bytes::Bytes,
}

#[utoipa::path(get, path = "/history")]
pub(crate) async fn history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, ServerError> {
    let backend_address = state
        .sessions
        .peek_backend(&query.client_id)
        .await
        .ok_or_else(|| ServerError::BadRequest("no backend linked for client".into()))?;
    let prompt_id = state
        .sessions
        .peek_prompt_id(&query.client_id)
        .await
        .ok_or_else(|| ServerError::BadRequest("no prompt submitted for client".into()))?;

    let history_doc = state.backend_client.get_history(&backend_address, &prompt_id).await?;

    let mut files = Vec::new();
    for node_outputs in iter_output_nodes(&history_doc, &prompt_id) {
        for file_ref in iter_output_files(node_outputs) {
            let Some(filename) = file_ref.get("filename").and_then(Value::as_str) else {
                continue;
            };
            let subfolder = file_ref.get("subfolder").and_then(Value::as_str);

            let Ok(bytes) = state
                .backend_client
                .get_image(&backend_address, filename, "output", subfolder)
                .await
            else {
                continue;
            };

            let Ok(validated) = state.file_validator.validate(filename, &bytes) else {
                continue;
            };

            files.push(OutputFile {
                file_name: filename.to_owned(),
                content_type: validated.mime_type,
                bytes,
            });
        }
    }

    state.sessions.release(&query.client_id).await;

    let response = match query.res_type.as_str() {
        "multipart" => build_multipart_response(files),
        _ => Json(HistoryResponse {
            files: files
                .into_iter()
                .map(|f| HistoryOutputFile {
                    file_name: f.file_name,
                    content_type: f.content_type,
                    content: base64::engine::general_purpose::STANDARD.encode(&f.bytes),
                })
                .collect(),
        })
        .into_response(),
    };

    Ok(response)
}

/// Hand-rolled `multipart/mixed` body: one part per output file, each
/// carrying its own `Content-Type` and `Content-Disposition` headers. Axum
/// has no built-in multipart *response* writer (only a request extractor),
/// so this mirrors the shape `reqwest::multipart` builds for outbound
/// requests elsewhere in this crate (`backend/client.rs`), just written by
/// hand for the response-side direction.
fn build_multipart_response(files: Vec<OutputFile>) -> Response {
    let boundary = format!("bridge-history-{}", uuid::Uuid::new_v4());
    let mut body = Vec::new();
    for file in &files {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                file.file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", file.content_type).as_bytes());
        body.extend_from_slice(&file.bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    Response::builder()
        .header("content-type", format!("multipart/mixed; boundary={boundary}"))
        .body(Body::from(body))
        .expect("multipart response body is well-formed")
}

fn iter_output_nodes<'a>(history_doc: &'a Value, prompt_id: &str) -> Vec<&'a Value> {
    history_doc
        .get(prompt_id)
        .and_then(|entry| entry.get("outputs"))
        .and_then(Value::as_object)
        .map(|outputs| outputs.values().collect())
        .unwrap_or_default()
}

/// Only file entries tagged `type == "output"` are surfaced here — a
/// `temp`/preview artifact (e.g. a sampler preview image) shares the same
/// `{filename, subfolder, type}` shape but was never meant to be
/// retrieved as a finished result, matching `process_outputs` in
/// `assistant.py`.
fn iter_output_files(node_outputs: &Value) -> Vec<&Value> {
    let Some(map) = node_outputs.as_object() else {
        return Vec::new();
    };
    map.values()
        .filter_map(Value::as_array)
        .flatten()
        .filter(|file_ref| file_ref.get("type").and_then(Value::as_str) == Some("output"))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn iter_output_nodes_reads_named_prompt_entry() {
        let doc = serde_json::json!({
            "prompt-123": {
                "outputs": {
                    "9": {"images": [{"filename": "a.png", "subfolder": "", "type": "output"}]}
                }
            }
        });
        let nodes = iter_output_nodes(&doc, "prompt-123");
        assert_eq!(nodes.len(), 1);
        let files = iter_output_files(nodes[0]);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0]["filename"], "a.png");
    }

    #[test]
    fn iter_output_nodes_empty_for_unknown_prompt() {
        let doc = serde_json::json!({});
        assert!(iter_output_nodes(&doc, "missing").is_empty());
    }

    #[test]
    fn multipart_response_carries_content_type_header() {
        let files = vec![OutputFile {
            file_name: "out.png".to_owned(),
            content_type: "image/png".to_owned(),
            bytes: bytes::Bytes::from_static(b"\x89PNG\r\n\x1a\n"),
        }];
        let response = build_multipart_response(files);
        let content_type = response.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.starts_with("multipart/mixed; boundary=bridge-history-"));
    }
}
