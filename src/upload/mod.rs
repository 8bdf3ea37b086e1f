//! Staged upload pipeline (spec §3 `StagedUpload`, §4.5 Upload Pipeline).
//!
//! Grounded on `BridgeServer.upload` in `bridge_server/server.py`: each
//! multipart part is read into a temp file, validated, and — if the
//! validator accepts it — left on disk as a staged handle the caller can
//! later reference from a `generate-based-workflow` kwarg. A part that
//! fails validation aborts the whole request with the offending filename;
//! parts already staged earlier in the same request are *not* rolled
//! back, matching the original's behavior.

pub mod validator;

use std::collections::HashMap;
use std::path::PathBuf;

use bytes::Bytes;
use tokio::sync::Mutex;

pub use validator::{FileValidator, ValidatedFile};

use crate::error::ServerError;

/// Prefix stamped on every staged-upload temp file and the handle string
/// derived from it, matching `tempfile.NamedTemporaryFile(prefix=...)` in
/// the Python original.
pub const STAGED_UPLOAD_PREFIX: &str = "bridge_server_comfyui_";

/// A file staged on local disk, waiting to be forwarded to a backend the
/// first time a workflow references its handle.
#[derive(Debug, Clone)]
pub struct StagedUpload {
    pub tmp_path: PathBuf,
    pub mime_type: String,
}

/// In-memory map of staged-upload handle → staged file. Entries are
/// removed once the workflow engine forwards them to a backend (spec
/// §4.4 "delete tmp file" step).
#[derive(Debug, Default)]
pub struct StagedUploadRegistry {
    inner: Mutex<HashMap<String, StagedUpload>>,
}

impl StagedUploadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn insert(&self, handle: String, staged: StagedUpload) {
        self.inner.lock().await.insert(handle, staged);
    }

    /// Remove and return a staged entry, if present. The workflow engine
    /// calls this exactly once per handle, when forwarding it to a backend.
    pub async fn take(&self, handle: &str) -> Option<StagedUpload> {
        self.inner.lock().await.remove(handle)
    }
}

/// Validate and stage one multipart part's bytes under a freshly
/// generated handle, returning that handle.
///
/// Only image MIME types are accepted here even if the configured
/// allow-list is broader, mirroring the original's `"image" in
/// detail_about` gate specific to client uploads (as opposed to
/// backend-output validation in the history endpoint, which accepts the
/// full allow-list).
pub async fn stage_upload(
    validator: &FileValidator,
    registry: &StagedUploadRegistry,
    filename: &str,
    bytes: Bytes,
) -> Result<String, ServerError> {
    let ValidatedFile { mime_type } = validator.validate(filename, &bytes)?;
    if !mime_type.starts_with("image/") {
        return Err(ServerError::UnsafeUpload(format!(
            "{filename}: only image uploads are accepted"
        )));
    }

    let tmp_file = tempfile::Builder::new()
        .prefix(STAGED_UPLOAD_PREFIX)
        .tempfile()
        .map_err(ServerError::from)?;
    let (file, tmp_path) = tmp_file.keep().map_err(|e| ServerError::Internal(e.to_string()))?;
    tokio::task::spawn_blocking({
        let mut file = file;
        let bytes = bytes.clone();
        move || -> std::io::Result<()> {
            use std::io::Write;
            file.write_all(&bytes)
        }
    })
    .await
    .map_err(|e| ServerError::Internal(e.to_string()))?
    .map_err(ServerError::from)?;

    let handle = tmp_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ServerError::Internal("staged file has no name".into()))?
        .to_owned();

    registry
        .insert(
            handle.clone(),
            StagedUpload {
                tmp_path,
                mime_type,
            },
        )
        .await;

    Ok(handle)
}

#[cfg(test)]
mod test {
    use super::*;

    fn validator() -> FileValidator {
        FileValidator::new(
            [("image/png", ".png")]
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
        )
    }

    #[tokio::test]
    async fn stages_a_valid_image_and_returns_a_prefixed_handle() {
        let registry = StagedUploadRegistry::new();
        let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
        png.extend_from_slice(b"rest of file");

        let handle = stage_upload(&validator(), &registry, "photo.png", Bytes::from(png))
            .await
            .unwrap();

        assert!(handle.starts_with(STAGED_UPLOAD_PREFIX));
        let staged = registry.take(&handle).await.unwrap();
        assert_eq!(staged.mime_type, "image/png");
        assert!(tokio::fs::metadata(&staged.tmp_path).await.is_ok());
        tokio::fs::remove_file(&staged.tmp_path).await.ok();
    }

    #[tokio::test]
    async fn rejects_non_image_even_when_allow_listed() {
        let v = FileValidator::new(
            [("text/plain", ".txt")]
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
        );
        let registry = StagedUploadRegistry::new();
        let result = stage_upload(&v, &registry, "note.txt", Bytes::from_static(b"hello world")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn take_is_one_shot() {
        let registry = StagedUploadRegistry::new();
        let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
        png.extend_from_slice(b"rest");
        let handle = stage_upload(&validator(), &registry, "a.png", Bytes::from(png))
            .await
            .unwrap();

        assert!(registry.take(&handle).await.is_some());
        assert!(registry.take(&handle).await.is_none());
    }
}
