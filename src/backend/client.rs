//! HTTP calls to a single generation backend (spec §6 "backend-facing HTTP
//! endpoints consumed").
//!
//! Grounded on the synchronous `urllib.request` helpers in
//! `bridge_server/assistant.py` (`queue_prompt`, `get_queue_state`,
//! `get_history`, `delete_history`, `post_free_memory`, `post_interrupt`,
//! `get_image`, `upload_image`), translated one-for-one onto `reqwest`.

use reqwest::multipart;
use serde_json::{json, Value};

use crate::error::ServerError;

/// Thin async HTTP client over a backend's REST surface.
///
/// Every method takes the backend's `address` explicitly rather than
/// binding one at construction time, since a single client is shared
/// across every configured backend (spec §4.2 polls all of them).
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
}

impl Default for BackendClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    fn base_url(address: &str) -> String {
        if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_owned()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        }
    }

    /// `POST /prompt` — submit a resolved workflow graph for execution.
    /// Returns the backend's assigned `prompt_id`.
    pub async fn queue_prompt(
        &self,
        address: &str,
        client_id: &str,
        prompt: &Value,
    ) -> Result<String, ServerError> {
        let url = format!("{}/prompt", Self::base_url(address));
        let body = json!({ "prompt": prompt, "client_id": client_id });
        let resp = self.http.post(&url).json(&body).send().await?;
        let resp = resp.error_for_status()?;
        let value: Value = resp.json().await?;
        value
            .get("prompt_id")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| ServerError::BackendUnavailable("missing prompt_id in response".into()))
    }

    /// `GET /queue` — raw queue-state document used for busyness scoring.
    pub async fn get_queue_state(&self, address: &str) -> Result<Value, ServerError> {
        let url = format!("{}/queue", Self::base_url(address));
        let resp = self.http.get(&url).send().await?.error_for_status()?;
        Ok(resp.json().await?)
    }

    /// `GET /history/{promptId}` — execution record and outputs for a
    /// completed prompt.
    pub async fn get_history(&self, address: &str, prompt_id: &str) -> Result<Value, ServerError> {
        let url = format!("{}/history/{}", Self::base_url(address), prompt_id);
        let resp = self.http.get(&url).send().await?.error_for_status()?;
        Ok(resp.json().await?)
    }

    /// `POST /history` with `{"delete": promptId}` — evict a backend's
    /// retained history for a prompt.
    pub async fn delete_history(&self, address: &str, prompt_id: &str) -> Result<(), ServerError> {
        let url = format!("{}/history", Self::base_url(address));
        let body = json!({ "delete": prompt_id });
        self.http
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// `POST /free` — ask a backend to unload models and free memory.
    pub async fn post_free_memory(&self, address: &str) -> Result<(), ServerError> {
        let url = format!("{}/free", Self::base_url(address));
        let body = json!({ "unload_models": true, "free_memory": true });
        self.http
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// `POST /interrupt` — cancel a backend's in-flight execution.
    pub async fn post_interrupt(&self, address: &str) -> Result<(), ServerError> {
        let url = format!("{}/interrupt", Self::base_url(address));
        self.http.post(&url).send().await?.error_for_status()?;
        Ok(())
    }

    /// `GET /view` — fetch a generated output file's bytes.
    pub async fn get_image(
        &self,
        address: &str,
        filename: &str,
        image_type: &str,
        subfolder: Option<&str>,
    ) -> Result<bytes::Bytes, ServerError> {
        let mut url = format!(
            "{}/view?filename={}&type={}&channel=RGB",
            Self::base_url(address),
            urlencode(filename),
            urlencode(image_type),
        );
        if let Some(subfolder) = subfolder {
            url.push_str(&format!("&subfolder={}", urlencode(subfolder)));
        }
        let resp = self.http.get(&url).send().await?.error_for_status()?;
        Ok(resp.bytes().await?)
    }

    /// `POST /upload/image` (multipart) — stage a local file with a
    /// backend under `filename`, returning the subfolder it landed in.
    pub async fn upload_image(
        &self,
        address: &str,
        local_path: &std::path::Path,
        filename: &str,
        image_type: &str,
    ) -> Result<Value, ServerError> {
        let bytes = tokio::fs::read(local_path).await?;
        let part = multipart::Part::bytes(bytes).file_name(filename.to_owned());
        let form = multipart::Form::new()
            .part("image", part)
            .text("type", image_type.to_owned())
            .text("overwrite", "true");

        let url = format!("{}/upload/image", Self::base_url(address));
        let resp = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}

fn urlencode(value: &str) -> String {
    const FRAGMENT: &percent_encoding::AsciiSet = &percent_encoding::NON_ALPHANUMERIC
        .remove(b'-')
        .remove(b'_')
        .remove(b'.')
        .remove(b'~');
    percent_encoding::utf8_percent_encode(value, FRAGMENT).to_string()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn base_url_adds_scheme_when_missing() {
        assert_eq!(
            BackendClient::base_url("127.0.0.1:8188"),
            "http://127.0.0.1:8188"
        );
        assert_eq!(
            BackendClient::base_url("http://127.0.0.1:8188/"),
            "http://127.0.0.1:8188"
        );
    }

    #[test]
    fn urlencode_escapes_spaces_and_slashes() {
        assert_eq!(urlencode("sub folder/name.png"), "sub%20folder%2Fname.png");
    }
}
