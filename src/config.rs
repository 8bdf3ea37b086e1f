//! Bridge configuration, loaded from environment variables at startup.

use std::collections::HashMap;

/// Runtime configuration for bridge-server.
///
/// Every field has a sensible default so the server works out-of-the-box
/// without any environment variables set, matching the bridge's "just run
/// it" posture.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:8288"`).
    pub bind_address: String,

    /// Addresses of the generation backends this bridge load-balances over,
    /// e.g. `["127.0.0.1:8188", "127.0.0.1:8189"]`. Order is preserved and
    /// used as the tie-break in backend selection (spec §4.2).
    pub backend_addresses: Vec<String>,

    /// Path to the persisted generation-count document (`CURRENT_STATE`).
    pub current_state_path: String,

    /// Path to the persisted workflow-alias document (`WORKFLOW_ALIAS`).
    pub workflow_alias_path: String,

    /// Directory containing workflow template JSON files (`WORKFLOW_DIR`).
    pub workflow_dir: String,

    /// Number of heartbeat rounds tolerated without progress before a
    /// session is timed out (`LIMIT_TIMEOUT_COUNT`).
    pub limit_timeout_count: u32,

    /// Seconds between heartbeat rounds (`TIMEOUT_INTERVAL`). Also the
    /// sweep-loop interval and, multiplied by `limit_timeout_count`, the
    /// session TTL (spec §4.1).
    pub timeout_interval: u64,

    /// Maximum accepted multipart upload size, in bytes (`UPLOAD_MAX_SIZE`,
    /// configured in MiB).
    pub upload_max_size: usize,

    /// MIME type → canonical file extension map used both to accept
    /// uploads and to retype template string inputs as file inputs
    /// (`ALLOWED_MIME_TYPE_EXTENSION_MAP`).
    pub allowed_mime_extension_map: HashMap<String, String>,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`
    /// (`LOGGING_LEVEL`).
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// When `true`, serve the Swagger UI at `/swagger-ui` and the OpenAPI
    /// spec at `/api-docs/openapi.json`.
    pub enable_swagger: bool,

    /// Comma-separated list of allowed CORS origins. `None` means allow
    /// all origins (`*`), the development default.
    pub cors_allowed_origins: Option<String>,

    /// When set, logs are additionally written to a daily-rotated file in
    /// this directory via `tracing-appender`, alongside stdout.
    pub log_dir: Option<String>,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: default_bind_address(),
            backend_addresses: std::env::var("COMFYUI_SERVERS")
                .ok()
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_owned())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            current_state_path: env_or("CURRENT_STATE", "current_state.json"),
            workflow_alias_path: env_or("WORKFLOW_ALIAS", "workflow_alias.json"),
            workflow_dir: env_or("WORKFLOW_DIR", "workflows"),
            limit_timeout_count: parse_env("LIMIT_TIMEOUT_COUNT", 10),
            timeout_interval: parse_env("TIMEOUT_INTERVAL", 3),
            upload_max_size: parse_env::<usize>("UPLOAD_MAX_SIZE", 100) * 1024 * 1024,
            allowed_mime_extension_map: std::env::var("ALLOWED_MIME_TYPE_EXTENSION_MAP")
                .ok()
                .and_then(|v| serde_json::from_str(&v).ok())
                .unwrap_or_else(default_mime_extension_map),
            log_level: env_or("LOGGING_LEVEL", "info"),
            log_json: std::env::var("LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            enable_swagger: std::env::var("ENABLE_SWAGGER")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
            cors_allowed_origins: std::env::var("CORS_ORIGINS").ok(),
            log_dir: std::env::var("LOG_DIR").ok(),
        }
    }

    /// Session lifetime in seconds before the TTL sweep releases it, per
    /// spec §4.1: `lifeSeconds = limitTimeoutCount × timeoutInterval`.
    pub fn life_seconds(&self) -> u64 {
        self.limit_timeout_count as u64 * self.timeout_interval
    }
}

fn default_bind_address() -> String {
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_owned());
    let port = std::env::var("PORT").unwrap_or_else(|_| "8288".to_owned());
    format!("{host}:{port}")
}

fn default_mime_extension_map() -> HashMap<String, String> {
    [
        ("image/png", ".png"),
        ("image/jpeg", ".jpg"),
        ("image/gif", ".gif"),
        ("image/webp", ".webp"),
        ("video/mp4", ".mp4"),
        ("text/plain", ".txt"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v.to_owned()))
    .collect()
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
