//! Runtime configuration.
//!
//! Loaded from `~/.dealdesk/config.json`; tests construct a `Config`
//! directly. Endpoint URLs are fixed per stage — the engine exposes one
//! webhook per diligence depth plus the bulk intake endpoint.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::DiligenceStage;

/// Default debounce window for notification refreshes.
pub const DEFAULT_DEBOUNCE_MS: u64 = 2_000;

/// Default request timeout for engine dispatch POSTs. The engine
/// processes asynchronously; only the handoff needs to be bounded.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Default per-file upload size limit (50 MB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// One webhook endpoint per stage, keyed by stage wire name
    /// ("micro", "basic", "data_room", "bulk").
    pub engine_endpoints: HashMap<String, String>,
    /// Durable endpoint the engine calls back when a run finishes.
    pub callback_url: String,
    /// Secret for signing time-limited content URLs.
    pub signing_secret: String,
    /// Base URL signed content links are issued under.
    pub storage_base_url: String,
    /// Local directory uploaded files are stored in, one subdir per org.
    pub storage_dir: PathBuf,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    #[serde(default = "default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_max_upload_bytes() -> u64 {
    DEFAULT_MAX_UPLOAD_BYTES
}

fn default_allowed_mime_types() -> Vec<String> {
    [
        "application/pdf",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "text/csv",
        "text/plain",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

impl Config {
    /// Resolve the webhook endpoint for a stage.
    pub fn endpoint_for(&self, stage: DiligenceStage) -> Option<&str> {
        self.engine_endpoints.get(stage.as_str()).map(|s| s.as_str())
    }

    /// The canonical config file path (`~/.dealdesk/config.json`).
    pub fn config_path() -> Result<PathBuf, String> {
        let home = dirs::home_dir().ok_or("Could not find home directory")?;
        Ok(home.join(".dealdesk").join("config.json"))
    }

    /// Load configuration from `~/.dealdesk/config.json`.
    pub fn load() -> Result<Self, String> {
        let path = Self::config_path()?;
        if !path.exists() {
            return Err(format!(
                "Config file not found at {}. Create it with your engine endpoints and signing secret.",
                path.display()
            ));
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read config: {}", e))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))?;
        Ok(config)
    }
}
