//! Shared fixtures and fakes for the inline test modules.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::config::Config;
use crate::db::DealDb;
use crate::dispatch::WebhookPayload;
use crate::engine::DiligenceEngine;
use crate::error::EngineError;
use crate::types::{Organization, Startup, StartupStatus};

/// Create a temporary database for testing.
///
/// We leak the `TempDir` so the directory persists for the duration of
/// the test. Test temp dirs are cleaned up by the OS.
pub fn test_db() -> DealDb {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("test_dealdesk.db");
    std::mem::forget(dir);
    DealDb::open_at(path).expect("Failed to open test database")
}

pub fn sample_org(id: &str) -> Organization {
    Organization {
        id: id.to_string(),
        name: format!("{} Capital", id),
        domain: Some(format!("{}.example.com", id)),
        created_at: Utc::now().to_rfc3339(),
    }
}

pub fn sample_startup(id: &str, org_id: &str) -> Startup {
    let now = Utc::now().to_rfc3339();
    Startup {
        id: id.to_string(),
        organization_id: org_id.to_string(),
        name: format!("Startup {}", id),
        status: StartupStatus::Active,
        deck_path: Some(format!("decks/{}/deck.pdf", id)),
        data_room_paths: Vec::new(),
        created_at: now.clone(),
        updated_at: now,
    }
}

/// Config pointing at example endpoints; storage dir under a leaked
/// temp dir so upload tests can write real files.
pub fn test_config() -> Config {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let storage_dir = dir.path().to_path_buf();
    std::mem::forget(dir);

    let mut endpoints = HashMap::new();
    for stage in ["micro", "basic", "data_room", "bulk"] {
        endpoints.insert(
            stage.to_string(),
            format!("https://engine.example.com/{}", stage),
        );
    }
    Config {
        engine_endpoints: endpoints,
        callback_url: "https://app.example.com/api/diligence/callback".to_string(),
        signing_secret: "test-secret".to_string(),
        storage_base_url: "https://storage.example.com".to_string(),
        storage_dir,
        max_upload_bytes: crate::config::DEFAULT_MAX_UPLOAD_BYTES,
        allowed_mime_types: vec![
            "application/pdf".to_string(),
            "text/plain".to_string(),
        ],
        debounce_ms: 100,
        http_timeout_secs: 5,
    }
}

/// Engine fake that records every dispatch instead of sending it.
pub struct RecordingEngine {
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    /// (endpoint, serialized payload) per dispatch, in order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DiligenceEngine for RecordingEngine {
    async fn dispatch(
        &self,
        endpoint: &str,
        payload: &WebhookPayload,
    ) -> Result<(), EngineError> {
        let json = serde_json::to_string(payload)?;
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((endpoint.to_string(), json));
        }
        Ok(())
    }
}

/// Engine fake that always refuses the handoff.
pub struct FailingEngine;

#[async_trait]
impl DiligenceEngine for FailingEngine {
    async fn dispatch(
        &self,
        _endpoint: &str,
        _payload: &WebhookPayload,
    ) -> Result<(), EngineError> {
        Err(EngineError::Status {
            status: 503,
            body: "engine unavailable".to_string(),
        })
    }
}
