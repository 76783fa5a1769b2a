//! Workflow trigger dispatch to the external automation engine.
//!
//! Builds a stage-specific payload around a time-limited content URL
//! and POSTs it to the stage's fixed endpoint. Success marks the
//! (startup, stage) request row `dispatched`; failure records a durable
//! fallback row and surfaces a non-fatal error. Re-triggering an
//! in-flight stage upserts the existing row — never a duplicate.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::db::DealDb;
use crate::engine::DiligenceEngine;
use crate::error::DealError;
use crate::fallback::record_dispatch_failure;
use crate::signed_url::SignedUrlIssuer;
use crate::types::{DiligenceStage, OrgContext, Startup, TriggerType};

// =============================================================================
// Wire payloads
// =============================================================================
//
// One explicit struct per stage, validated before serialization, so a
// malformed payload can never be sent silently. Field names are the
// engine's snake_case contract; bulk file entries are camelCase per the
// engine's intake format.

/// Fields every stage payload carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadBase {
    pub startup_id: String,
    pub startup_name: String,
    pub organization_id: String,
    pub organization_name: String,
    pub callback_url: String,
    pub trigger_type: TriggerType,
    /// ISO 8601
    pub submitted_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicroPayload {
    #[serde(flatten)]
    pub base: PayloadBase,
    pub content_download_link: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicPayload {
    #[serde(flatten)]
    pub base: PayloadBase,
    pub content_download_link: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRoomPayload {
    #[serde(flatten)]
    pub base: PayloadBase,
    /// Deck link when present, else the first data-room document.
    pub content_download_link: String,
    pub data_room_files: Vec<FileLink>,
    pub total_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkPayload {
    pub organization_id: String,
    pub organization_name: String,
    pub callback_url: String,
    pub trigger_type: TriggerType,
    pub submitted_at: String,
    pub files: Vec<FileLink>,
    pub total_count: usize,
}

/// One uploaded file reference inside data-room and bulk payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileLink {
    pub download_url: String,
    pub file_path: String,
    pub file_name: String,
}

/// Tagged union over the stage payloads. Serializes untagged: each
/// stage endpoint knows its own shape.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum WebhookPayload {
    Micro(MicroPayload),
    Basic(BasicPayload),
    DataRoom(DataRoomPayload),
    Bulk(BulkPayload),
}

impl WebhookPayload {
    pub fn stage(&self) -> DiligenceStage {
        match self {
            WebhookPayload::Micro(_) => DiligenceStage::Micro,
            WebhookPayload::Basic(_) => DiligenceStage::Basic,
            WebhookPayload::DataRoom(_) => DiligenceStage::DataRoom,
            WebhookPayload::Bulk(_) => DiligenceStage::Bulk,
        }
    }

    /// Schema check before serialization: required fields non-empty,
    /// link lists consistent with their counts.
    pub fn validate(&self) -> Result<(), String> {
        fn check_base(base: &PayloadBase) -> Result<(), String> {
            if base.startup_id.is_empty() {
                return Err("startup_id is empty".to_string());
            }
            if base.organization_id.is_empty() {
                return Err("organization_id is empty".to_string());
            }
            if base.callback_url.is_empty() {
                return Err("callback_url is empty".to_string());
            }
            Ok(())
        }

        match self {
            WebhookPayload::Micro(p) => {
                check_base(&p.base)?;
                if p.content_download_link.is_empty() {
                    return Err("content_download_link is empty".to_string());
                }
            }
            WebhookPayload::Basic(p) => {
                check_base(&p.base)?;
                if p.content_download_link.is_empty() {
                    return Err("content_download_link is empty".to_string());
                }
            }
            WebhookPayload::DataRoom(p) => {
                check_base(&p.base)?;
                if p.data_room_files.is_empty() {
                    return Err("data_room_files is empty".to_string());
                }
                if p.data_room_files.len() != p.total_count {
                    return Err("total_count does not match data_room_files".to_string());
                }
            }
            WebhookPayload::Bulk(p) => {
                if p.organization_id.is_empty() {
                    return Err("organization_id is empty".to_string());
                }
                if p.files.is_empty() {
                    return Err("files is empty".to_string());
                }
                if p.files.len() != p.total_count {
                    return Err("total_count does not match files".to_string());
                }
            }
        }
        Ok(())
    }
}

/// Result of a successful dispatch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    pub startup_id: String,
    pub stage: DiligenceStage,
    pub triggered_at: String,
}

// =============================================================================
// Dispatcher
// =============================================================================

pub struct Dispatcher {
    config: Config,
    issuer: SignedUrlIssuer,
    engine: Arc<dyn DiligenceEngine>,
}

impl Dispatcher {
    pub fn new(config: Config, engine: Arc<dyn DiligenceEngine>) -> Self {
        let issuer = SignedUrlIssuer::new(&config.storage_base_url, &config.signing_secret);
        Self {
            config,
            issuer,
            engine,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Trigger a diligence stage for a startup.
    ///
    /// The caller has already validated tenant access; `ctx` is the
    /// validated context. On engine failure a fallback row is recorded
    /// and the error surfaces as non-fatal `DispatchFailure` — already
    /// committed startup state is never rolled back.
    pub async fn trigger(
        &self,
        db: &DealDb,
        stage: DiligenceStage,
        startup_id: &str,
        ctx: &OrgContext,
        trigger_type: TriggerType,
    ) -> Result<DispatchOutcome, DealError> {
        let startup = db
            .get_startup(startup_id)?
            .ok_or_else(|| DealError::AccessDenied(format!("unknown startup {}", startup_id)))?;

        let payload = self.build_payload(stage, &startup, ctx, trigger_type)?;
        if let Err(reason) = payload.validate() {
            // A payload we built ourselves failing validation is a bug,
            // but it must never reach the engine malformed.
            log::error!("payload validation failed for {} {}: {}", startup_id, stage, reason);
            return Err(DealError::DispatchFailure { stage, reason });
        }

        db.ensure_diligence_request(startup_id, stage)?;

        let snapshot = serde_json::to_string(&payload).unwrap_or_default();
        let triggered_at = Utc::now().to_rfc3339();

        let endpoint = match self.config.endpoint_for(stage) {
            Some(endpoint) => endpoint.to_string(),
            None => {
                let reason = format!("no endpoint configured for stage {}", stage);
                record_dispatch_failure(db, startup_id, stage, &snapshot, &reason);
                return Err(DealError::DispatchFailure { stage, reason });
            }
        };

        match self.engine.dispatch(&endpoint, &payload).await {
            Ok(()) => {
                db.mark_dispatched(startup_id, stage, &snapshot, &triggered_at)?;
                log::info!("dispatched {} diligence for startup {}", stage, startup_id);
                Ok(DispatchOutcome {
                    startup_id: startup_id.to_string(),
                    stage,
                    triggered_at,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                record_dispatch_failure(db, startup_id, stage, &snapshot, &reason);
                Err(DealError::DispatchFailure { stage, reason })
            }
        }
    }

    /// Consolidated dispatch for a bulk upload batch. Startup rows for
    /// the uploaded decks are created by the engine's callback path, so
    /// a failure here is fallback-recorded under the batch id.
    pub async fn dispatch_bulk(
        &self,
        db: &DealDb,
        batch_id: &str,
        ctx: &OrgContext,
        files: Vec<FileLink>,
    ) -> Result<(), DealError> {
        let payload = WebhookPayload::Bulk(BulkPayload {
            organization_id: ctx.organization_id.clone(),
            organization_name: ctx.organization_name.clone(),
            callback_url: self.config.callback_url.clone(),
            trigger_type: TriggerType::ContentUpload,
            submitted_at: Utc::now().to_rfc3339(),
            total_count: files.len(),
            files,
        });
        if let Err(reason) = payload.validate() {
            return Err(DealError::DispatchFailure {
                stage: DiligenceStage::Bulk,
                reason,
            });
        }

        let snapshot = serde_json::to_string(&payload).unwrap_or_default();
        let endpoint = match self.config.endpoint_for(DiligenceStage::Bulk) {
            Some(endpoint) => endpoint.to_string(),
            None => {
                let reason = "no endpoint configured for stage bulk".to_string();
                record_dispatch_failure(db, batch_id, DiligenceStage::Bulk, &snapshot, &reason);
                return Err(DealError::DispatchFailure {
                    stage: DiligenceStage::Bulk,
                    reason,
                });
            }
        };

        match self.engine.dispatch(&endpoint, &payload).await {
            Ok(()) => {
                log::info!(
                    "dispatched bulk batch {} ({} files)",
                    batch_id,
                    match &payload {
                        WebhookPayload::Bulk(p) => p.total_count,
                        _ => 0,
                    }
                );
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                record_dispatch_failure(db, batch_id, DiligenceStage::Bulk, &snapshot, &reason);
                Err(DealError::DispatchFailure {
                    stage: DiligenceStage::Bulk,
                    reason,
                })
            }
        }
    }

    /// Issue the signed content link(s) a stage needs and assemble its
    /// payload. `NoContentAvailable` when the startup lacks the content
    /// the stage requires.
    fn build_payload(
        &self,
        stage: DiligenceStage,
        startup: &Startup,
        ctx: &OrgContext,
        trigger_type: TriggerType,
    ) -> Result<WebhookPayload, DealError> {
        let base = PayloadBase {
            startup_id: startup.id.clone(),
            startup_name: startup.name.clone(),
            organization_id: ctx.organization_id.clone(),
            organization_name: ctx.organization_name.clone(),
            callback_url: self.config.callback_url.clone(),
            trigger_type,
            submitted_at: Utc::now().to_rfc3339(),
        };
        let ttl = stage.url_ttl_hours();

        match stage {
            DiligenceStage::Micro | DiligenceStage::Basic => {
                let deck_path =
                    startup
                        .deck_path
                        .as_deref()
                        .ok_or_else(|| DealError::NoContentAvailable {
                            startup_id: startup.id.clone(),
                            stage,
                        })?;
                let link = self
                    .issuer
                    .issue(deck_path, ttl)
                    .map_err(DealError::Io)?;
                Ok(match stage {
                    DiligenceStage::Micro => WebhookPayload::Micro(MicroPayload {
                        base,
                        content_download_link: link,
                    }),
                    _ => WebhookPayload::Basic(BasicPayload {
                        base,
                        content_download_link: link,
                    }),
                })
            }
            DiligenceStage::DataRoom => {
                if startup.data_room_paths.is_empty() {
                    return Err(DealError::NoContentAvailable {
                        startup_id: startup.id.clone(),
                        stage,
                    });
                }
                let mut files = Vec::with_capacity(startup.data_room_paths.len());
                for path in &startup.data_room_paths {
                    let url = self.issuer.issue(path, ttl).map_err(DealError::Io)?;
                    files.push(FileLink {
                        download_url: url,
                        file_path: path.clone(),
                        file_name: file_name_of(path),
                    });
                }
                // Deck anchors the report when present
                let content_download_link = match startup.deck_path.as_deref() {
                    Some(deck) => self.issuer.issue(deck, ttl).map_err(DealError::Io)?,
                    None => files[0].download_url.clone(),
                };
                Ok(WebhookPayload::DataRoom(DataRoomPayload {
                    base,
                    content_download_link,
                    total_count: files.len(),
                    data_room_files: files,
                }))
            }
            DiligenceStage::Bulk => Err(DealError::DispatchFailure {
                stage,
                reason: "bulk dispatch goes through dispatch_bulk".to_string(),
            }),
        }
    }
}

fn file_name_of(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

/// User-facing trigger entry point: tenant validation, then dispatch.
///
/// A cross-tenant actor gets `AccessDenied` before any request row is
/// touched or any byte leaves the process.
pub async fn trigger_diligence(
    db: &DealDb,
    dispatcher: &Dispatcher,
    stage: DiligenceStage,
    startup_id: &str,
    actor_org_id: Option<&str>,
    actor_user_id: Option<&str>,
) -> Result<DispatchOutcome, DealError> {
    let ctx = crate::access::validate_access(db, actor_org_id, actor_user_id, startup_id)?;
    dispatcher
        .trigger(db, stage, startup_id, &ctx, TriggerType::Manual)
        .await
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        sample_org, sample_startup, test_config, test_db, FailingEngine, RecordingEngine,
    };
    use crate::types::ProcessingStatus;

    fn ctx() -> OrgContext {
        OrgContext {
            organization_id: "org-a".to_string(),
            organization_name: "org-a Capital".to_string(),
            user_id: Some("u1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_trigger_marks_dispatched_with_snapshot() {
        let db = test_db();
        db.upsert_organization(&sample_org("org-a")).unwrap();
        db.insert_startup(&sample_startup("s1", "org-a")).unwrap();

        let engine = Arc::new(RecordingEngine::new());
        let dispatcher = Dispatcher::new(test_config(), engine.clone());

        let outcome = dispatcher
            .trigger(&db, DiligenceStage::Basic, "s1", &ctx(), TriggerType::Manual)
            .await
            .unwrap();
        assert_eq!(outcome.stage, DiligenceStage::Basic);

        let request = db
            .get_diligence_request("s1", DiligenceStage::Basic)
            .unwrap()
            .unwrap();
        assert_eq!(request.processing_status, ProcessingStatus::Dispatched);
        assert!(request.webhook_triggered_at.is_some());

        let snapshot = request.payload_snapshot.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&snapshot).unwrap();
        assert_eq!(parsed["startup_id"], "s1");
        assert_eq!(parsed["organization_id"], "org-a");
        assert_eq!(parsed["trigger_type"], "manual");
        assert!(parsed["content_download_link"]
            .as_str()
            .unwrap()
            .contains("token="));

        assert_eq!(engine.calls().len(), 1);
        assert!(engine.calls()[0].0.ends_with("/basic"));
    }

    #[tokio::test]
    async fn test_retrigger_upserts_single_active_row() {
        let db = test_db();
        db.upsert_organization(&sample_org("org-a")).unwrap();
        db.insert_startup(&sample_startup("s1", "org-a")).unwrap();

        let dispatcher = Dispatcher::new(test_config(), Arc::new(RecordingEngine::new()));
        for _ in 0..2 {
            dispatcher
                .trigger(&db, DiligenceStage::Basic, "s1", &ctx(), TriggerType::Manual)
                .await
                .unwrap();
        }

        assert_eq!(
            db.count_active_requests("s1", DiligenceStage::Basic).unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_no_deck_means_no_content_available() {
        let db = test_db();
        db.upsert_organization(&sample_org("org-a")).unwrap();
        let mut startup = sample_startup("s1", "org-a");
        startup.deck_path = None;
        db.insert_startup(&startup).unwrap();

        let engine = Arc::new(RecordingEngine::new());
        let dispatcher = Dispatcher::new(test_config(), engine.clone());

        let err = dispatcher
            .trigger(&db, DiligenceStage::Micro, "s1", &ctx(), TriggerType::Creation)
            .await
            .unwrap_err();
        assert!(matches!(err, DealError::NoContentAvailable { .. }));
        // No network call was made
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_engine_failure_records_fallback() {
        let db = test_db();
        db.upsert_organization(&sample_org("org-a")).unwrap();
        db.insert_startup(&sample_startup("s1", "org-a")).unwrap();

        let dispatcher = Dispatcher::new(test_config(), Arc::new(FailingEngine));
        let err = dispatcher
            .trigger(&db, DiligenceStage::Basic, "s1", &ctx(), TriggerType::Manual)
            .await
            .unwrap_err();
        assert!(err.is_nonfatal());

        let fallback = db.get_fallback("s1").unwrap().expect("fallback row");
        assert!(fallback.error_reason.contains("503"));
        let request = db
            .get_diligence_request("s1", DiligenceStage::Basic)
            .unwrap()
            .unwrap();
        assert_eq!(request.processing_status, ProcessingStatus::FailedDispatch);
    }

    #[tokio::test]
    async fn test_data_room_payload_carries_all_documents() {
        let db = test_db();
        db.upsert_organization(&sample_org("org-a")).unwrap();
        let mut startup = sample_startup("s1", "org-a");
        startup.data_room_paths = vec![
            "rooms/s1/financials.xlsx".to_string(),
            "rooms/s1/cap-table.pdf".to_string(),
        ];
        db.insert_startup(&startup).unwrap();

        let engine = Arc::new(RecordingEngine::new());
        let dispatcher = Dispatcher::new(test_config(), engine.clone());
        dispatcher
            .trigger(&db, DiligenceStage::DataRoom, "s1", &ctx(), TriggerType::Manual)
            .await
            .unwrap();

        let (_, payload_json) = engine.calls().remove(0);
        let parsed: serde_json::Value = serde_json::from_str(&payload_json).unwrap();
        assert_eq!(parsed["total_count"], 2);
        let files = parsed["data_room_files"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[1]["fileName"], "cap-table.pdf");
        assert!(files[0]["downloadUrl"].as_str().unwrap().contains("expires="));
    }

    #[tokio::test]
    async fn test_cross_tenant_trigger_denied_before_any_side_effect() {
        let db = test_db();
        db.upsert_organization(&sample_org("org-a")).unwrap();
        db.upsert_organization(&sample_org("org-b")).unwrap();
        db.insert_startup(&sample_startup("s1", "org-b")).unwrap();

        let engine = Arc::new(RecordingEngine::new());
        let dispatcher = Dispatcher::new(test_config(), engine.clone());

        let err = trigger_diligence(
            &db,
            &dispatcher,
            DiligenceStage::Basic,
            "s1",
            Some("org-a"),
            Some("u1"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DealError::AccessDenied(_)));

        // No network call, no request row
        assert!(engine.calls().is_empty());
        assert!(db
            .get_diligence_request("s1", DiligenceStage::Basic)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_bulk_payload_validation_checks_count() {
        let payload = WebhookPayload::Bulk(BulkPayload {
            organization_id: "org-a".to_string(),
            organization_name: "org-a Capital".to_string(),
            callback_url: "https://app.example.com/cb".to_string(),
            trigger_type: TriggerType::ContentUpload,
            submitted_at: Utc::now().to_rfc3339(),
            files: vec![FileLink {
                download_url: "https://storage.example.com/f".to_string(),
                file_path: "f".to_string(),
                file_name: "f".to_string(),
            }],
            total_count: 2,
        });
        assert!(payload.validate().is_err());
    }
}
