//! Completion callbacks from the automation engine.
//!
//! The engine calls back at an unknown future time, at-least-once and
//! possibly never. Applying a completion must therefore be idempotent:
//! the first application writes the report and publishes the milestone
//! notification; re-applying the same payload is a no-op.

use serde::Deserialize;

use crate::db::DealDb;
use crate::error::DealError;
use crate::notify::NotificationPublisher;
use crate::types::{DiligenceStage, NotificationType};

/// Payload the engine POSTs to the durable callback endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionCallback {
    pub startup_id: String,
    pub stage: DiligenceStage,
    /// Report text/markup on success.
    #[serde(default)]
    pub report: Option<String>,
    /// Set when the engine's processing failed.
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

/// Apply a completion (or engine-side failure) to the request row and
/// notify the organization. Returns `true` when this call changed state,
/// `false` for duplicates and unknown startups.
pub fn apply_completion(
    db: &DealDb,
    publisher: &NotificationPublisher,
    callback: &CompletionCallback,
) -> Result<bool, DealError> {
    let Some(startup) = db.get_startup(&callback.startup_id)? else {
        // Callback for a row that no longer exists; background path,
        // log and swallow.
        log::warn!(
            "completion callback for unknown startup {} ignored",
            callback.startup_id
        );
        return Ok(false);
    };

    if let Some(error) = &callback.error {
        // The failure is recorded on the request row first; a redelivery
        // of the same callback finds the row already failed and must not
        // notify again.
        let changed = db.fail_diligence_request(&callback.startup_id, callback.stage, error)?;
        if !changed {
            log::debug!(
                "duplicate failure callback for {} {} ignored",
                callback.startup_id,
                callback.stage
            );
            return Ok(false);
        }

        log::warn!(
            "engine reported processing failure for {} {}: {}",
            callback.startup_id,
            callback.stage,
            error
        );
        publisher.publish(
            db,
            &startup.organization_id,
            None,
            Some(&startup.id),
            NotificationType::System,
            &format!("{} diligence failed", callback.stage),
            &format!("Processing failed for {}: {}", startup.name, error),
            None,
        )?;
        return Ok(true);
    }

    let report = callback.report.as_deref().unwrap_or_default();
    let completed_at = callback
        .completed_at
        .clone()
        .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());

    let changed =
        db.complete_diligence_request(&callback.startup_id, callback.stage, report, &completed_at)?;

    if !changed {
        log::debug!(
            "duplicate completion for {} {} ignored",
            callback.startup_id,
            callback.stage
        );
        return Ok(false);
    }

    publisher.publish(
        db,
        &startup.organization_id,
        None,
        Some(&startup.id),
        NotificationType::Report,
        &format!("{} diligence ready", callback.stage),
        &format!("The {} report for {} is ready.", callback.stage, startup.name),
        Some(&format!("/startups/{}?tab=diligence", startup.id)),
    )?;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::ChangeFeed;
    use crate::test_support::{sample_org, sample_startup, test_db};
    use crate::types::ProcessingStatus;

    fn completion(startup_id: &str, stage: DiligenceStage) -> CompletionCallback {
        CompletionCallback {
            startup_id: startup_id.to_string(),
            stage,
            report: Some("# Findings".to_string()),
            error: None,
            completed_at: Some("2026-08-30T12:00:00Z".to_string()),
        }
    }

    #[test]
    fn test_completion_writes_report_and_notifies() {
        let db = test_db();
        db.upsert_organization(&sample_org("org-a")).unwrap();
        db.insert_startup(&sample_startup("s1", "org-a")).unwrap();
        db.ensure_diligence_request("s1", DiligenceStage::Basic)
            .unwrap();

        let publisher = NotificationPublisher::new(ChangeFeed::new());
        let changed =
            apply_completion(&db, &publisher, &completion("s1", DiligenceStage::Basic)).unwrap();
        assert!(changed);

        let request = db
            .get_diligence_request("s1", DiligenceStage::Basic)
            .unwrap()
            .unwrap();
        assert_eq!(request.processing_status, ProcessingStatus::Completed);
        assert_eq!(request.report.as_deref(), Some("# Findings"));

        let list = db.list_notifications("org-a", None, 10).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].action_url.as_deref(), Some("/startups/s1?tab=diligence"));
    }

    #[test]
    fn test_duplicate_completion_is_noop() {
        let db = test_db();
        db.upsert_organization(&sample_org("org-a")).unwrap();
        db.insert_startup(&sample_startup("s1", "org-a")).unwrap();
        db.ensure_diligence_request("s1", DiligenceStage::Micro)
            .unwrap();

        let publisher = NotificationPublisher::new(ChangeFeed::new());
        let payload = completion("s1", DiligenceStage::Micro);
        assert!(apply_completion(&db, &publisher, &payload).unwrap());
        assert!(!apply_completion(&db, &publisher, &payload).unwrap());

        // Exactly one notification despite two deliveries
        let list = db.list_notifications("org-a", None, 10).unwrap();
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_engine_failure_surfaces_system_notification() {
        let db = test_db();
        db.upsert_organization(&sample_org("org-a")).unwrap();
        db.insert_startup(&sample_startup("s1", "org-a")).unwrap();
        db.ensure_diligence_request("s1", DiligenceStage::Basic)
            .unwrap();

        let publisher = NotificationPublisher::new(ChangeFeed::new());
        let callback = CompletionCallback {
            startup_id: "s1".to_string(),
            stage: DiligenceStage::Basic,
            report: None,
            error: Some("deck could not be parsed".to_string()),
            completed_at: None,
        };
        apply_completion(&db, &publisher, &callback).unwrap();

        let list = db.list_notifications("org-a", None, 10).unwrap();
        assert_eq!(list[0].notification_type, NotificationType::System);
        assert!(list[0].description.contains("deck could not be parsed"));

        // The failure lands on the request row, not as a completion
        let request = db
            .get_diligence_request("s1", DiligenceStage::Basic)
            .unwrap()
            .unwrap();
        assert_eq!(request.processing_status, ProcessingStatus::Failed);
        assert_eq!(
            request.error_reason.as_deref(),
            Some("deck could not be parsed")
        );
    }

    #[test]
    fn test_duplicate_failure_callback_is_noop() {
        let db = test_db();
        db.upsert_organization(&sample_org("org-a")).unwrap();
        db.insert_startup(&sample_startup("s1", "org-a")).unwrap();
        db.ensure_diligence_request("s1", DiligenceStage::Basic)
            .unwrap();

        let publisher = NotificationPublisher::new(ChangeFeed::new());
        let callback = CompletionCallback {
            startup_id: "s1".to_string(),
            stage: DiligenceStage::Basic,
            report: None,
            error: Some("deck could not be parsed".to_string()),
            completed_at: None,
        };
        assert!(apply_completion(&db, &publisher, &callback).unwrap());
        assert!(!apply_completion(&db, &publisher, &callback).unwrap());

        // Exactly one notification despite two deliveries
        let list = db.list_notifications("org-a", None, 10).unwrap();
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_unknown_startup_swallowed() {
        let db = test_db();
        let publisher = NotificationPublisher::new(ChangeFeed::new());
        let changed =
            apply_completion(&db, &publisher, &completion("ghost", DiligenceStage::Basic))
                .unwrap();
        assert!(!changed);
    }
}
