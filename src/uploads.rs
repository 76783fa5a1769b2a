//! Bulk deck upload orchestration.
//!
//! Files are processed sequentially: pre-flight diagnostics, store,
//! sign. One bad file never aborts the batch — its failure is recorded
//! with a specific reason and the loop continues. After the loop a
//! single consolidated dispatch hands every succeeded file to the
//! engine; if that dispatch fails, the uploads themselves remain
//! successful (upload and enrichment are independent outcomes).

use serde::Serialize;
use uuid::Uuid;

use crate::db::DealDb;
use crate::dispatch::{Dispatcher, FileLink};
use crate::error::DealError;
use crate::notify::NotificationPublisher;
use crate::signed_url::SignedUrlIssuer;
use crate::types::{DiligenceStage, NotificationType, OrgContext};

/// One file handed to the orchestrator.
pub struct UploadFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedItem {
    pub file_name: String,
    pub stored_path: String,
    pub download_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    pub file_name: String,
    pub reason: String,
}

/// Aggregated outcome of one batch. The batch counts as successful when
/// at least one file succeeded, even if others failed or the
/// consolidated dispatch did not go out.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub batch_id: String,
    pub succeeded: Vec<UploadedItem>,
    pub failed: Vec<FailedItem>,
    /// Set when the consolidated dispatch failed; the uploads above are
    /// still good.
    pub dispatch_error: Option<String>,
}

/// Upload a batch of pitch decks for the actor's organization.
pub async fn upload_batch(
    db: &DealDb,
    dispatcher: &Dispatcher,
    publisher: &NotificationPublisher,
    ctx: &OrgContext,
    files: Vec<UploadFile>,
) -> Result<BatchResult, DealError> {
    let config = dispatcher.config();
    let issuer = SignedUrlIssuer::new(&config.storage_base_url, &config.signing_secret);
    let batch_id = Uuid::new_v4().to_string();

    if let Err(e) = publisher.publish(
        db,
        &ctx.organization_id,
        None,
        None,
        NotificationType::Upload,
        "Deck upload started",
        &format!("Processing {} file(s).", files.len()),
        None,
    ) {
        // Background milestone; must not fail the batch
        log::warn!("batch-started notification failed: {}", e);
    }

    let mut succeeded: Vec<UploadedItem> = Vec::new();
    let mut failed: Vec<FailedItem> = Vec::new();

    for file in &files {
        match process_one(db, config, &issuer, ctx, &batch_id, file) {
            Ok(item) => succeeded.push(item),
            Err(reason) => {
                log::warn!("upload of {} rejected: {}", file.file_name, reason);
                if let Err(e) = publisher.publish(
                    db,
                    &ctx.organization_id,
                    ctx.user_id.as_deref(),
                    None,
                    NotificationType::System,
                    "File processing failed",
                    &format!("{}: {}", file.file_name, reason),
                    None,
                ) {
                    log::warn!("failure notification failed: {}", e);
                }
                failed.push(FailedItem {
                    file_name: file.file_name.clone(),
                    reason,
                });
            }
        }
    }

    let mut dispatch_error = None;
    if !succeeded.is_empty() {
        let links: Vec<FileLink> = succeeded
            .iter()
            .map(|item| FileLink {
                download_url: item.download_url.clone(),
                file_path: item.stored_path.clone(),
                file_name: item.file_name.clone(),
            })
            .collect();
        if let Err(e) = dispatcher.dispatch_bulk(db, &batch_id, ctx, links).await {
            // Recorded via fallback inside dispatch_bulk; the uploads stand
            dispatch_error = Some(e.to_string());
        }
    }

    log::info!(
        "batch {}: {} succeeded, {} failed, dispatch {}",
        batch_id,
        succeeded.len(),
        failed.len(),
        if dispatch_error.is_some() { "failed" } else { "ok" }
    );

    Ok(BatchResult {
        batch_id,
        succeeded,
        failed,
        dispatch_error,
    })
}

/// Pre-flight diagnostics, then store and sign one file. The error
/// string is the per-file failure reason shown to the user.
fn process_one(
    db: &DealDb,
    config: &crate::config::Config,
    issuer: &SignedUrlIssuer,
    ctx: &OrgContext,
    batch_id: &str,
    file: &UploadFile,
) -> Result<UploadedItem, String> {
    // Diagnostics run before any storage I/O
    if ctx.user_id.is_none() {
        return Err("not authenticated".to_string());
    }
    match db.get_organization(&ctx.organization_id) {
        Ok(Some(_)) => {}
        Ok(None) => return Err("organization could not be resolved".to_string()),
        Err(e) => return Err(format!("organization lookup failed: {}", e)),
    }
    if file.file_name.is_empty()
        || file.file_name.contains('/')
        || file.file_name.contains("..")
    {
        return Err("invalid file name".to_string());
    }
    if file.bytes.len() as u64 > config.max_upload_bytes {
        return Err(format!(
            "file exceeds the {} MB size limit",
            config.max_upload_bytes / (1024 * 1024)
        ));
    }
    if !config
        .allowed_mime_types
        .iter()
        .any(|allowed| allowed == &file.mime_type)
    {
        return Err(format!("file type {} is not supported", file.mime_type));
    }

    let batch_dir = config
        .storage_dir
        .join(&ctx.organization_id)
        .join(batch_id);
    if let Err(e) = std::fs::create_dir_all(&batch_dir) {
        return Err(format!("storage unavailable: {}", e));
    }

    let disk_path = batch_dir.join(&file.file_name);
    if let Err(e) = std::fs::write(&disk_path, &file.bytes) {
        return Err(format!("storage write failed: {}", e));
    }

    let stored_path = format!(
        "{}/{}/{}",
        ctx.organization_id, batch_id, file.file_name
    );
    let download_url = issuer
        .issue(&stored_path, DiligenceStage::Bulk.url_ttl_hours())
        .map_err(|e| format!("could not sign download link: {}", e))?;

    Ok(UploadedItem {
        file_name: file.file_name.clone(),
        stored_path,
        download_url,
    })
}

// =============================================================================
// Tests
// =============================================================================
