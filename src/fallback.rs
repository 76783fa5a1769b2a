//! Durable fallback recording for failed dispatches.
//!
//! When the engine never sees a trigger (network error, timeout,
//! non-2xx), the attempted payload and reason are written here so an
//! operator or retry job can recover. Recording a failure must never
//! itself fail the caller: errors are logged and swallowed.

use crate::db::DealDb;
use crate::types::DiligenceStage;

/// Persist a "dispatch failed" row for later reprocessing.
///
/// Upserts by startup id; repeat failures increment the retry counter.
/// Infallible by contract — a store error here is logged, not raised,
/// so it cannot mask the original dispatch failure.
pub fn record_dispatch_failure(
    db: &DealDb,
    startup_id: &str,
    stage: DiligenceStage,
    payload_snapshot: &str,
    reason: &str,
) {
    log::warn!(
        "dispatch failed for startup {} stage {}: {}",
        startup_id,
        stage,
        reason
    );

    if let Err(e) = db.upsert_fallback(startup_id, stage, payload_snapshot, reason) {
        log::error!(
            "failed to record fallback for startup {}: {} (original failure: {})",
            startup_id,
            e,
            reason
        );
    }

    if let Err(e) = db.mark_dispatch_failed(startup_id, stage) {
        log::error!(
            "failed to mark request failed_dispatch for startup {}: {}",
            startup_id,
            e
        );
    }
}
