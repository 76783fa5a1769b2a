//! Startup intake: create the record, then best-effort enrichment.
//!
//! Creation must succeed even when the enrichment dispatch fails — the
//! caller gets a created startup with its primary key populated, and
//! any dispatch problem is scoped to "processing failed to start",
//! never to the creation itself.

use chrono::Utc;
use uuid::Uuid;

use crate::db::DealDb;
use crate::dispatch::Dispatcher;
use crate::error::DealError;
use crate::types::{DiligenceStage, OrgContext, Startup, StartupStatus, TriggerType};

#[derive(Debug, Clone)]
pub struct StartupInput {
    pub name: String,
    /// Storage path of the deck, when one was uploaded at intake.
    pub deck_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IntakeOutcome {
    pub startup: Startup,
    /// Non-fatal dispatch problem, if the micro enrichment failed to
    /// start. The startup above exists regardless.
    pub enrichment_warning: Option<String>,
}

/// Create a startup in the actor's organization and kick off micro
/// diligence when a deck is available.
pub async fn create_startup_with_enrichment(
    db: &DealDb,
    dispatcher: &Dispatcher,
    ctx: &OrgContext,
    input: StartupInput,
) -> Result<IntakeOutcome, DealError> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(DealError::Diagnostic("startup name is required".to_string()));
    }

    let now = Utc::now().to_rfc3339();
    let startup = Startup {
        id: Uuid::new_v4().to_string(),
        organization_id: ctx.organization_id.clone(),
        name: name.to_string(),
        status: StartupStatus::Active,
        deck_path: input.deck_path,
        data_room_paths: Vec::new(),
        created_at: now.clone(),
        updated_at: now,
    };
    db.insert_startup(&startup)?;
    log::info!("created startup {} ({})", startup.id, startup.name);

    // Best-effort enrichment: no deck means nothing to dispatch yet,
    // and a failed dispatch never unwinds the creation.
    let mut enrichment_warning = None;
    if startup.deck_path.is_some() {
        if let Err(e) = dispatcher
            .trigger(
                db,
                DiligenceStage::Micro,
                &startup.id,
                ctx,
                TriggerType::Creation,
            )
            .await
        {
            log::warn!(
                "enrichment dispatch failed for new startup {}: {}",
                startup.id,
                e
            );
            enrichment_warning = Some(format!("processing failed to start: {}", e));
        }
    }

    Ok(IntakeOutcome {
        startup,
        enrichment_warning,
    })
}
