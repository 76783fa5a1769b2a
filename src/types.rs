//! Core domain types shared across the orchestration modules.
//!
//! Enums are string-backed: `as_str()` yields the value persisted in
//! SQLite and sent on the wire, and `parse()` accepts the same strings
//! back. Row structs serialize camelCase for UI consumers; wire payloads
//! in `dispatch` keep their own snake_case shapes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The three due-diligence depths the engine supports, plus the bulk
/// consolidated variant used by the upload orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiligenceStage {
    Micro,
    Basic,
    DataRoom,
    Bulk,
}

impl DiligenceStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiligenceStage::Micro => "micro",
            DiligenceStage::Basic => "basic",
            DiligenceStage::DataRoom => "data_room",
            DiligenceStage::Bulk => "bulk",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "micro" => Some(DiligenceStage::Micro),
            "basic" => Some(DiligenceStage::Basic),
            "data_room" => Some(DiligenceStage::DataRoom),
            "bulk" => Some(DiligenceStage::Bulk),
            _ => None,
        }
    }

    /// Signed-URL lifetime for this stage's content links.
    ///
    /// Data-room runs chew through many documents and can sit queued
    /// behind other jobs, so their links live longer.
    pub fn url_ttl_hours(&self) -> u64 {
        match self {
            DiligenceStage::Micro | DiligenceStage::Basic => 24,
            DiligenceStage::DataRoom | DiligenceStage::Bulk => 72,
        }
    }
}

impl fmt::Display for DiligenceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline status of a startup as the team works it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupStatus {
    Active,
    Saved,
    Approved,
    Declined,
}

impl StartupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartupStatus::Active => "active",
            StartupStatus::Saved => "saved",
            StartupStatus::Approved => "approved",
            StartupStatus::Declined => "declined",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(StartupStatus::Active),
            "saved" => Some(StartupStatus::Saved),
            "approved" => Some(StartupStatus::Approved),
            "declined" => Some(StartupStatus::Declined),
            _ => None,
        }
    }
}

impl fmt::Display for StartupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dispatch lifecycle of a diligence request row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    NotStarted,
    Dispatched,
    FailedDispatch,
    Completed,
    /// The engine accepted the dispatch but reported a processing
    /// failure through its callback.
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::NotStarted => "not_started",
            ProcessingStatus::Dispatched => "dispatched",
            ProcessingStatus::FailedDispatch => "failed_dispatch",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(ProcessingStatus::NotStarted),
            "dispatched" => Some(ProcessingStatus::Dispatched),
            "failed_dispatch" => Some(ProcessingStatus::FailedDispatch),
            "completed" => Some(ProcessingStatus::Completed),
            "failed" => Some(ProcessingStatus::Failed),
            _ => None,
        }
    }

    /// A request is active until the engine's callback resolves it,
    /// successfully or not.
    pub fn is_active(&self) -> bool {
        !matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification categories surfaced to viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Profile,
    Report,
    Upload,
    System,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Profile => "profile",
            NotificationType::Report => "report",
            NotificationType::Upload => "upload",
            NotificationType::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "profile" => Some(NotificationType::Profile),
            "report" => Some(NotificationType::Report),
            "upload" => Some(NotificationType::Upload),
            "system" => Some(NotificationType::System),
            _ => None,
        }
    }
}

/// What prompted a dispatch. Carried on the wire so the engine can
/// distinguish intake-time enrichment from manual re-runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Creation,
    ContentUpload,
    Manual,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Creation => "creation",
            TriggerType::ContentUpload => "content_upload",
            TriggerType::Manual => "manual",
        }
    }
}

/// A tenant boundary. Every row below references exactly one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub domain: Option<String>,
    pub created_at: String,
}

/// The prospect record under analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Startup {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub status: StartupStatus,
    /// Path to the pitch deck in storage, if one has been uploaded.
    pub deck_path: Option<String>,
    /// Supplementary data-room document paths.
    pub data_room_paths: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A row from the `diligence_requests` table, keyed by (startup, stage).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiligenceRequest {
    pub startup_id: String,
    pub stage: DiligenceStage,
    pub processing_status: ProcessingStatus,
    pub webhook_triggered_at: Option<String>,
    pub payload_snapshot: Option<String>,
    pub report: Option<String>,
    /// Engine-reported failure reason, when processing failed.
    pub error_reason: Option<String>,
    pub completed_at: Option<String>,
    pub updated_at: String,
}

/// A row from the `diligence_fallbacks` table: a dispatch the engine
/// never saw, captured for manual or scheduled reprocessing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackRecord {
    pub startup_id: String,
    pub stage: DiligenceStage,
    pub webhook_payload: String,
    pub error_reason: String,
    pub retry_count: i64,
    pub updated_at: String,
}

/// A row from the `notifications` table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub organization_id: String,
    /// None = organization-wide.
    pub user_id: Option<String>,
    pub startup_id: Option<String>,
    pub notification_type: NotificationType,
    pub title: String,
    pub description: String,
    pub action_url: Option<String>,
    pub read: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Resolved tenant context returned by the access validator and threaded
/// through every privileged operation.
#[derive(Debug, Clone)]
pub struct OrgContext {
    pub organization_id: String,
    pub organization_name: String,
    /// The acting user, when the operation is user-initiated.
    pub user_id: Option<String>,
}
