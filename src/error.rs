//! Error types for the due-diligence orchestration core
//!
//! Errors are classified by scope:
//! - Access/content errors: surfaced immediately, no network call made
//! - Dispatch failures: non-fatal, recorded for later recovery
//! - Verification failures: optimistic local state has been rolled back

use thiserror::Error;

use crate::types::{DiligenceStage, StartupStatus};

/// Errors produced by the orchestration core.
#[derive(Debug, Error)]
pub enum DealError {
    /// Tenant mismatch or missing organization context. Never retried.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Dispatch attempted without the content the stage requires.
    #[error("No content available for {stage} diligence on startup {startup_id}")]
    NoContentAvailable {
        startup_id: String,
        stage: DiligenceStage,
    },

    /// The POST to the automation engine failed (network, timeout, non-2xx).
    /// Non-fatal: a fallback row has been recorded by the time this surfaces.
    #[error("Dispatch failed for {stage} diligence: {reason}")]
    DispatchFailure {
        stage: DiligenceStage,
        reason: String,
    },

    /// The status write was accepted but the re-read came back different,
    /// or the write itself errored. Local state has been restored.
    #[error("Status verification failed: wrote {submitted}, store has {actual}")]
    VerificationFailed {
        submitted: StartupStatus,
        actual: String,
    },

    /// A pre-flight diagnostic rejected an upload before any network call.
    #[error("Upload rejected: {0}")]
    Diagnostic(String),

    #[error("Store error: {0}")]
    Db(#[from] DbError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("IO error: {0}")]
    Io(String),
}

impl DealError {
    /// True if retrying the same call later could succeed.
    ///
    /// AccessDenied and diagnostic rejections are deterministic; dispatch
    /// and verification failures depend on external state.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DealError::DispatchFailure { .. }
                | DealError::VerificationFailed { .. }
                | DealError::Engine(_)
                | DealError::Db(_)
        )
    }

    /// True if the primary user action should still be treated as having
    /// succeeded (the error is scoped to a best-effort follow-up).
    pub fn is_nonfatal(&self) -> bool {
        matches!(self, DealError::DispatchFailure { .. })
    }
}

impl From<std::io::Error> for DealError {
    fn from(err: std::io::Error) -> Self {
        DealError::Io(err.to_string())
    }
}

/// Errors specific to the SQLite store.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Startup not found: {0}")]
    StartupNotFound(String),

    #[error("Lock poisoned")]
    LockPoisoned,
}

/// Errors from the external automation engine client.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Engine returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid endpoint for stage {0}")]
    InvalidEndpoint(String),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}
