//! Due-diligence workflow orchestration for a multi-tenant deal desk.
//!
//! The core coordinates state across three independently-failing
//! boundaries: the viewer's local optimistic state (`state`), the
//! durable multi-tenant store (`db`), and an external automation engine
//! reachable only by fire-and-forget HTTP (`engine`). Around those sit
//! tenant access validation (`access`), stage dispatch with durable
//! fallback (`dispatch`, `fallback`), verified optimistic status
//! transitions (`status_sync`), milestone notifications with a
//! debounced per-viewer subscriber (`notify`, `feed`), bulk deck
//! uploads (`uploads`), and the engine's asynchronous completion
//! callbacks (`callback`).

pub mod access;
pub mod callback;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod feed;
pub mod intake;
pub mod notify;
pub mod signed_url;
pub mod state;
pub mod status_sync;
pub mod types;
pub mod uploads;

#[cfg(test)]
pub mod test_support;

pub use access::validate_access;
pub use callback::{apply_completion, CompletionCallback};
pub use config::Config;
pub use db::DealDb;
pub use dispatch::{trigger_diligence, DispatchOutcome, Dispatcher, WebhookPayload};
pub use engine::{DiligenceEngine, HttpEngine};
pub use error::{DbError, DealError, EngineError};
pub use feed::{ChangeEvent, ChangeFeed, ChangeKind};
pub use intake::{create_startup_with_enrichment, IntakeOutcome, StartupInput};
pub use notify::{
    refresh_notifications, spawn_subscriber, NotificationPublisher, SubscriberHandle,
    SubscriberOptions,
};
pub use signed_url::SignedUrlIssuer;
pub use state::ViewerState;
pub use status_sync::{transition_status, StartupStore};
pub use types::{
    DiligenceRequest, DiligenceStage, Notification, NotificationType, OrgContext, Organization,
    ProcessingStatus, Startup, StartupStatus, TriggerType,
};
pub use uploads::{upload_batch, BatchResult, FailedItem, UploadFile, UploadedItem};
