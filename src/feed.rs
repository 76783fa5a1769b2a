//! In-process change feed for notification rows.
//!
//! One broadcast channel fans insert/update/delete events out to every
//! subscribed viewer session. Events carry the organization id; each
//! subscriber filters to its own organization so a torn-down or
//! misconfigured session can never observe another tenant's traffic.

use tokio::sync::broadcast;

use crate::types::Notification;

/// Buffered events per subscriber before lagging ones are dropped.
const FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One change-feed event, scoped to an organization.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub organization_id: String,
    pub kind: ChangeKind,
    /// The affected row; `None` for deletes where only the id survives.
    pub notification: Option<Notification>,
    pub notification_id: String,
}

/// Handle to the shared feed. Cheap to clone.
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self { tx }
    }

    /// Subscribe a viewer session. The receiver sees every event;
    /// organization filtering happens subscriber-side.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Send errors just mean no subscriber is
    /// listening, which is fine — events are refresh hints, not data.
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}
