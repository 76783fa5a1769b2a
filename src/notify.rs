//! Milestone notifications and the per-viewer subscriber.
//!
//! The publisher inserts a notification row and announces it on the
//! change feed. Each viewer session runs one subscriber task that
//! filters the feed to its organization, emits transient alerts for
//! rows addressed to it, and coalesces bursts of events into a single
//! debounced refresh of the list and unread count.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use uuid::Uuid;

use crate::db::DealDb;
use crate::error::DbError;
use crate::feed::{ChangeEvent, ChangeFeed, ChangeKind};
use crate::state::ViewerState;
use crate::types::{Notification, NotificationType};

/// Notifications fetched per refresh.
const LIST_LIMIT: usize = 50;

// =============================================================================
// Publisher
// =============================================================================

#[derive(Clone)]
pub struct NotificationPublisher {
    feed: ChangeFeed,
}

impl NotificationPublisher {
    pub fn new(feed: ChangeFeed) -> Self {
        Self { feed }
    }

    /// Insert a notification row and announce it on the change feed.
    ///
    /// `user_id = None` addresses the whole organization. Each call is a
    /// plain insert — idempotency comes from the milestone that
    /// triggered it, not from deduplication here.
    #[allow(clippy::too_many_arguments)]
    pub fn publish(
        &self,
        db: &DealDb,
        organization_id: &str,
        user_id: Option<&str>,
        startup_id: Option<&str>,
        notification_type: NotificationType,
        title: &str,
        description: &str,
        action_url: Option<&str>,
    ) -> Result<Notification, DbError> {
        let now = Utc::now().to_rfc3339();
        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            organization_id: organization_id.to_string(),
            user_id: user_id.map(String::from),
            startup_id: startup_id.map(String::from),
            notification_type,
            title: title.to_string(),
            description: description.to_string(),
            action_url: action_url.map(String::from),
            read: false,
            created_at: now.clone(),
            updated_at: now,
        };

        db.insert_notification(&notification)?;

        self.feed.publish(ChangeEvent {
            organization_id: organization_id.to_string(),
            kind: ChangeKind::Insert,
            notification: Some(notification.clone()),
            notification_id: notification.id.clone(),
        });

        Ok(notification)
    }

    /// Mark read and announce the update so other viewers re-count.
    pub fn mark_read(
        &self,
        db: &DealDb,
        id: &str,
        organization_id: &str,
    ) -> Result<(), DbError> {
        db.mark_notification_read(id, organization_id)?;
        self.feed.publish(ChangeEvent {
            organization_id: organization_id.to_string(),
            kind: ChangeKind::Update,
            notification: None,
            notification_id: id.to_string(),
        });
        Ok(())
    }

    pub fn delete(&self, db: &DealDb, id: &str, organization_id: &str) -> Result<(), DbError> {
        db.delete_notification(id, organization_id)?;
        self.feed.publish(ChangeEvent {
            organization_id: organization_id.to_string(),
            kind: ChangeKind::Delete,
            notification: None,
            notification_id: id.to_string(),
        });
        Ok(())
    }
}

// =============================================================================
// Subscriber
// =============================================================================

/// How one viewer session consumes the feed.
#[derive(Debug, Clone)]
pub struct SubscriberOptions {
    pub organization_id: String,
    /// The viewer's user id; alerts fire for rows addressed to it (or
    /// org-wide rows).
    pub user_id: Option<String>,
    /// "Show all" mode: alert on every insert in the organization.
    pub show_all: bool,
    pub debounce: Duration,
}

/// Handle to a running subscriber task. Dropping it (or calling
/// `unsubscribe`) tears the subscription down — required on logout or
/// tenant switch so cross-tenant events can't keep flowing to a stale
/// session.
pub struct SubscriberHandle {
    task: JoinHandle<()>,
}

impl SubscriberHandle {
    pub fn unsubscribe(self) {
        self.task.abort();
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn the subscriber task for one viewer session.
///
/// `on_alert` fires for inserts addressed to this viewer. `on_refresh`
/// fires once per debounce window no matter how many events arrived in
/// it: a new event while a refresh is pending cancels and reschedules
/// the timer (idle -> pending -> firing -> idle).
pub fn spawn_subscriber(
    feed: &ChangeFeed,
    options: SubscriberOptions,
    on_alert: Arc<dyn Fn(Notification) + Send + Sync>,
    on_refresh: Arc<dyn Fn() + Send + Sync>,
) -> SubscriberHandle {
    let mut rx = feed.subscribe();

    let task = tokio::spawn(async move {
        // None = idle, Some = refresh pending at that instant
        let mut deadline: Option<Instant> = None;

        loop {
            let event = if let Some(at) = deadline {
                tokio::select! {
                    event = rx.recv() => event,
                    _ = sleep_until(at) => {
                        deadline = None;
                        on_refresh();
                        continue;
                    }
                }
            } else {
                rx.recv().await
            };

            match event {
                Ok(event) => {
                    if event.organization_id != options.organization_id {
                        continue;
                    }

                    if event.kind == ChangeKind::Insert {
                        if let Some(notification) = &event.notification {
                            let addressed = match &notification.user_id {
                                None => true, // org-wide
                                Some(uid) => options.user_id.as_deref() == Some(uid.as_str()),
                            };
                            if options.show_all || addressed {
                                on_alert(notification.clone());
                            }
                        }
                    }

                    // Any event reschedules the pending refresh
                    deadline = Some(Instant::now() + options.debounce);
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    log::warn!(
                        "notification subscriber lagged, {} events dropped; scheduling refresh",
                        missed
                    );
                    deadline = Some(Instant::now() + options.debounce);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    // Flush a pending refresh before exiting
                    if deadline.is_some() {
                        on_refresh();
                    }
                    break;
                }
            }
        }
        log::debug!(
            "notification subscriber for org {} stopped",
            options.organization_id
        );
    });

    SubscriberHandle { task }
}

/// Re-fetch the notification list and unread count into the viewer's
/// state. This is what the debounced `on_refresh` does in production.
pub fn refresh_notifications(
    db: &Mutex<DealDb>,
    view: &ViewerState,
    organization_id: &str,
    user_filter: Option<&str>,
) -> Result<(), DbError> {
    let db = db.lock().map_err(|_| DbError::LockPoisoned)?;
    let list = db.list_notifications(organization_id, user_filter, LIST_LIMIT)?;
    let unread = db.unread_count(organization_id, user_filter)?;
    view.set_notifications(list, unread);
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
