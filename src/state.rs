//! Per-viewer optimistic state.
//!
//! `ViewerState` is the explicit, shared view a single viewer session
//! holds: startup statuses as the UI currently shows them, plus the
//! cached notification list and unread count. Mutation goes through the
//! status synchronizer and the notification subscriber — there are no
//! ambient globals, which keeps optimistic-update/rollback reasoning
//! local and testable.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::{Notification, StartupStatus};

/// Shared mutable view for one viewer session.
pub struct ViewerState {
    /// Startup id -> status as currently displayed (optimistic).
    statuses: Mutex<HashMap<String, StartupStatus>>,
    /// Cached notification list, newest first.
    notifications: Mutex<Vec<Notification>>,
    unread_count: Mutex<i64>,
}

impl ViewerState {
    pub fn new() -> Self {
        Self {
            statuses: Mutex::new(HashMap::new()),
            notifications: Mutex::new(Vec::new()),
            unread_count: Mutex::new(0),
        }
    }

    /// The status the viewer currently sees for a startup, if loaded.
    pub fn status_of(&self, startup_id: &str) -> Option<StartupStatus> {
        self.statuses
            .lock()
            .ok()
            .and_then(|guard| guard.get(startup_id).copied())
    }

    /// Apply a status locally before the store confirms it.
    /// Returns the previous value so the caller can roll back.
    pub fn apply_status(
        &self,
        startup_id: &str,
        status: StartupStatus,
    ) -> Option<StartupStatus> {
        match self.statuses.lock() {
            Ok(mut guard) => guard.insert(startup_id.to_string(), status),
            Err(_) => None,
        }
    }

    /// Restore a startup's status after a failed write or verification.
    ///
    /// `previous` is `None` when the startup wasn't in the local view
    /// before the optimistic apply; rollback then removes the entry.
    pub fn restore_status(&self, startup_id: &str, previous: Option<StartupStatus>) {
        if let Ok(mut guard) = self.statuses.lock() {
            match previous {
                Some(status) => {
                    guard.insert(startup_id.to_string(), status);
                }
                None => {
                    guard.remove(startup_id);
                }
            }
        }
    }

    /// Seed the local view from store rows (initial page load).
    pub fn load_statuses(&self, rows: impl IntoIterator<Item = (String, StartupStatus)>) {
        if let Ok(mut guard) = self.statuses.lock() {
            guard.extend(rows);
        }
    }

    /// Replace the cached notification list and unread count after a
    /// debounced refresh.
    pub fn set_notifications(&self, list: Vec<Notification>, unread: i64) {
        if let Ok(mut guard) = self.notifications.lock() {
            *guard = list;
        }
        if let Ok(mut guard) = self.unread_count.lock() {
            *guard = unread;
        }
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn unread_count(&self) -> i64 {
        self.unread_count.lock().map(|guard| *guard).unwrap_or(0)
    }
}

impl Default for ViewerState {
    fn default() -> Self {
        Self::new()
    }
}
