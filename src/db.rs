//! SQLite-backed multi-tenant store for startups, diligence requests,
//! fallback records, and notifications.
//!
//! The database lives at `~/.dealdesk/dealdesk.db`. It is the durable
//! side of the orchestration core; `ViewerState` holds the optimistic
//! local view that gets verified against these rows.

use std::path::PathBuf;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::DbError;
use crate::types::{
    DiligenceRequest, DiligenceStage, FallbackRecord, Notification, NotificationType,
    Organization, ProcessingStatus, Startup, StartupStatus,
};

/// SQLite connection wrapper.
///
/// Intentionally NOT `Clone` or `Sync`: callers hold it behind a
/// `std::sync::Mutex` (see `Orchestrator`) so writes serialize.
pub struct DealDb {
    conn: Connection,
}

impl DealDb {
    /// Open (or create) the database at `~/.dealdesk/dealdesk.db`.
    pub fn open() -> Result<Self, DbError> {
        let path = Self::db_path()?;
        Self::open_at(path)
    }

    /// Open a database at an explicit path. Useful for testing.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL for concurrent-read friendliness
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(include_str!("schema.sql"))?;

        Ok(Self { conn })
    }

    fn db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".dealdesk").join("dealdesk.db"))
    }

    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    // =========================================================================
    // Organizations
    // =========================================================================

    pub fn upsert_organization(&self, org: &Organization) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO organizations (id, name, domain, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET name = ?2, domain = ?3",
            params![org.id, org.name, org.domain, org.created_at],
        )?;
        Ok(())
    }

    pub fn get_organization(&self, id: &str) -> Result<Option<Organization>, DbError> {
        let org = self
            .conn
            .query_row(
                "SELECT id, name, domain, created_at FROM organizations WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Organization {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        domain: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(org)
    }

    // =========================================================================
    // Startups
    // =========================================================================

    pub fn insert_startup(&self, startup: &Startup) -> Result<(), DbError> {
        let paths = serde_json::to_string(&startup.data_room_paths).unwrap_or_default();
        self.conn.execute(
            "INSERT INTO startups
                (id, organization_id, name, status, deck_path, data_room_paths,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                startup.id,
                startup.organization_id,
                startup.name,
                startup.status.as_str(),
                startup.deck_path,
                paths,
                startup.created_at,
                startup.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_startup(&self, id: &str) -> Result<Option<Startup>, DbError> {
        let startup = self
            .conn
            .query_row(
                "SELECT id, organization_id, name, status, deck_path, data_room_paths,
                        created_at, updated_at
                 FROM startups WHERE id = ?1",
                params![id],
                Self::map_startup,
            )
            .optional()?;
        Ok(startup)
    }

    /// Update a startup's status, scoped to its owning organization.
    ///
    /// The org scope is part of the WHERE clause so a stale or forged
    /// organization id silently matches zero rows rather than crossing
    /// the tenant boundary. Returns the number of rows changed; the
    /// status synchronizer re-reads to verify regardless.
    pub fn update_startup_status(
        &self,
        startup_id: &str,
        organization_id: &str,
        status: StartupStatus,
    ) -> Result<usize, DbError> {
        let changed = self.conn.execute(
            "UPDATE startups SET status = ?1, updated_at = ?2
             WHERE id = ?3 AND organization_id = ?4",
            params![
                status.as_str(),
                Utc::now().to_rfc3339(),
                startup_id,
                organization_id
            ],
        )?;
        Ok(changed)
    }

    pub fn set_deck_path(&self, startup_id: &str, deck_path: &str) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE startups SET deck_path = ?1, updated_at = ?2 WHERE id = ?3",
            params![deck_path, Utc::now().to_rfc3339(), startup_id],
        )?;
        Ok(())
    }

    /// Append storage paths to the startup's data room.
    pub fn add_data_room_paths(
        &self,
        startup_id: &str,
        new_paths: &[String],
    ) -> Result<(), DbError> {
        let startup = self
            .get_startup(startup_id)?
            .ok_or_else(|| DbError::StartupNotFound(startup_id.to_string()))?;
        let mut paths = startup.data_room_paths;
        paths.extend(new_paths.iter().cloned());
        let json = serde_json::to_string(&paths).unwrap_or_default();
        self.conn.execute(
            "UPDATE startups SET data_room_paths = ?1, updated_at = ?2 WHERE id = ?3",
            params![json, Utc::now().to_rfc3339(), startup_id],
        )?;
        Ok(())
    }

    /// A stored enum string no variant matches means the row is
    /// corrupt; surface it as a read error rather than coercing to
    /// some default variant.
    fn corrupt_enum(idx: usize, what: &str, raw: &str) -> rusqlite::Error {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown {} '{}'", what, raw).into(),
        )
    }

    fn map_startup(row: &rusqlite::Row<'_>) -> rusqlite::Result<Startup> {
        let status_raw: String = row.get(3)?;
        let paths_raw: Option<String> = row.get(5)?;
        Ok(Startup {
            id: row.get(0)?,
            organization_id: row.get(1)?,
            name: row.get(2)?,
            status: StartupStatus::parse(&status_raw)
                .ok_or_else(|| Self::corrupt_enum(3, "startup status", &status_raw))?,
            deck_path: row.get(4)?,
            data_room_paths: paths_raw
                .and_then(|raw| serde_json::from_str(&raw).ok())
                .unwrap_or_default(),
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    // =========================================================================
    // Diligence requests
    // =========================================================================

    /// Ensure a request row exists for (startup, stage).
    ///
    /// First trigger creates it as `not_started`; re-triggers leave the
    /// existing row alone (DO NOTHING), so there is never more than one
    /// active request per stage.
    pub fn ensure_diligence_request(
        &self,
        startup_id: &str,
        stage: DiligenceStage,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO diligence_requests (startup_id, stage, processing_status, updated_at)
             VALUES (?1, ?2, 'not_started', ?3)
             ON CONFLICT(startup_id, stage) DO NOTHING",
            params![startup_id, stage.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Record a successful dispatch: status, timestamp, payload snapshot.
    pub fn mark_dispatched(
        &self,
        startup_id: &str,
        stage: DiligenceStage,
        payload_snapshot: &str,
        triggered_at: &str,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE diligence_requests
             SET processing_status = 'dispatched',
                 webhook_triggered_at = ?1,
                 payload_snapshot = ?2,
                 updated_at = ?3
             WHERE startup_id = ?4 AND stage = ?5",
            params![
                triggered_at,
                payload_snapshot,
                Utc::now().to_rfc3339(),
                startup_id,
                stage.as_str()
            ],
        )?;
        Ok(())
    }

    pub fn mark_dispatch_failed(
        &self,
        startup_id: &str,
        stage: DiligenceStage,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE diligence_requests
             SET processing_status = 'failed_dispatch', updated_at = ?1
             WHERE startup_id = ?2 AND stage = ?3",
            params![Utc::now().to_rfc3339(), startup_id, stage.as_str()],
        )?;
        Ok(())
    }

    /// Apply a completion callback. Returns `false` when the row was
    /// already completed, so the caller can skip duplicate notifications
    /// (the engine's delivery is at-least-once).
    pub fn complete_diligence_request(
        &self,
        startup_id: &str,
        stage: DiligenceStage,
        report: &str,
        completed_at: &str,
    ) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE diligence_requests
             SET processing_status = 'completed',
                 report = ?1,
                 completed_at = ?2,
                 updated_at = ?3
             WHERE startup_id = ?4 AND stage = ?5
               AND processing_status != 'completed'",
            params![
                report,
                completed_at,
                Utc::now().to_rfc3339(),
                startup_id,
                stage.as_str()
            ],
        )?;
        Ok(changed > 0)
    }

    /// Record an engine-reported processing failure. Returns `false`
    /// when the row already carries a terminal state, so redelivered
    /// failure callbacks can be skipped (delivery is at-least-once).
    pub fn fail_diligence_request(
        &self,
        startup_id: &str,
        stage: DiligenceStage,
        error_reason: &str,
    ) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE diligence_requests
             SET processing_status = 'failed',
                 error_reason = ?1,
                 updated_at = ?2
             WHERE startup_id = ?3 AND stage = ?4
               AND processing_status NOT IN ('completed', 'failed')",
            params![
                error_reason,
                Utc::now().to_rfc3339(),
                startup_id,
                stage.as_str()
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn get_diligence_request(
        &self,
        startup_id: &str,
        stage: DiligenceStage,
    ) -> Result<Option<DiligenceRequest>, DbError> {
        let request = self
            .conn
            .query_row(
                "SELECT startup_id, stage, processing_status, webhook_triggered_at,
                        payload_snapshot, report, error_reason, completed_at, updated_at
                 FROM diligence_requests
                 WHERE startup_id = ?1 AND stage = ?2",
                params![startup_id, stage.as_str()],
                Self::map_request,
            )
            .optional()?;
        Ok(request)
    }

    /// Active (non-terminal) request rows for one (startup, stage).
    /// Structurally 0 or 1 because of the composite key.
    pub fn count_active_requests(
        &self,
        startup_id: &str,
        stage: DiligenceStage,
    ) -> Result<i64, DbError> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM diligence_requests
             WHERE startup_id = ?1 AND stage = ?2
               AND processing_status NOT IN ('completed', 'failed')",
            params![startup_id, stage.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn map_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<DiligenceRequest> {
        let stage_raw: String = row.get(1)?;
        let status_raw: String = row.get(2)?;
        Ok(DiligenceRequest {
            startup_id: row.get(0)?,
            stage: DiligenceStage::parse(&stage_raw)
                .ok_or_else(|| Self::corrupt_enum(1, "stage", &stage_raw))?,
            processing_status: ProcessingStatus::parse(&status_raw)
                .ok_or_else(|| Self::corrupt_enum(2, "processing status", &status_raw))?,
            webhook_triggered_at: row.get(3)?,
            payload_snapshot: row.get(4)?,
            report: row.get(5)?,
            error_reason: row.get(6)?,
            completed_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    // =========================================================================
    // Fallback records
    // =========================================================================

    /// Upsert the fallback row for a startup whose dispatch failed.
    /// Repeat failures bump the retry counter instead of duplicating.
    pub fn upsert_fallback(
        &self,
        startup_id: &str,
        stage: DiligenceStage,
        webhook_payload: &str,
        error_reason: &str,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO diligence_fallbacks
                (startup_id, stage, webhook_payload, error_reason, retry_count, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)
             ON CONFLICT(startup_id) DO UPDATE SET
                stage = ?2,
                webhook_payload = ?3,
                error_reason = ?4,
                retry_count = retry_count + 1,
                updated_at = ?5",
            params![
                startup_id,
                stage.as_str(),
                webhook_payload,
                error_reason,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn get_fallback(&self, startup_id: &str) -> Result<Option<FallbackRecord>, DbError> {
        let record = self
            .conn
            .query_row(
                "SELECT startup_id, stage, webhook_payload, error_reason, retry_count,
                        updated_at
                 FROM diligence_fallbacks WHERE startup_id = ?1",
                params![startup_id],
                |row| {
                    let stage_raw: String = row.get(1)?;
                    Ok(FallbackRecord {
                        startup_id: row.get(0)?,
                        stage: DiligenceStage::parse(&stage_raw)
                            .ok_or_else(|| Self::corrupt_enum(1, "stage", &stage_raw))?,
                        webhook_payload: row.get(2)?,
                        error_reason: row.get(3)?,
                        retry_count: row.get(4)?,
                        updated_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    pub fn insert_notification(&self, n: &Notification) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO notifications
                (id, organization_id, user_id, startup_id, type, title, description,
                 action_url, read, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                n.id,
                n.organization_id,
                n.user_id,
                n.startup_id,
                n.notification_type.as_str(),
                n.title,
                n.description,
                n.action_url,
                n.read as i64,
                n.created_at,
                n.updated_at,
            ],
        )?;
        Ok(())
    }

    /// List notifications for an organization, newest first.
    ///
    /// With `user_id`, restricts to that user's rows plus org-wide
    /// (NULL-addressed) rows; without, returns everything in the org
    /// ("show all" mode).
    pub fn list_notifications(
        &self,
        organization_id: &str,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Notification>, DbError> {
        let mut out = Vec::new();
        match user_id {
            Some(uid) => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, organization_id, user_id, startup_id, type, title,
                            description, action_url, read, created_at, updated_at
                     FROM notifications
                     WHERE organization_id = ?1 AND (user_id = ?2 OR user_id IS NULL)
                     ORDER BY created_at DESC LIMIT ?3",
                )?;
                let rows = stmt.query_map(
                    params![organization_id, uid, limit as i64],
                    Self::map_notification,
                )?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, organization_id, user_id, startup_id, type, title,
                            description, action_url, read, created_at, updated_at
                     FROM notifications
                     WHERE organization_id = ?1
                     ORDER BY created_at DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(
                    params![organization_id, limit as i64],
                    Self::map_notification,
                )?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }

    pub fn unread_count(
        &self,
        organization_id: &str,
        user_id: Option<&str>,
    ) -> Result<i64, DbError> {
        let count = match user_id {
            Some(uid) => self.conn.query_row(
                "SELECT COUNT(*) FROM notifications
                 WHERE organization_id = ?1 AND (user_id = ?2 OR user_id IS NULL)
                   AND read = 0",
                params![organization_id, uid],
                |row| row.get(0),
            )?,
            None => self.conn.query_row(
                "SELECT COUNT(*) FROM notifications
                 WHERE organization_id = ?1 AND read = 0",
                params![organization_id],
                |row| row.get(0),
            )?,
        };
        Ok(count)
    }

    pub fn mark_notification_read(
        &self,
        id: &str,
        organization_id: &str,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE notifications SET read = 1, updated_at = ?1
             WHERE id = ?2 AND organization_id = ?3",
            params![Utc::now().to_rfc3339(), id, organization_id],
        )?;
        Ok(())
    }

    pub fn delete_notification(&self, id: &str, organization_id: &str) -> Result<(), DbError> {
        self.conn.execute(
            "DELETE FROM notifications WHERE id = ?1 AND organization_id = ?2",
            params![id, organization_id],
        )?;
        Ok(())
    }

    fn map_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
        let type_raw: String = row.get(4)?;
        let read: i64 = row.get(8)?;
        Ok(Notification {
            id: row.get(0)?,
            organization_id: row.get(1)?,
            user_id: row.get(2)?,
            startup_id: row.get(3)?,
            notification_type: NotificationType::parse(&type_raw)
                .ok_or_else(|| Self::corrupt_enum(4, "notification type", &type_raw))?,
            title: row.get(5)?,
            description: row.get(6)?,
            action_url: row.get(7)?,
            read: read != 0,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
