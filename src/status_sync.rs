//! Optimistic status transitions with verified rollback.
//!
//! The viewer sees the new status immediately; the store write is then
//! verified by re-reading the row. A mismatch (e.g. a permission policy
//! that accepts the write path but filters it out) or a store error
//! restores the local view to its pre-call value. Concurrent writers on
//! the same startup are not mutually excluded — the last verified
//! writer wins, an accepted weak-consistency tradeoff.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::db::DealDb;
use crate::error::{DbError, DealError};
use crate::state::ViewerState;
use crate::types::{OrgContext, StartupStatus};

/// Store operations the synchronizer needs. `DealDb` behind a mutex is
/// the production implementation; tests substitute flaky fakes to
/// exercise the silent-partial-write path.
#[async_trait]
pub trait StartupStore: Send + Sync {
    /// Owning organization of a startup, `None` if unknown.
    async fn owning_org(&self, startup_id: &str) -> Result<Option<String>, DbError>;

    /// Write a status scoped to (startup, organization). A write that
    /// matches zero rows still returns Ok — verification catches it.
    async fn write_status(
        &self,
        startup_id: &str,
        organization_id: &str,
        status: StartupStatus,
    ) -> Result<(), DbError>;

    /// Re-read the current status.
    async fn read_status(&self, startup_id: &str) -> Result<Option<StartupStatus>, DbError>;
}

#[async_trait]
impl StartupStore for Mutex<DealDb> {
    async fn owning_org(&self, startup_id: &str) -> Result<Option<String>, DbError> {
        let db = self.lock().map_err(|_| DbError::LockPoisoned)?;
        Ok(db.get_startup(startup_id)?.map(|s| s.organization_id))
    }

    async fn write_status(
        &self,
        startup_id: &str,
        organization_id: &str,
        status: StartupStatus,
    ) -> Result<(), DbError> {
        let db = self.lock().map_err(|_| DbError::LockPoisoned)?;
        // Zero rows changed is not an error here: the org-scoped WHERE
        // clause absorbs stale filters, and the verify step reports it.
        db.update_startup_status(startup_id, organization_id, status)?;
        Ok(())
    }

    async fn read_status(&self, startup_id: &str) -> Result<Option<StartupStatus>, DbError> {
        let db = self.lock().map_err(|_| DbError::LockPoisoned)?;
        Ok(db.get_startup(startup_id)?.map(|s| s.status))
    }
}

/// Transition a startup's status.
///
/// 1. Validate tenant access (fails closed, no write on mismatch)
/// 2. Capture the previous status from the local view
/// 3. Apply the new status optimistically
/// 4. Write to the store, scoped to (startup, organization)
/// 5. Re-read and compare
/// 6. Match: confirmed. Mismatch or error: roll the local view back and
///    report, preserving the original error message for diagnostics.
pub async fn transition_status<S: StartupStore + ?Sized>(
    store: &S,
    view: &ViewerState,
    startup_id: &str,
    new_status: StartupStatus,
    ctx: &OrgContext,
) -> Result<StartupStatus, DealError> {
    match store.owning_org(startup_id).await? {
        Some(owner) if owner == ctx.organization_id => {}
        Some(_) => {
            return Err(DealError::AccessDenied(format!(
                "startup {} belongs to a different organization",
                startup_id
            )))
        }
        None => {
            return Err(DealError::AccessDenied(format!(
                "unknown startup {}",
                startup_id
            )))
        }
    }

    let previous = view.status_of(startup_id);
    view.apply_status(startup_id, new_status);

    if let Err(e) = store
        .write_status(startup_id, &ctx.organization_id, new_status)
        .await
    {
        view.restore_status(startup_id, previous);
        log::warn!(
            "status write failed for startup {}, rolled back to {:?}: {}",
            startup_id,
            previous,
            e
        );
        return Err(e.into());
    }

    let confirmed = match store.read_status(startup_id).await {
        Ok(status) => status,
        Err(e) => {
            view.restore_status(startup_id, previous);
            log::warn!(
                "status verify read failed for startup {}, rolled back: {}",
                startup_id,
                e
            );
            return Err(e.into());
        }
    };

    if confirmed == Some(new_status) {
        Ok(new_status)
    } else {
        view.restore_status(startup_id, previous);
        let actual = confirmed
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| "missing".to_string());
        log::warn!(
            "status verification failed for startup {}: wrote {}, store has {}",
            startup_id,
            new_status,
            actual
        );
        Err(DealError::VerificationFailed {
            submitted: new_status,
            actual,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_org, sample_startup, test_db};

    fn ctx(org: &str) -> OrgContext {
        OrgContext {
            organization_id: org.to_string(),
            organization_name: format!("{} Capital", org),
            user_id: Some("u1".to_string()),
        }
    }

    /// Store fake that accepts writes but never persists them, like a
    /// permission policy silently filtering the UPDATE.
    struct SilentNoOpStore {
        org: String,
        status: StartupStatus,
        writes: Mutex<usize>,
    }

    #[async_trait]
    impl StartupStore for SilentNoOpStore {
        async fn owning_org(&self, _startup_id: &str) -> Result<Option<String>, DbError> {
            Ok(Some(self.org.clone()))
        }

        async fn write_status(
            &self,
            _startup_id: &str,
            _organization_id: &str,
            _status: StartupStatus,
        ) -> Result<(), DbError> {
            let mut writes = self.writes.lock().unwrap();
            *writes += 1;
            Ok(())
        }

        async fn read_status(&self, _startup_id: &str) -> Result<Option<StartupStatus>, DbError> {
            Ok(Some(self.status))
        }
    }

    /// Store fake whose write step errors outright.
    struct ErroringStore {
        org: String,
    }

    #[async_trait]
    impl StartupStore for ErroringStore {
        async fn owning_org(&self, _startup_id: &str) -> Result<Option<String>, DbError> {
            Ok(Some(self.org.clone()))
        }

        async fn write_status(
            &self,
            _startup_id: &str,
            _organization_id: &str,
            _status: StartupStatus,
        ) -> Result<(), DbError> {
            Err(DbError::StartupNotFound("gone".to_string()))
        }

        async fn read_status(&self, _startup_id: &str) -> Result<Option<StartupStatus>, DbError> {
            unreachable!("read must not run after a failed write")
        }
    }

    #[tokio::test]
    async fn test_transition_confirmed_on_matching_reread() {
        let db = test_db();
        db.upsert_organization(&sample_org("org-a")).unwrap();
        let mut startup = sample_startup("s1", "org-a");
        startup.status = StartupStatus::Saved;
        db.insert_startup(&startup).unwrap();
        db.update_startup_status("s1", "org-a", StartupStatus::Saved)
            .unwrap();

        let store = Mutex::new(db);
        let view = ViewerState::new();
        view.load_statuses([("s1".to_string(), StartupStatus::Saved)]);

        let confirmed =
            transition_status(&store, &view, "s1", StartupStatus::Approved, &ctx("org-a"))
                .await
                .unwrap();
        assert_eq!(confirmed, StartupStatus::Approved);
        assert_eq!(view.status_of("s1"), Some(StartupStatus::Approved));

        let persisted = store.lock().unwrap().get_startup("s1").unwrap().unwrap();
        assert_eq!(persisted.status, StartupStatus::Approved);
    }

    #[tokio::test]
    async fn test_silent_noop_write_rolls_back() {
        let store = SilentNoOpStore {
            org: "org-a".to_string(),
            status: StartupStatus::Saved,
            writes: Mutex::new(0),
        };
        let view = ViewerState::new();
        view.load_statuses([("s1".to_string(), StartupStatus::Saved)]);

        let err = transition_status(&store, &view, "s1", StartupStatus::Approved, &ctx("org-a"))
            .await
            .unwrap_err();

        match err {
            DealError::VerificationFailed { submitted, actual } => {
                assert_eq!(submitted, StartupStatus::Approved);
                assert_eq!(actual, "saved");
            }
            other => panic!("expected VerificationFailed, got {:?}", other),
        }
        // Local view restored to the pre-call value
        assert_eq!(view.status_of("s1"), Some(StartupStatus::Saved));
        assert_eq!(*store.writes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_write_error_rolls_back_and_preserves_message() {
        let store = ErroringStore {
            org: "org-a".to_string(),
        };
        let view = ViewerState::new();
        view.load_statuses([("s1".to_string(), StartupStatus::Active)]);

        let err = transition_status(&store, &view, "s1", StartupStatus::Declined, &ctx("org-a"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("gone"));
        assert_eq!(view.status_of("s1"), Some(StartupStatus::Active));
    }

    #[tokio::test]
    async fn test_cross_tenant_transition_makes_no_write() {
        let db = test_db();
        db.upsert_organization(&sample_org("org-a")).unwrap();
        db.upsert_organization(&sample_org("org-b")).unwrap();
        db.insert_startup(&sample_startup("s1", "org-b")).unwrap();

        let store = Mutex::new(db);
        let view = ViewerState::new();

        let err = transition_status(&store, &view, "s1", StartupStatus::Approved, &ctx("org-a"))
            .await
            .unwrap_err();
        assert!(matches!(err, DealError::AccessDenied(_)));

        // Neither local view nor store touched
        assert_eq!(view.status_of("s1"), None);
        let persisted = store.lock().unwrap().get_startup("s1").unwrap().unwrap();
        assert_eq!(persisted.status, StartupStatus::Active);
    }

    #[tokio::test]
    async fn test_rollback_removes_entry_unknown_before_call() {
        let store = SilentNoOpStore {
            org: "org-a".to_string(),
            status: StartupStatus::Saved,
            writes: Mutex::new(0),
        };
        let view = ViewerState::new(); // s1 not loaded locally

        let _ = transition_status(&store, &view, "s1", StartupStatus::Approved, &ctx("org-a"))
            .await
            .unwrap_err();
        assert_eq!(view.status_of("s1"), None);
    }
}
