//! Tenant access validation.
//!
//! Every privileged operation (dispatch, status mutation, upload) calls
//! `validate_access` first. The check fails closed: no resolvable actor
//! organization, unknown startup, or organization mismatch all return
//! `AccessDenied` before any network call or write happens.

use crate::db::DealDb;
use crate::error::DealError;
use crate::types::OrgContext;

/// Assert that `startup_id` belongs to the actor's organization.
///
/// Returns the resolved `OrgContext` on success. No side effects.
pub fn validate_access(
    db: &DealDb,
    actor_org_id: Option<&str>,
    actor_user_id: Option<&str>,
    startup_id: &str,
) -> Result<OrgContext, DealError> {
    let actor_org_id = actor_org_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| DealError::AccessDenied("no organization context".to_string()))?;

    let startup = db
        .get_startup(startup_id)?
        .ok_or_else(|| DealError::AccessDenied(format!("unknown startup {}", startup_id)))?;

    if startup.organization_id != actor_org_id {
        log::warn!(
            "access denied: actor org {} does not own startup {}",
            actor_org_id,
            startup_id
        );
        return Err(DealError::AccessDenied(format!(
            "startup {} belongs to a different organization",
            startup_id
        )));
    }

    let org_name = db
        .get_organization(actor_org_id)?
        .map(|org| org.name)
        .unwrap_or_else(|| actor_org_id.to_string());

    Ok(OrgContext {
        organization_id: actor_org_id.to_string(),
        organization_name: org_name,
        user_id: actor_user_id.map(String::from),
    })
}
