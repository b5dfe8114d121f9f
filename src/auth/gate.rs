// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Access Control Gate.
//!
//! Policy checks run strictly after verification and role resolution, and a
//! guarded operation runs only once every check has allowed it. Denials
//! never execute any part of the operation.
//!
//! - [`authorize`]: minimum role or exact role set
//! - [`require_same_tenant`]: caller's company must own the resource
//! - [`forbid_self_action`]: operations that may not target the caller
//! - [`guard_role_change`]: no granting above one's own role
//! - [`guarded`]: authenticate-authorize-run in one step

use std::future::Future;

use super::claims::AuthenticatedUser;
use super::error::{AuthError, ForbiddenReason};
use super::roles::Role;

/// Role requirement of a protected operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Role at or above the given one
    MinRole(Role),
    /// Exactly one of the listed roles
    AnyOf(&'static [Role]),
}

impl Policy {
    pub fn allows(&self, role: Role) -> bool {
        match self {
            Policy::MinRole(min) => role.has_privilege(*min),
            Policy::AnyOf(roles) => roles.contains(&role),
        }
    }
}

/// Platform-scoped roles only.
pub const PLATFORM_OPERATORS: Policy = Policy::AnyOf(&[Role::PlatformAdmin, Role::SuperAdmin]);

/// Check the caller's role against `policy`.
pub fn authorize(user: &AuthenticatedUser, policy: &Policy) -> Result<(), AuthError> {
    if policy.allows(user.role) {
        Ok(())
    } else {
        Err(AuthError::Forbidden(ForbiddenReason::InsufficientRole))
    }
}

/// The caller must belong to `company_id`.
///
/// Anyone with a company is bound to it whatever their role. Only platform
/// operators without a company act across tenants.
pub fn require_same_tenant(user: &AuthenticatedUser, company_id: &str) -> Result<(), AuthError> {
    if user.is_platform_operator() || user.company_id.as_deref() == Some(company_id) {
        Ok(())
    } else {
        Err(AuthError::Forbidden(ForbiddenReason::TenantMismatch))
    }
}

/// Deny operations where the caller targets themselves.
pub fn forbid_self_action(actor: &AuthenticatedUser, target_user_id: &str) -> Result<(), AuthError> {
    if actor.user_id == target_user_id {
        Err(AuthError::Forbidden(ForbiddenReason::SelfAction))
    } else {
        Ok(())
    }
}

/// The caller may only act on users ranked strictly below them; peers of
/// equal rank are off limits.
pub fn require_rank_over(actor: &AuthenticatedUser, target_role: Role) -> Result<(), AuthError> {
    if actor.role.rank() > target_role.rank() {
        Ok(())
    } else {
        Err(AuthError::Forbidden(ForbiddenReason::InsufficientRole))
    }
}

/// Validate changing `target_user_id` from `current` to `requested`.
///
/// Own role changes are refused outright (which covers self-demotion);
/// nobody can grant a role above their own or touch a peer or superior.
pub fn guard_role_change(
    actor: &AuthenticatedUser,
    target_user_id: &str,
    current: Role,
    requested: Role,
) -> Result<(), AuthError> {
    forbid_self_action(actor, target_user_id)?;
    require_rank_over(actor, current)?;
    if !actor.role.has_privilege(requested) {
        return Err(AuthError::Forbidden(ForbiddenReason::RoleEscalation));
    }
    Ok(())
}

/// Run `op` only if `session` is authenticated and satisfies `policy`.
///
/// ```rust,ignore
/// let session = state.verifier.authenticate_request(&headers).await;
/// gate::guarded(session, &Policy::MinRole(Role::HrAdmin), |actor| async move {
///     // runs only after an allow decision
/// })
/// .await
/// ```
pub async fn guarded<T, E, F, Fut>(
    session: Result<AuthenticatedUser, AuthError>,
    policy: &Policy,
    op: F,
) -> Result<T, E>
where
    E: From<AuthError>,
    F: FnOnce(AuthenticatedUser) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let user = session?;
    authorize(&user, policy)?;
    op(user).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::CredentialKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn user(user_id: &str, role: Role, company: Option<&str>) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: user_id.into(),
            email: None,
            role,
            company_id: company.map(str::to_string),
            session_id: None,
            expires_at: 0,
            via: CredentialKind::SessionCookie,
        }
    }

    #[test]
    fn min_role_policy() {
        let policy = Policy::MinRole(Role::HrAdmin);
        assert!(authorize(&user("a", Role::HrAdmin, None), &policy).is_ok());
        assert!(authorize(&user("a", Role::SuperAdmin, None), &policy).is_ok());
        assert!(matches!(
            authorize(&user("a", Role::Employee, None), &policy),
            Err(AuthError::Forbidden(ForbiddenReason::InsufficientRole))
        ));
    }

    #[test]
    fn exact_set_policy_ignores_hierarchy() {
        let policy = Policy::AnyOf(&[Role::HrAdmin]);
        assert!(authorize(&user("a", Role::HrAdmin, None), &policy).is_ok());
        assert!(authorize(&user("a", Role::CompanyAdmin, None), &policy).is_err());

        assert!(authorize(&user("a", Role::PlatformAdmin, None), &PLATFORM_OPERATORS).is_ok());
        assert!(authorize(&user("a", Role::CompanyAdmin, None), &PLATFORM_OPERATORS).is_err());
    }

    #[test]
    fn company_admin_cannot_cross_tenants() {
        let admin_a = user("admin", Role::CompanyAdmin, Some("company-a"));
        assert!(require_same_tenant(&admin_a, "company-a").is_ok());
        assert!(matches!(
            require_same_tenant(&admin_a, "company-b"),
            Err(AuthError::Forbidden(ForbiddenReason::TenantMismatch))
        ));
    }

    #[test]
    fn platform_roles_with_a_company_are_still_bound() {
        let pinned = user("ops", Role::SuperAdmin, Some("company-a"));
        assert!(require_same_tenant(&pinned, "company-b").is_err());

        let operator = user("ops", Role::SuperAdmin, None);
        assert!(require_same_tenant(&operator, "company-b").is_ok());

        // No company and no platform role is not a free pass.
        let orphan = user("x", Role::CompanyAdmin, None);
        assert!(require_same_tenant(&orphan, "company-a").is_err());
    }

    #[test]
    fn self_action_is_denied() {
        let admin = user("admin", Role::CompanyAdmin, Some("a"));
        assert!(matches!(
            forbid_self_action(&admin, "admin"),
            Err(AuthError::Forbidden(ForbiddenReason::SelfAction))
        ));
        assert!(forbid_self_action(&admin, "someone-else").is_ok());
    }

    #[test]
    fn role_change_rules() {
        let admin = user("admin", Role::CompanyAdmin, Some("a"));

        assert!(guard_role_change(&admin, "e1", Role::Employee, Role::HrAdmin).is_ok());
        assert!(matches!(
            guard_role_change(&admin, "e1", Role::Employee, Role::SuperAdmin),
            Err(AuthError::Forbidden(ForbiddenReason::RoleEscalation))
        ));
        assert!(matches!(
            guard_role_change(&admin, "admin", Role::CompanyAdmin, Role::Employee),
            Err(AuthError::Forbidden(ForbiddenReason::SelfAction))
        ));
        assert!(matches!(
            guard_role_change(&admin, "boss", Role::PlatformAdmin, Role::Employee),
            Err(AuthError::Forbidden(ForbiddenReason::InsufficientRole))
        ));
        assert!(matches!(
            guard_role_change(&admin, "peer", Role::CompanyAdmin, Role::Employee),
            Err(AuthError::Forbidden(ForbiddenReason::InsufficientRole))
        ));
    }

    #[test]
    fn rank_guard_requires_strictly_higher_role() {
        let hr = user("hr", Role::HrAdmin, Some("a"));
        assert!(require_rank_over(&hr, Role::Employee).is_ok());
        assert!(require_rank_over(&hr, Role::HrAdmin).is_err());
        assert!(require_rank_over(&hr, Role::CompanyAdmin).is_err());
    }

    #[tokio::test]
    async fn guarded_op_never_runs_on_denial() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let policy = Policy::MinRole(Role::CompanyAdmin);

        let unauthenticated = guarded(Err(AuthError::Unauthorized), &policy, |_| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, AuthError>(())
        })
        .await;
        assert!(matches!(unauthenticated, Err(AuthError::Unauthorized)));

        let forbidden = guarded(Ok(user("e", Role::Employee, Some("a"))), &policy, |_| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, AuthError>(())
        })
        .await;
        assert!(matches!(forbidden, Err(AuthError::Forbidden(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let allowed = guarded(Ok(user("c", Role::CompanyAdmin, Some("a"))), &policy, |u| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, AuthError>(u.user_id)
        })
        .await;
        assert_eq!(allowed.unwrap(), "c");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
