// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Tenant-scoped employee management.
//!
//! Every operation runs inside [`gate::guarded`], so nothing below the gate
//! executes for an unauthenticated or under-privileged caller.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::auth::gate::{self, Policy};
use crate::auth::rate_limit::ClientIp;
use crate::auth::resolver::resolve_role;
use crate::auth::{AuthenticatedUser, Role};
use crate::error::ApiError;
use crate::state::AppState;
use crate::storage::{AuditEvent, AuditEventType, DirectoryUser};

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangeRoleRequest {
    /// Requested role (any accepted spelling)
    pub role: String,
}

/// Directory row of `user_id`, only if it belongs to `company_id`.
///
/// Users of other companies read as absent so ids cannot be enumerated across
/// tenants.
async fn find_employee(
    state: &AppState,
    company_id: &str,
    user_id: &str,
) -> Result<DirectoryUser, ApiError> {
    state
        .directory
        .find(user_id)
        .await?
        .filter(|row| row.company_id.as_deref() == Some(company_id))
        .ok_or_else(|| ApiError::not_found("Employee not found"))
}

async fn audit_denial(
    state: &AppState,
    actor: Option<&AuthenticatedUser>,
    ip: &str,
    resource: &str,
    error: &ApiError,
) {
    if error.status != StatusCode::FORBIDDEN {
        return;
    }
    let mut event = AuditEvent::new(AuditEventType::PermissionDenied)
        .with_ip(ip)
        .with_resource("employee", resource)
        .failed("forbidden");
    if let Some(actor) = actor {
        event = event
            .with_user(actor.user_id.clone())
            .with_company(actor.company_id.clone());
    }
    state.audit.record(event).await;
}

/// Deactivate an employee and revoke their refresh tokens.
///
/// Requires `hr_admin` or above in the same company. Callers cannot
/// deactivate themselves or anyone who outranks them.
#[utoipa::path(
    post,
    path = "/companies/{company_id}/employees/{user_id}/deactivate",
    tag = "Employees",
    params(
        ("company_id" = String, Path, description = "Owning company"),
        ("user_id" = String, Path, description = "Employee to deactivate")
    ),
    security(("session" = []), ("bearer" = [])),
    responses(
        (status = 200, description = "Employee deactivated", body = DirectoryUser),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Employee not found")
    )
)]
pub async fn deactivate_employee(
    State(state): State<AppState>,
    Path((company_id, user_id)): Path<(String, String)>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
) -> Result<Json<DirectoryUser>, ApiError> {
    let session = state.verifier.authenticate_request(&headers).await;
    let actor = session.as_ref().ok().cloned();

    let result: Result<Json<DirectoryUser>, ApiError> = gate::guarded(session, &Policy::MinRole(Role::HrAdmin), |actor| {
        let state = state.clone();
        let (company_id, user_id, ip) = (company_id.clone(), user_id.clone(), ip.clone());
        async move {
            gate::require_same_tenant(&actor, &company_id)?;
            gate::forbid_self_action(&actor, &user_id)?;

            let target = find_employee(&state, &company_id, &user_id).await?;
            gate::require_rank_over(&actor, resolve_role(target.role.as_deref()))?;

            let updated = state.directory.set_active(&user_id, false).await?;
            let revoked = state.refresh_tokens.revoke_all(&user_id).await?;

            state
                .audit
                .record(
                    AuditEvent::new(AuditEventType::AccountDeactivated)
                        .with_user(actor.user_id.clone())
                        .with_company(Some(company_id))
                        .with_resource("employee", user_id)
                        .with_ip(ip)
                        .with_details(serde_json::json!({ "revoked_tokens": revoked })),
                )
                .await;

            Ok(Json(updated))
        }
    })
    .await;

    if let Err(error) = &result {
        audit_denial(&state, actor.as_ref(), &ip, &user_id, error).await;
    }
    result
}

/// Change an employee's role.
///
/// Requires `company_admin` or above in the same company. Nobody can grant a
/// role above their own or change their own role.
#[utoipa::path(
    put,
    path = "/companies/{company_id}/employees/{user_id}/role",
    tag = "Employees",
    params(
        ("company_id" = String, Path, description = "Owning company"),
        ("user_id" = String, Path, description = "Employee whose role changes")
    ),
    request_body = ChangeRoleRequest,
    security(("session" = []), ("bearer" = [])),
    responses(
        (status = 200, description = "Role changed", body = DirectoryUser),
        (status = 400, description = "Unknown role"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Employee not found")
    )
)]
pub async fn change_role(
    State(state): State<AppState>,
    Path((company_id, user_id)): Path<(String, String)>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    body: Result<Json<ChangeRoleRequest>, JsonRejection>,
) -> Result<Json<DirectoryUser>, ApiError> {
    let session = state.verifier.authenticate_request(&headers).await;
    let actor = session.as_ref().ok().cloned();

    let result: Result<Json<DirectoryUser>, ApiError> = gate::guarded(session, &Policy::MinRole(Role::CompanyAdmin), |actor| {
        let state = state.clone();
        let (company_id, user_id, ip) = (company_id.clone(), user_id.clone(), ip.clone());
        async move {
            let Json(body) = body.map_err(|_| ApiError::bad_request("role is required"))?;
            let requested =
                Role::parse(&body.role).ok_or_else(|| ApiError::bad_request("Unknown role"))?;

            gate::require_same_tenant(&actor, &company_id)?;
            let target = find_employee(&state, &company_id, &user_id).await?;
            let current = resolve_role(target.role.as_deref());
            gate::guard_role_change(&actor, &user_id, current, requested)?;

            let updated = state.directory.set_role(&user_id, requested).await?;

            state
                .audit
                .record(
                    AuditEvent::new(AuditEventType::RoleChanged)
                        .with_user(actor.user_id.clone())
                        .with_company(Some(company_id))
                        .with_resource("employee", user_id)
                        .with_ip(ip)
                        .with_details(serde_json::json!({
                            "from": current.as_str(),
                            "to": requested.as_str(),
                        })),
                )
                .await;

            Ok(Json(updated))
        }
    })
    .await;

    if let Err(error) = &result {
        audit_denial(&state, actor.as_ref(), &ip, &user_id, error).await;
    }
    result
}
