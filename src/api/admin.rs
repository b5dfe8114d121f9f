// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Platform operator endpoints.
//!
//! Restricted to exactly `platform_admin` and `super_admin`; company-scoped
//! roles are refused however high they rank.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    auth::extractor::{Authorized, PlatformOperators},
    auth::rate_limit::ClientIp,
    error::ApiError,
    state::AppState,
    storage::{AuditEvent, AuditEventType, AuditQuery},
};

/// Query parameters for audit log queries.
#[derive(Debug, Deserialize, IntoParams)]
pub struct AuditQueryParams {
    /// Day to read (YYYY-MM-DD, default today).
    pub date: Option<String>,
    /// Filter by user ID.
    pub user_id: Option<String>,
    /// Filter by event type (e.g. `token_reuse_detected`).
    pub event_type: Option<String>,
    /// Maximum number of results (default 100, max 1000).
    pub limit: Option<usize>,
}

/// Response for audit log queries.
#[derive(Debug, Serialize, ToSchema)]
pub struct AuditLogResponse {
    /// Audit events matching the query, oldest first.
    pub events: Vec<AuditEvent>,
    /// Total count before the limit.
    pub total: usize,
    /// Whether there are more results.
    pub has_more: bool,
}

/// Query the security audit log.
#[utoipa::path(
    get,
    path = "/admin/audit",
    tag = "Admin",
    params(AuditQueryParams),
    security(("session" = []), ("bearer" = [])),
    responses(
        (status = 200, description = "Audit events", body = AuditLogResponse),
        (status = 400, description = "Invalid query parameters"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Platform operators only"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn query_audit_logs(
    Authorized(operator, _): Authorized<PlatformOperators>,
    ClientIp(ip): ClientIp,
    Query(params): Query<AuditQueryParams>,
    State(state): State<AppState>,
) -> Result<Json<AuditLogResponse>, ApiError> {
    let date = match params.date.as_deref() {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| ApiError::bad_request("Invalid date format. Use YYYY-MM-DD."))?,
        None => Utc::now().date_naive(),
    };

    let event_type = params
        .event_type
        .as_deref()
        .map(|raw| AuditEventType::parse(raw).ok_or_else(|| ApiError::bad_request("Unknown event_type")))
        .transpose()?;

    let query = AuditQuery {
        user_id: params.user_id.clone(),
        event_type,
    };
    let events = state.audit.read_events(date, &query).await?;

    let total = events.len();
    let limit = params.limit.unwrap_or(100).min(1000);
    let events: Vec<AuditEvent> = events.into_iter().take(limit).collect();

    state
        .audit
        .record(
            AuditEvent::new(AuditEventType::AdminAccess)
                .with_user(operator.user_id.clone())
                .with_company(operator.company_id.clone())
                .with_resource("audit_log", date.format("%Y-%m-%d").to_string())
                .with_ip(ip),
        )
        .await;

    Ok(Json(AuditLogResponse {
        has_more: total > events.len(),
        events,
        total,
    }))
}
