// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging for security-sensitive operations.
//!
//! Every event is emitted on the `security` tracing target and persisted to
//! the audit store. Persistence failures are logged and never fail the
//! request that produced the event.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::error::StoreResult;

/// Tracing target for security events.
pub const SECURITY_TARGET: &str = "security";

/// Types of auditable events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Session events
    SessionIssued,
    SessionDestroyed,

    // Auth events
    AuthFailure,
    PermissionDenied,
    RateLimited,

    // Refresh-token events
    RefreshRotated,
    RefreshRejected,
    TokenReuseDetected,
    TokensRevoked,

    // Directory events
    AccountDeactivated,
    RoleChanged,

    // Admin events
    AdminAccess,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::SessionIssued => "session_issued",
            AuditEventType::SessionDestroyed => "session_destroyed",
            AuditEventType::AuthFailure => "auth_failure",
            AuditEventType::PermissionDenied => "permission_denied",
            AuditEventType::RateLimited => "rate_limited",
            AuditEventType::RefreshRotated => "refresh_rotated",
            AuditEventType::RefreshRejected => "refresh_rejected",
            AuditEventType::TokenReuseDetected => "token_reuse_detected",
            AuditEventType::TokensRevoked => "tokens_revoked",
            AuditEventType::AccountDeactivated => "account_deactivated",
            AuditEventType::RoleChanged => "role_changed",
            AuditEventType::AdminAccess => "admin_access",
        }
    }

    /// Parse the snake_case name used in query strings.
    pub fn parse(value: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(value.to_string())).ok()
    }
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of event.
    pub event_type: AuditEventType,
    /// User who triggered the event (if known).
    pub user_id: Option<String>,
    /// Company the event belongs to (if known).
    pub company_id: Option<String>,
    /// Resource affected (user ID, session ID, etc.).
    pub resource_id: Option<String>,
    /// Resource type (user, session, etc.).
    pub resource_type: Option<String>,
    /// IP address of the request (if available).
    pub ip_address: Option<String>,
    /// Additional details as JSON.
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Error code if the operation failed.
    pub error: Option<String>,
}

impl AuditEvent {
    /// Create a new audit event.
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            user_id: None,
            company_id: None,
            resource_id: None,
            resource_type: None,
            ip_address: None,
            details: None,
            success: true,
            error: None,
        }
    }

    /// Set the user ID.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the company ID.
    pub fn with_company(mut self, company_id: Option<impl Into<String>>) -> Self {
        self.company_id = company_id.map(Into::into);
        self
    }

    /// Set the resource.
    pub fn with_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Set the IP address.
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    /// Add details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Mark as failed with an error code.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    /// Day bucket (`YYYY-MM-DD`) the event is stored under.
    pub fn day(&self) -> String {
        self.timestamp.format("%Y-%m-%d").to_string()
    }
}

/// Filters for reading audit events.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub user_id: Option<String>,
    pub event_type: Option<AuditEventType>,
}

impl AuditQuery {
    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.user_id
            .as_deref()
            .is_none_or(|user| event.user_id.as_deref() == Some(user))
            && self
                .event_type
                .is_none_or(|event_type| event.event_type == event_type)
    }
}

/// Persistence for audit events.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Append an event.
    async fn append(&self, event: &AuditEvent) -> StoreResult<()>;

    /// Events of one day, oldest first.
    async fn read_events(&self, date: NaiveDate, query: &AuditQuery) -> StoreResult<Vec<AuditEvent>>;

    /// Delete days strictly before `date`; returns events removed.
    async fn purge_before(&self, date: NaiveDate) -> StoreResult<usize>;
}

/// Security audit channel.
#[derive(Clone)]
pub struct AuditLog {
    repo: Arc<dyn AuditRepository>,
}

impl AuditLog {
    pub fn new(repo: Arc<dyn AuditRepository>) -> Self {
        Self { repo }
    }

    /// Emit on the `security` target and persist.
    pub async fn record(&self, event: AuditEvent) {
        let details = event
            .details
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default();

        if matches!(event.event_type, AuditEventType::TokenReuseDetected) || !event.success {
            tracing::warn!(
                target: SECURITY_TARGET,
                event_id = %event.event_id,
                event_type = event.event_type.as_str(),
                user_id = event.user_id.as_deref().unwrap_or("-"),
                company_id = event.company_id.as_deref().unwrap_or("-"),
                ip = event.ip_address.as_deref().unwrap_or("-"),
                error = event.error.as_deref().unwrap_or("-"),
                details = %details,
                "Security event"
            );
        } else {
            tracing::info!(
                target: SECURITY_TARGET,
                event_id = %event.event_id,
                event_type = event.event_type.as_str(),
                user_id = event.user_id.as_deref().unwrap_or("-"),
                company_id = event.company_id.as_deref().unwrap_or("-"),
                ip = event.ip_address.as_deref().unwrap_or("-"),
                details = %details,
                "Security event"
            );
        }

        if let Err(e) = self.repo.append(&event).await {
            tracing::error!(error = %e, event_id = %event.event_id, "Failed to persist audit event");
        }
    }

    pub async fn read_events(&self, date: NaiveDate, query: &AuditQuery) -> StoreResult<Vec<AuditEvent>> {
        self.repo.read_events(date, query).await
    }

    pub async fn purge_before(&self, date: NaiveDate) -> StoreResult<usize> {
        self.repo.purge_before(date).await
    }
}
