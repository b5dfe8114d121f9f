// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication and authorization errors.
//!
//! Provider and store failures are translated into this taxonomy at the
//! boundary of each component. Client-facing messages are deliberately
//! generic; the detailed cause is only ever logged server-side.

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Why an authenticated caller was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForbiddenReason {
    /// Role does not satisfy the policy
    InsufficientRole,
    /// Resource belongs to another company
    TenantMismatch,
    /// Operation targets the caller themselves
    SelfAction,
    /// Requested role change exceeds the caller's own role
    RoleEscalation,
}

impl ForbiddenReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForbiddenReason::InsufficientRole => "insufficient_role",
            ForbiddenReason::TenantMismatch => "tenant_mismatch",
            ForbiddenReason::SelfAction => "self_action",
            ForbiddenReason::RoleEscalation => "role_escalation",
        }
    }
}

/// Authentication error type.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Credential absent, empty or structurally malformed
    #[error("invalid credential")]
    InvalidCredential,
    /// Identity provider rejected the credential (expired, bad signature, wrong issuer)
    #[error("credential expired or invalid")]
    ExpiredOrInvalid,
    /// No valid session on the request
    #[error("authentication required")]
    Unauthorized,
    /// Authenticated but not allowed
    #[error("forbidden: {}", .0.as_str())]
    Forbidden(ForbiddenReason),
    /// Session could not be minted from the presented credential
    #[error("session issuance failed")]
    SessionIssuanceFailed,
    /// Caller exceeded the rate limit for this endpoint class
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },
    /// A consumed refresh token was presented again
    #[error("refresh token reuse detected")]
    TokenReuseDetected,
    /// Store or other internal failure
    #[error("internal authentication error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: String,
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl AuthError {
    /// Stable error code for logs and audit records.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredential => "invalid_credential",
            AuthError::ExpiredOrInvalid => "expired_or_invalid",
            AuthError::Unauthorized => "unauthorized",
            AuthError::Forbidden(_) => "forbidden",
            AuthError::SessionIssuanceFailed => "session_issuance_failed",
            AuthError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            AuthError::TokenReuseDetected => "token_reuse_detected",
            AuthError::Internal(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredential
            | AuthError::ExpiredOrInvalid
            | AuthError::Unauthorized
            | AuthError::TokenReuseDetected => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden(_) => StatusCode::FORBIDDEN,
            AuthError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::SessionIssuanceFailed | AuthError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show to clients.
    ///
    /// Never distinguishes "unknown user" from "bad credential".
    pub fn public_message(&self) -> &'static str {
        match self {
            AuthError::InvalidCredential
            | AuthError::ExpiredOrInvalid
            | AuthError::TokenReuseDetected => "Invalid or expired credential",
            AuthError::Unauthorized => "Authentication required",
            AuthError::Forbidden(_) => "Forbidden",
            AuthError::SessionIssuanceFailed => "Failed to create session",
            AuthError::RateLimitExceeded { .. } => "Too many requests",
            AuthError::Internal(_) => "Internal server error",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Authentication failure");
        } else {
            tracing::debug!(error = %self, code = self.error_code(), "Request rejected");
        }

        let retry_after = match &self {
            AuthError::RateLimitExceeded { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };
        let body = Json(AuthErrorBody {
            error: self.public_message().to_string(),
            retry_after,
        });

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unauthorized_returns_401_with_generic_body() {
        let response = AuthError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = body_json(response).await;
        assert_eq!(body["error"], "Authentication required");
        assert!(body.get("retryAfter").is_none());
    }

    #[tokio::test]
    async fn forbidden_returns_403_without_reason() {
        let response = AuthError::Forbidden(ForbiddenReason::TenantMismatch).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body = body_json(response).await;
        assert_eq!(body["error"], "Forbidden");
    }

    #[tokio::test]
    async fn rate_limited_returns_429_with_retry_after() {
        let response = AuthError::RateLimitExceeded {
            retry_after_secs: 42,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "42");

        let body = body_json(response).await;
        assert_eq!(body["retryAfter"], 42);
    }

    #[tokio::test]
    async fn internal_errors_do_not_leak_details() {
        let response = AuthError::Internal("redb: table corrupted at page 7".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["error"], "Internal server error");
    }

    #[test]
    fn reuse_and_invalid_share_the_same_public_message() {
        assert_eq!(
            AuthError::TokenReuseDetected.public_message(),
            AuthError::ExpiredOrInvalid.public_message()
        );
    }
}
