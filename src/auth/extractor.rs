// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for authenticated users.
//!
//! Use the `Auth` extractor in handlers to require authentication:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(user): Auth) -> impl IntoResponse {
//!     // user is AuthenticatedUser
//! }
//! ```
//!
//! and `Authorized<P>` to additionally enforce a role policy:
//!
//! ```rust,ignore
//! async fn audit(Authorized(user, _): Authorized<PlatformOperators>) -> impl IntoResponse {}
//! ```

use std::marker::PhantomData;

use axum::{
    extract::FromRequestParts,
    http::{header::ACCEPT, request::Parts, HeaderMap},
    response::{IntoResponse, Redirect, Response},
};

use super::gate::{self, Policy, PLATFORM_OPERATORS};
use super::{AuthError, AuthenticatedUser, Role};
use crate::state::AppState;
use crate::storage::audit::{AuditEvent, AuditEventType};

/// Rejection of the auth extractors.
///
/// Page navigations (`Accept: text/html`) that are unauthenticated get a
/// redirect to the sign-in page; everything else gets the JSON error.
#[derive(Debug)]
pub struct AuthRejection {
    pub error: AuthError,
    redirect_to: Option<String>,
}

impl AuthRejection {
    fn new(error: AuthError, headers: &HeaderMap, sign_in_path: &str) -> Self {
        let redirect_to = (error.status_code() == axum::http::StatusCode::UNAUTHORIZED
            && wants_html(headers))
        .then(|| sign_in_path.to_string());
        Self { error, redirect_to }
    }
}

fn wants_html(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"))
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self.redirect_to {
            Some(path) => {
                tracing::debug!(error = %self.error, "Redirecting page navigation to sign-in");
                Redirect::to(&path).into_response()
            }
            None => self.error.into_response(),
        }
    }
}

/// Extractor for authenticated users.
///
/// Accepts the `__session` cookie (browsers) or an `Authorization: Bearer`
/// ID token (services, mobile). If an earlier layer already put an
/// [`AuthenticatedUser`] in the request extensions, that is used as-is.
pub struct Auth(pub AuthenticatedUser);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        // First check if middleware already set the user
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>().cloned() {
            return Ok(Auth(user));
        }

        match state.verifier.authenticate_request(&parts.headers).await {
            Ok(user) => {
                parts.extensions.insert(user.clone());
                Ok(Auth(user))
            }
            Err(error) => {
                if matches!(error, AuthError::InvalidCredential | AuthError::ExpiredOrInvalid) {
                    state
                        .audit
                        .record(
                            AuditEvent::new(AuditEventType::AuthFailure)
                                .with_resource("route", parts.uri.path())
                                .failed(error.error_code()),
                        )
                        .await;
                }
                Err(AuthRejection::new(error, &parts.headers, &state.config.sign_in_path))
            }
        }
    }
}

/// Optional authentication extractor.
///
/// Returns `None` if no valid authentication is present, instead of rejecting.
pub struct OptionalAuth(pub Option<AuthenticatedUser>);

impl FromRequestParts<AppState> for OptionalAuth {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match Auth::from_request_parts(parts, state).await {
            Ok(Auth(user)) => Ok(OptionalAuth(Some(user))),
            Err(_) => Ok(OptionalAuth(None)),
        }
    }
}

/// A role policy usable as a type parameter.
pub trait RolePolicy: Send + Sync + 'static {
    const POLICY: Policy;
}

/// `hr_admin` and above.
pub struct HrAdminOrAbove;

impl RolePolicy for HrAdminOrAbove {
    const POLICY: Policy = Policy::MinRole(Role::HrAdmin);
}

/// `company_admin` and above.
pub struct CompanyAdminOrAbove;

impl RolePolicy for CompanyAdminOrAbove {
    const POLICY: Policy = Policy::MinRole(Role::CompanyAdmin);
}

/// Exactly `platform_admin` or `super_admin`.
pub struct PlatformOperators;

impl RolePolicy for PlatformOperators {
    const POLICY: Policy = PLATFORM_OPERATORS;
}

/// Extractor that requires the caller to satisfy `P`.
pub struct Authorized<P: RolePolicy>(pub AuthenticatedUser, pub PhantomData<P>);

impl<P: RolePolicy> FromRequestParts<AppState> for Authorized<P> {
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Auth(user) = Auth::from_request_parts(parts, state).await?;

        if let Err(error) = gate::authorize(&user, &P::POLICY) {
            state
                .audit
                .record(
                    AuditEvent::new(AuditEventType::PermissionDenied)
                        .with_user(user.user_id.clone())
                        .with_company(user.company_id.clone())
                        .with_resource("route", parts.uri.path())
                        .with_details(serde_json::json!({ "role": user.role.as_str() }))
                        .failed("insufficient_role"),
                )
                .await;
            return Err(AuthRejection::new(error, &parts.headers, &state.config.sign_in_path));
        }

        Ok(Authorized(user, PhantomData))
    }
}
