// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token Verifier.
//!
//! Two entry points share one normalization path:
//!
//! - `Authorization: Bearer <idToken>` (service-to-service, mobile)
//! - the httpOnly `__session` cookie (browser)
//!
//! Both produce [`DecodedClaims`], which then go through the directory lookup
//! and the role resolver, in that order.
//!
//! Every external call is bounded by a timeout. A timeout or an unreachable
//! provider fails closed with [`AuthError::Unauthorized`].

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header::AUTHORIZATION, HeaderMap};
use axum_extra::extract::cookie::CookieJar;

use super::claims::{AuthenticatedUser, CredentialKind, DecodedClaims};
use super::error::AuthError;
use super::provider::{IdentityProvider, ProviderError};
use super::resolver;
use super::session::{SessionIssuer, SESSION_COOKIE};
use crate::storage::directory::{DirectoryUser, UserDirectory};

/// Token Verifier.
#[derive(Clone)]
pub struct TokenVerifier {
    provider: Arc<dyn IdentityProvider>,
    sessions: Arc<SessionIssuer>,
    directory: Arc<dyn UserDirectory>,
    timeout: Duration,
}

impl TokenVerifier {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        sessions: Arc<SessionIssuer>,
        directory: Arc<dyn UserDirectory>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            sessions,
            directory,
            timeout,
        }
    }

    pub fn provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.provider
    }

    /// Verify a credential of the given kind. No side effects.
    pub async fn verify(&self, credential: &str, kind: CredentialKind) -> Result<DecodedClaims, AuthError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(AuthError::InvalidCredential);
        }

        match kind {
            CredentialKind::SessionCookie => Ok(self.sessions.decode_session(credential)?.into_decoded()),
            CredentialKind::IdToken => {
                let claims = tokio::time::timeout(self.timeout, self.provider.verify_credential(credential))
                    .await
                    .map_err(|_| {
                        tracing::warn!(provider = self.provider.name(), "Identity provider timed out");
                        AuthError::Unauthorized
                    })?
                    .map_err(|e| self.translate(e))?;

                DecodedClaims::from_provider_claims(CredentialKind::IdToken, &claims)
            }
        }
    }

    fn translate(&self, error: ProviderError) -> AuthError {
        if error.is_malformed() {
            AuthError::InvalidCredential
        } else if error.is_unavailable() {
            tracing::error!(provider = self.provider.name(), error = %error, "Identity provider unavailable");
            AuthError::Unauthorized
        } else {
            tracing::debug!(provider = self.provider.name(), error = %error, "Credential rejected");
            AuthError::ExpiredOrInvalid
        }
    }

    /// Directory row for `user_id`, bounded by the timeout. Failures are
    /// reported as `Unauthorized`.
    pub async fn lookup_directory(&self, user_id: &str) -> Result<Option<DirectoryUser>, AuthError> {
        tokio::time::timeout(self.timeout, self.directory.find(user_id))
            .await
            .map_err(|_| {
                tracing::warn!(user_id = %user_id, "Directory lookup timed out");
                AuthError::Unauthorized
            })?
            .map_err(|e| {
                tracing::error!(user_id = %user_id, error = %e, "Directory lookup failed");
                AuthError::Unauthorized
            })
    }

    /// Verify, consult the directory, then resolve role and tenant.
    pub async fn authenticate(&self, credential: &str, kind: CredentialKind) -> Result<AuthenticatedUser, AuthError> {
        let claims = self.verify(credential, kind).await?;
        let entry = self.lookup_directory(&claims.subject).await?;

        if entry.as_ref().is_some_and(|row| !row.active) {
            tracing::info!(user_id = %claims.subject, "Rejected deactivated user");
            return Err(AuthError::Unauthorized);
        }

        let resolved = resolver::resolve_with_directory(&claims, entry.as_ref());
        Ok(resolver::authenticated_user(claims, resolved))
    }

    /// Authenticate from the `Authorization: Bearer` header.
    pub async fn from_bearer(&self, headers: &HeaderMap) -> Result<Option<AuthenticatedUser>, AuthError> {
        let Some(value) = headers.get(AUTHORIZATION) else {
            return Ok(None);
        };
        let token = value
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(AuthError::InvalidCredential)?;

        self.authenticate(token, CredentialKind::IdToken).await.map(Some)
    }

    /// Authenticate from the session cookie.
    pub async fn from_cookies(&self, jar: &CookieJar) -> Result<Option<AuthenticatedUser>, AuthError> {
        match jar.get(SESSION_COOKIE) {
            Some(cookie) if !cookie.value().is_empty() => self
                .authenticate(cookie.value(), CredentialKind::SessionCookie)
                .await
                .map(Some),
            _ => Ok(None),
        }
    }

    /// Session cookie first, then bearer token. Neither present is `Unauthorized`.
    pub async fn authenticate_request(&self, headers: &HeaderMap) -> Result<AuthenticatedUser, AuthError> {
        let jar = CookieJar::from_headers(headers);
        if let Some(user) = self.from_cookies(&jar).await? {
            return Ok(user);
        }
        self.from_bearer(headers).await?.ok_or(AuthError::Unauthorized)
    }
}
