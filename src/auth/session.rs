// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session Issuer.
//!
//! Mints the first-party session artifact: an HS256-signed token carried in
//! the `__session` cookie. The token embeds the canonical role and company ID
//! so later requests are authorized without calling the identity provider.
//!
//! Cookie reads and writes go through an explicit [`CookieJar`] passed in by
//! the caller; nothing here touches a response directly.
//!
//! Sessions are never mutated in place, only reissued.

use std::time::Duration;

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::claims::{AuthenticatedUser, CredentialKind, DecodedClaims};
use super::error::AuthError;
use super::roles::Role;

/// Session cookie name.
pub const SESSION_COOKIE: &str = "__session";

/// Refresh-token cookie name.
pub const REFRESH_COOKIE: &str = "refresh_token";

/// `iss` of every session token minted here.
const SESSION_ISSUER: &str = "benefits-auth-server";

/// `aud` of every session token; keeps ID tokens and sessions from being
/// interchangeable even if a secret were shared.
const SESSION_AUDIENCE: &str = "session";

/// Identity a session (or refresh token) is minted for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdentity {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<String>,
}

impl From<&AuthenticatedUser> for SessionIdentity {
    fn from(user: &AuthenticatedUser) -> Self {
        Self {
            user_id: user.user_id.clone(),
            email: user.email.clone(),
            role: user.role,
            company_id: user.company_id.clone(),
        }
    }
}

/// Claims carried by the session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl SessionClaims {
    /// Feed session claims into the shared claim-normalization path.
    pub fn into_decoded(self) -> DecodedClaims {
        DecodedClaims {
            kind: CredentialKind::SessionCookie,
            subject: self.sub,
            email: self.email,
            role_claim: Some(self.role.as_str().to_string()),
            tenant_claim: self.cid,
            expires_at: self.exp,
            issuer: Some(self.iss),
            session_id: Some(self.jti),
        }
    }
}

/// Result of a successful issuance.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub session_id: String,
    pub expires_at: i64,
}

/// Session Issuer.
pub struct SessionIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    session_ttl: Duration,
    refresh_ttl: Duration,
    secure_cookies: bool,
}

impl SessionIssuer {
    /// # Arguments
    /// - `secret`: HMAC key for session tokens
    /// - `session_ttl`: session cookie lifetime
    /// - `refresh_ttl`: refresh cookie lifetime
    /// - `secure_cookies`: set `Secure` on cookies (production)
    pub fn new(secret: &[u8], session_ttl: Duration, refresh_ttl: Duration, secure_cookies: bool) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            session_ttl,
            refresh_ttl,
            secure_cookies,
        }
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Mint a session token and add the session cookie to `jar`.
    ///
    /// On failure the jar is dropped untouched, so no cookie is set.
    pub fn issue_session(
        &self,
        jar: CookieJar,
        identity: &SessionIdentity,
    ) -> Result<(CookieJar, IssuedSession), AuthError> {
        let now = chrono::Utc::now().timestamp();
        let claims = SessionClaims {
            sub: identity.user_id.clone(),
            email: identity.email.clone(),
            role: identity.role,
            cid: identity.company_id.clone(),
            iss: SESSION_ISSUER.to_string(),
            aud: SESSION_AUDIENCE.to_string(),
            iat: now,
            exp: now + self.session_ttl.as_secs() as i64,
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(|e| {
            tracing::error!(error = %e, user_id = %identity.user_id, "Failed to sign session token");
            AuthError::SessionIssuanceFailed
        })?;

        let jar = jar.add(self.cookie(SESSION_COOKIE, token, self.session_ttl));
        Ok((
            jar,
            IssuedSession {
                session_id: claims.jti,
                expires_at: claims.exp,
            },
        ))
    }

    /// Clear the session cookie. Idempotent.
    pub fn destroy_session(&self, jar: CookieJar) -> CookieJar {
        jar.add(self.expired_cookie(SESSION_COOKIE))
    }

    /// Add the refresh-token cookie.
    pub fn set_refresh_cookie(&self, jar: CookieJar, token: String) -> CookieJar {
        jar.add(self.cookie(REFRESH_COOKIE, token, self.refresh_ttl))
    }

    /// Clear the refresh-token cookie. Idempotent.
    pub fn clear_refresh_cookie(&self, jar: CookieJar) -> CookieJar {
        jar.add(self.expired_cookie(REFRESH_COOKIE))
    }

    /// Decode and validate a session token.
    pub fn decode_session(&self, token: &str) -> Result<SessionClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[SESSION_ISSUER]);
        validation.set_audience(&[SESSION_AUDIENCE]);

        decode::<SessionClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Utf8(_) => {
                    AuthError::InvalidCredential
                }
                _ => AuthError::ExpiredOrInvalid,
            })
    }

    fn cookie(&self, name: &'static str, value: String, ttl: Duration) -> Cookie<'static> {
        Cookie::build((name, value))
            .path("/")
            .http_only(true)
            .secure(self.secure_cookies)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::seconds(ttl.as_secs() as i64))
            .build()
    }

    fn expired_cookie(&self, name: &'static str) -> Cookie<'static> {
        Cookie::build((name, ""))
            .path("/")
            .http_only(true)
            .secure(self.secure_cookies)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::ZERO)
            .expires(OffsetDateTime::UNIX_EPOCH)
            .build()
    }
}
