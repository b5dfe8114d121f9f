// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity provider capability.
//!
//! Exactly one implementation is active per process, selected by
//! configuration:
//!
//! - [`JwksProvider`]: OIDC-style ID tokens verified against the provider's
//!   published JWKS (RS256/ES256). Used in production.
//! - [`SharedSecretProvider`]: HS256 tokens signed with a shared secret.
//!   Used for local development and tests.
//!
//! Errors stay in [`ProviderError`]; the Token Verifier translates them into
//! the [`AuthError`](super::AuthError) taxonomy.

use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{Map, Value};

use super::jwks::JwksManager;

/// Clock skew tolerance in seconds.
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// Identity provider errors.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("malformed credential")]
    Malformed,

    #[error("credential expired")]
    Expired,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("claim validation failed: {0}")]
    InvalidClaims(&'static str),

    #[error("no matching signing key")]
    NoMatchingKey,

    #[error("key fetch failed: {0}")]
    KeyFetch(String),

    #[error("identity provider timed out")]
    Timeout,

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("failed to sign credential: {0}")]
    Signing(String),
}

impl ProviderError {
    /// The credential itself was unparseable, as opposed to rejected.
    pub fn is_malformed(&self) -> bool {
        matches!(self, ProviderError::Malformed)
    }

    /// The provider could not be reached or answered out of time.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ProviderError::KeyFetch(_) | ProviderError::Timeout)
    }
}

fn map_jwt_error(e: jsonwebtoken::errors::Error) -> ProviderError {
    match e.kind() {
        ErrorKind::ExpiredSignature => ProviderError::Expired,
        ErrorKind::InvalidSignature => ProviderError::InvalidSignature,
        ErrorKind::InvalidIssuer => ProviderError::InvalidClaims("iss"),
        ErrorKind::InvalidAudience => ProviderError::InvalidClaims("aud"),
        ErrorKind::ImmatureSignature => ProviderError::InvalidClaims("nbf"),
        ErrorKind::MissingRequiredClaim(_) => ProviderError::InvalidClaims("required claim"),
        ErrorKind::InvalidAlgorithm => ProviderError::InvalidClaims("alg"),
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => ProviderError::Malformed,
        _ => ProviderError::InvalidSignature,
    }
}

/// Verify and mint identity credentials.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Short name for logs and health output.
    fn name(&self) -> &'static str;

    /// Verify a credential and return its claim set.
    async fn verify_credential(&self, credential: &str) -> Result<Map<String, Value>, ProviderError>;

    /// Mint a credential for `subject` carrying `claims`.
    ///
    /// Only providers holding a signing key can do this.
    async fn mint_credential(
        &self,
        subject: &str,
        claims: Map<String, Value>,
        ttl: Duration,
    ) -> Result<String, ProviderError>;

    /// Readiness check.
    async fn check_ready(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

fn base_validation(algorithm: Algorithm, issuer: Option<&str>, audience: Option<&str>) -> Validation {
    let mut validation = Validation::new(algorithm);
    validation.leeway = CLOCK_SKEW_LEEWAY;
    validation.set_required_spec_claims(&["exp"]);

    if let Some(iss) = issuer {
        validation.set_issuer(&[iss]);
    }
    match audience {
        Some(aud) => validation.set_audience(&[aud]),
        None => validation.validate_aud = false,
    }
    validation
}

// =============================================================================
// JWKS
// =============================================================================

/// ID tokens signed by an external OIDC provider.
pub struct JwksProvider {
    jwks: JwksManager,
    issuer: Option<String>,
    audience: Option<String>,
}

impl JwksProvider {
    pub fn new(jwks: JwksManager, issuer: Option<String>, audience: Option<String>) -> Self {
        Self {
            jwks,
            issuer,
            audience,
        }
    }
}

#[async_trait]
impl IdentityProvider for JwksProvider {
    fn name(&self) -> &'static str {
        "jwks"
    }

    async fn verify_credential(&self, credential: &str) -> Result<Map<String, Value>, ProviderError> {
        let header = decode_header(credential).map_err(|_| ProviderError::Malformed)?;

        let (decoding_key, algorithm) = match &header.kid {
            Some(kid) => self.jwks.get_decoding_key(kid).await?,
            None => self.jwks.get_any_decoding_key().await?,
        };

        let validation = base_validation(algorithm, self.issuer.as_deref(), self.audience.as_deref());
        let data = decode::<Map<String, Value>>(credential, &decoding_key, &validation)
            .map_err(map_jwt_error)?;

        Ok(data.claims)
    }

    async fn mint_credential(
        &self,
        _subject: &str,
        _claims: Map<String, Value>,
        _ttl: Duration,
    ) -> Result<String, ProviderError> {
        Err(ProviderError::Unsupported(
            "JWKS provider holds no signing key".to_string(),
        ))
    }

    async fn check_ready(&self) -> Result<(), ProviderError> {
        if self.jwks.is_cached().await {
            return Ok(());
        }
        self.jwks.refresh().await
    }
}

// =============================================================================
// Shared secret
// =============================================================================

/// HS256 tokens signed with a secret shared with the caller.
pub struct SharedSecretProvider {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: Option<String>,
    audience: Option<String>,
}

impl SharedSecretProvider {
    pub fn new(secret: &[u8], issuer: Option<String>, audience: Option<String>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer,
            audience,
        }
    }
}

#[async_trait]
impl IdentityProvider for SharedSecretProvider {
    fn name(&self) -> &'static str {
        "shared_secret"
    }

    async fn verify_credential(&self, credential: &str) -> Result<Map<String, Value>, ProviderError> {
        let validation = base_validation(
            Algorithm::HS256,
            self.issuer.as_deref(),
            self.audience.as_deref(),
        );
        let data = decode::<Map<String, Value>>(credential, &self.decoding_key, &validation)
            .map_err(map_jwt_error)?;
        Ok(data.claims)
    }

    async fn mint_credential(
        &self,
        subject: &str,
        mut claims: Map<String, Value>,
        ttl: Duration,
    ) -> Result<String, ProviderError> {
        let now = chrono::Utc::now().timestamp();
        claims.insert("sub".into(), Value::from(subject));
        claims.insert("iat".into(), Value::from(now));
        claims.insert("exp".into(), Value::from(now + ttl.as_secs() as i64));
        if let Some(iss) = &self.issuer {
            claims.insert("iss".into(), Value::from(iss.as_str()));
        }
        if let Some(aud) = &self.audience {
            claims.insert("aud".into(), Value::from(aud.as_str()));
        }

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ProviderError::Signing(e.to_string()))
    }
}
