// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Decoded claims and authenticated user representation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use super::error::AuthError;
use super::resolver;
use super::roles::Role;

/// Which kind of credential was presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum CredentialKind {
    /// ID token issued by the external identity provider
    IdToken,
    /// First-party session cookie minted by this service
    SessionCookie,
}

/// Result of verifying a credential.
///
/// Ephemeral: recomputed on every verification, never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedClaims {
    /// Credential kind that produced these claims
    pub kind: CredentialKind,
    /// Subject (user ID)
    pub subject: String,
    /// Email address, if the provider asserted one
    pub email: Option<String>,
    /// Raw role claim, whichever historical key it was found under
    pub role_claim: Option<String>,
    /// Raw tenant (company) claim
    pub tenant_claim: Option<String>,
    /// Expiration (Unix timestamp)
    pub expires_at: i64,
    /// Issuer, if present
    pub issuer: Option<String>,
    /// Session ID (`jti` of a session cookie)
    pub session_id: Option<String>,
}

impl DecodedClaims {
    /// Build from the verified claim set of an ID token.
    ///
    /// Subject falls back through `sub`, `uid`, `user_id` and `oid` (Azure AD
    /// B2C object ID); email through `email`, `emails[0]` and
    /// `preferred_username`.
    pub fn from_provider_claims(
        kind: CredentialKind,
        claims: &Map<String, Value>,
    ) -> Result<Self, AuthError> {
        let subject = ["sub", "uid", "user_id", "oid"]
            .iter()
            .find_map(|key| non_empty_str(claims.get(*key)))
            .ok_or(AuthError::ExpiredOrInvalid)?;

        let email = non_empty_str(claims.get("email"))
            .or_else(|| {
                claims
                    .get("emails")
                    .and_then(Value::as_array)
                    .and_then(|emails| non_empty_str(emails.first()))
            })
            .or_else(|| non_empty_str(claims.get("preferred_username")));

        Ok(Self {
            kind,
            subject,
            email,
            role_claim: resolver::find_role_claim(claims),
            tenant_claim: resolver::find_tenant_claim(claims),
            expires_at: claims.get("exp").and_then(Value::as_i64).unwrap_or(0),
            issuer: non_empty_str(claims.get("iss")),
            session_id: non_empty_str(claims.get("jti")),
        })
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Authenticated user information resolved for a request.
///
/// This is the primary type used throughout the application to represent
/// the caller once the Token Verifier and Role Resolver have run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    /// Canonical user ID (provider subject)
    pub user_id: String,

    /// Email address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Canonical role
    pub role: Role,

    /// Company the user belongs to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_id: Option<String>,

    /// Session ID (if authenticated via session cookie)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Credential expiration (Unix timestamp)
    pub expires_at: i64,

    /// How the caller authenticated
    pub via: CredentialKind,
}

impl AuthenticatedUser {
    /// Check if the user has at least the required role.
    pub fn has_role(&self, required: Role) -> bool {
        self.role.has_privilege(required)
    }

    /// Platform operators act across companies; they hold a platform-scoped
    /// role and are not pinned to a company.
    pub fn is_platform_operator(&self) -> bool {
        self.role.is_platform_scoped() && self.company_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn extracts_standard_claims() {
        let map = claims(json!({
            "sub": "user_123",
            "email": "ana@acme.test",
            "exp": 1_900_000_000i64,
            "iss": "https://securetoken.google.com/benefits",
            "role": "hr_admin",
            "companyId": "acme"
        }));

        let decoded = DecodedClaims::from_provider_claims(CredentialKind::IdToken, &map).unwrap();
        assert_eq!(decoded.subject, "user_123");
        assert_eq!(decoded.email.as_deref(), Some("ana@acme.test"));
        assert_eq!(decoded.role_claim.as_deref(), Some("hr_admin"));
        assert_eq!(decoded.tenant_claim.as_deref(), Some("acme"));
        assert_eq!(decoded.expires_at, 1_900_000_000);
    }

    #[test]
    fn falls_back_to_azure_object_id_and_emails_array() {
        let map = claims(json!({
            "oid": "3f0c-azure",
            "emails": ["bo@globex.test"],
            "exp": 1_900_000_000i64
        }));

        let decoded = DecodedClaims::from_provider_claims(CredentialKind::IdToken, &map).unwrap();
        assert_eq!(decoded.subject, "3f0c-azure");
        assert_eq!(decoded.email.as_deref(), Some("bo@globex.test"));
        assert!(decoded.role_claim.is_none());
    }

    #[test]
    fn missing_subject_is_rejected() {
        let map = claims(json!({ "sub": "   ", "exp": 1 }));
        let result = DecodedClaims::from_provider_claims(CredentialKind::IdToken, &map);
        assert!(matches!(result, Err(AuthError::ExpiredOrInvalid)));
    }

    #[test]
    fn platform_operator_requires_no_company() {
        let mut user = AuthenticatedUser {
            user_id: "ops".into(),
            email: None,
            role: Role::PlatformAdmin,
            company_id: None,
            session_id: None,
            expires_at: 0,
            via: CredentialKind::SessionCookie,
        };
        assert!(user.is_platform_operator());

        user.company_id = Some("acme".into());
        assert!(!user.is_platform_operator());
    }
}
