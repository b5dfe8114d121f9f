// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Role/claims resolver.
//!
//! Collapses the heterogeneous role representations found across identity
//! providers and legacy database rows into one canonical [`Role`] plus an
//! optional company ID.
//!
//! Parsing fails open: an unrecognized role string resolves to
//! [`Role::Employee`]. Authorization fails closed downstream in the gate.
//!
//! Pure functions, no I/O.

use serde_json::{Map, Value};

use super::claims::{AuthenticatedUser, DecodedClaims};
use super::roles::Role;
use crate::storage::directory::DirectoryUser;

/// Claim paths that have carried the role, in lookup order.
const ROLE_CLAIM_PATHS: &[&[&str]] = &[
    &["role"],
    &["custom_claims", "role"],
    &["customClaims", "role"],
    &["claims", "role"],
    &["publicMetadata", "role"],
    &["public_metadata", "role"],
    &["extension_Role"],
    &["extension_role"],
    &["userRole"],
    &["roles"],
];

/// Claim paths that have carried the company ID, in lookup order.
const TENANT_CLAIM_PATHS: &[&[&str]] = &[
    &["companyId"],
    &["company_id"],
    &["custom_claims", "companyId"],
    &["custom_claims", "company_id"],
    &["customClaims", "companyId"],
    &["publicMetadata", "companyId"],
    &["extension_CompanyId"],
    &["tenantId"],
];

/// Canonical role and tenant for a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub role: Role,
    pub company_id: Option<String>,
}

/// Find the raw role claim under any of the historical key names.
pub fn find_role_claim(claims: &Map<String, Value>) -> Option<String> {
    first_match(claims, ROLE_CLAIM_PATHS)
}

/// Find the raw company claim under any of the historical key names.
pub fn find_tenant_claim(claims: &Map<String, Value>) -> Option<String> {
    first_match(claims, TENANT_CLAIM_PATHS)
}

fn first_match(claims: &Map<String, Value>, paths: &[&[&str]]) -> Option<String> {
    paths
        .iter()
        .find_map(|path| lookup(claims, path).and_then(scalar_string))
}

fn lookup<'a>(claims: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = claims.get(*first)?;
    for segment in rest {
        current = current.as_object()?.get(*segment)?;
    }
    Some(current)
}

/// Strings are taken as-is; arrays contribute their first string element.
fn scalar_string(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.as_str(),
        Value::Array(items) => items.iter().find_map(Value::as_str)?,
        _ => return None,
    };
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Normalize a raw role string. Unknown or absent roles become `Employee`.
pub fn resolve_role(raw: Option<&str>) -> Role {
    match raw {
        Some(value) => Role::parse(value).unwrap_or_else(|| {
            tracing::debug!(role = value, "Unrecognized role claim, defaulting to employee");
            Role::Employee
        }),
        None => Role::Employee,
    }
}

/// Resolve role and tenant from decoded claims alone.
pub fn resolve(claims: &DecodedClaims) -> ResolvedIdentity {
    ResolvedIdentity {
        role: resolve_role(claims.role_claim.as_deref()),
        company_id: claims.tenant_claim.clone(),
    }
}

/// Resolve with a directory row taking precedence over provider claims.
///
/// The directory is the system of record for role and company; claims fill
/// in whatever the row leaves empty.
pub fn resolve_with_directory(
    claims: &DecodedClaims,
    entry: Option<&DirectoryUser>,
) -> ResolvedIdentity {
    let from_claims = resolve(claims);
    match entry {
        Some(row) => ResolvedIdentity {
            role: row
                .role
                .as_deref()
                .map(|raw| resolve_role(Some(raw)))
                .unwrap_or(from_claims.role),
            company_id: row.company_id.clone().or(from_claims.company_id),
        },
        None => from_claims,
    }
}

/// Combine verified claims and their resolution into the request identity.
pub fn authenticated_user(claims: DecodedClaims, resolved: ResolvedIdentity) -> AuthenticatedUser {
    AuthenticatedUser {
        user_id: claims.subject,
        email: claims.email,
        role: resolved.role,
        company_id: resolved.company_id,
        session_id: claims.session_id,
        expires_at: claims.expires_at,
        via: claims.kind,
    }
}
