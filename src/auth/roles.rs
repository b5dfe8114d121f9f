// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Canonical roles for authorization.

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use utoipa::ToSchema;

/// Canonical user roles.
///
/// ## Role Hierarchy (lowest to highest)
///
/// - `Employee` - Chats with the benefits advisor, sees own data
/// - `HrAdmin` - Manages employees of their company
/// - `CompanyAdmin` - Full control over their company (users, plans, documents)
/// - `PlatformAdmin` - Manages companies across the platform
/// - `SuperAdmin` - Unrestricted platform operator
///
/// Every authenticated request resolves to exactly one of these.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Regular employee of a company
    Employee,
    /// HR administrator of a company
    HrAdmin,
    /// Company administrator
    CompanyAdmin,
    /// Platform administrator (cross-company)
    PlatformAdmin,
    /// Super administrator
    SuperAdmin,
}

impl Role {
    /// All roles, lowest privilege first.
    pub const ALL: [Role; 5] = [
        Role::Employee,
        Role::HrAdmin,
        Role::CompanyAdmin,
        Role::PlatformAdmin,
        Role::SuperAdmin,
    ];

    /// Numeric privilege rank. Higher ranks include lower ones.
    pub fn rank(&self) -> u8 {
        match self {
            Role::Employee => 0,
            Role::HrAdmin => 1,
            Role::CompanyAdmin => 2,
            Role::PlatformAdmin => 3,
            Role::SuperAdmin => 4,
        }
    }

    /// Check if this role has at least the privileges of the required role.
    pub fn has_privilege(&self, required: Role) -> bool {
        self.rank() >= required.rank()
    }

    /// Platform-scoped roles are not bound to a single company by their role alone.
    pub fn is_platform_scoped(&self) -> bool {
        matches!(self, Role::PlatformAdmin | Role::SuperAdmin)
    }

    /// Canonical wire token (`"company_admin"` etc).
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Employee => "employee",
            Role::HrAdmin => "hr_admin",
            Role::CompanyAdmin => "company_admin",
            Role::PlatformAdmin => "platform_admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    /// Parse a role string, tolerating the spellings seen across identity
    /// providers and legacy database rows.
    ///
    /// `"Company-Admin"`, `"company admin"`, `"companyAdmin"` and
    /// `"COMPANY_ADMIN"` all parse to [`Role::CompanyAdmin`]. Returns `None`
    /// for anything unrecognized.
    pub fn parse(s: &str) -> Option<Role> {
        match normalize_token(s).as_str() {
            "employee" | "user" | "member" | "staff" => Some(Role::Employee),
            "hr_admin" | "hradmin" | "hr" | "hr_manager" => Some(Role::HrAdmin),
            "company_admin" | "companyadmin" | "admin" | "org_admin" | "employer_admin" => {
                Some(Role::CompanyAdmin)
            }
            "platform_admin" | "platformadmin" => Some(Role::PlatformAdmin),
            "super_admin" | "superadmin" | "root" => Some(Role::SuperAdmin),
            _ => None,
        }
    }
}

impl Default for Role {
    /// Default role is Employee (least privilege for authenticated users).
    fn default() -> Self {
        Role::Employee
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fold a raw role string into a comparable token.
///
/// NFKC-normalizes, trims, lower-cases and maps `-`, `.`, whitespace and
/// runs of `_` to a single `_`.
pub fn normalize_token(raw: &str) -> String {
    let folded: String = raw.nfkc().collect::<String>().trim().to_lowercase();
    let mut out = String::with_capacity(folded.len());
    let mut pending_sep = false;
    for ch in folded.chars() {
        if ch == '-' || ch == '_' || ch == '.' || ch.is_whitespace() {
            pending_sep = !out.is_empty();
            continue;
        }
        if pending_sep {
            out.push('_');
            pending_sep = false;
        }
        out.push(ch);
    }
    out
}
