// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Tenant/user directory.
//!
//! The directory is the system of record for a user's role, company and
//! active flag. In the full platform it is backed by the application
//! database; this service only consumes it through [`UserDirectory`].

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::auth::Role;

/// Directory row for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUser {
    /// User ID (identity provider subject)
    pub user_id: String,
    /// Email address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Raw role as stored (may use legacy spelling)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Company the user belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<String>,
    /// Deactivated users cannot authenticate
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("user not found: {0}")]
    NotFound(String),

    #[error("failed to load directory seed: {0}")]
    Seed(String),
}

/// Lookup and minimal mutation of directory rows.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Find a user by ID. `Ok(None)` when the user has no row.
    async fn find(&self, user_id: &str) -> Result<Option<DirectoryUser>, DirectoryError>;

    /// Set the active flag and return the updated row.
    async fn set_active(&self, user_id: &str, active: bool)
        -> Result<DirectoryUser, DirectoryError>;

    /// Set the role and return the updated row.
    async fn set_role(&self, user_id: &str, role: Role) -> Result<DirectoryUser, DirectoryError>;
}

/// In-memory directory for development and single-instance deployments.
#[derive(Default)]
pub struct InMemoryDirectory {
    users: RwLock<HashMap<String, DirectoryUser>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory from existing rows.
    pub fn with_users(users: impl IntoIterator<Item = DirectoryUser>) -> Self {
        let users = users
            .into_iter()
            .map(|user| (user.user_id.clone(), user))
            .collect();
        Self {
            users: RwLock::new(users),
        }
    }

    /// Load rows from a JSON array file.
    pub fn from_json_file(path: &Path) -> Result<Self, DirectoryError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DirectoryError::Seed(format!("{}: {e}", path.display())))?;
        let users: Vec<DirectoryUser> = serde_json::from_str(&content)
            .map_err(|e| DirectoryError::Seed(format!("{}: {e}", path.display())))?;
        Ok(Self::with_users(users))
    }

    /// Insert or replace a row.
    pub async fn upsert(&self, user: DirectoryUser) {
        self.users.write().await.insert(user.user_id.clone(), user);
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn find(&self, user_id: &str) -> Result<Option<DirectoryUser>, DirectoryError> {
        Ok(self.users.read().await.get(user_id).cloned())
    }

    async fn set_active(
        &self,
        user_id: &str,
        active: bool,
    ) -> Result<DirectoryUser, DirectoryError> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| DirectoryError::NotFound(user_id.to_string()))?;
        user.active = active;
        Ok(user.clone())
    }

    async fn set_role(&self, user_id: &str, role: Role) -> Result<DirectoryUser, DirectoryError> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| DirectoryError::NotFound(user_id.to_string()))?;
        user.role = Some(role.as_str().to_string());
        Ok(user.clone())
    }
}
