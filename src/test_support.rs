// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared fixtures for handler and extractor tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum_extra::extract::cookie::CookieJar;
use serde_json::{Map, Value};

use crate::auth::provider::{IdentityProvider, SharedSecretProvider};
use crate::auth::session::{SessionIdentity, SESSION_COOKIE};
use crate::config::AuthServerConfig;
use crate::state::AppState;
use crate::storage::{DirectoryUser, InMemoryDirectory, Stores};

pub const IDP_SECRET: &str = "idp-shared-secret-for-tests-0123456789";
pub const SESSION_SECRET: &str = "session-secret-for-tests-0123456789abc";

pub struct TestState {
    pub app: AppState,
    pub directory: Arc<InMemoryDirectory>,
    pub provider: Arc<SharedSecretProvider>,
}

impl TestState {
    /// Mint an ID token as the identity provider would.
    pub async fn id_token(&self, subject: &str, claims: Value) -> String {
        let claims: Map<String, Value> = claims.as_object().cloned().unwrap_or_default();
        self.provider
            .mint_credential(subject, claims, Duration::from_secs(300))
            .await
            .unwrap()
    }

    /// `Cookie` header value carrying a fresh session for `identity`.
    pub fn session_cookie(&self, identity: &SessionIdentity) -> String {
        let (jar, _) = self
            .app
            .sessions
            .issue_session(CookieJar::new(), identity)
            .unwrap();
        format!("{SESSION_COOKIE}={}", jar.get(SESSION_COOKIE).unwrap().value())
    }

    pub async fn add_user(&self, user_id: &str, role: &str, company_id: Option<&str>) {
        self.directory
            .upsert(DirectoryUser {
                user_id: user_id.into(),
                email: Some(format!("{user_id}@example.com")),
                role: Some(role.into()),
                company_id: company_id.map(str::to_string),
                active: true,
            })
            .await;
    }
}

pub async fn test_state() -> TestState {
    test_state_with(&[]).await
}

/// Test state with extra configuration variables on top of the defaults.
pub async fn test_state_with(overrides: &[(&str, &str)]) -> TestState {
    test_state_with_stores(overrides, Stores::in_memory()).await
}

/// Test state over explicit stores.
pub async fn test_state_with_stores(overrides: &[(&str, &str)], stores: Stores) -> TestState {
    let mut vars: HashMap<String, String> = HashMap::from([
        ("SESSION_SECRET".to_string(), SESSION_SECRET.to_string()),
        ("IDP_SHARED_SECRET".to_string(), IDP_SECRET.to_string()),
        ("PROVIDER_TIMEOUT_MS".to_string(), "500".to_string()),
        ("STORE_TIMEOUT_MS".to_string(), "500".to_string()),
    ]);
    for (name, value) in overrides {
        vars.insert(name.to_string(), value.to_string());
    }
    let config = AuthServerConfig::from_lookup(|name| vars.get(name).cloned()).unwrap();

    let directory = Arc::new(InMemoryDirectory::new());
    let provider = Arc::new(SharedSecretProvider::new(IDP_SECRET.as_bytes(), None, None));
    let app = AppState::assemble(config, provider.clone(), directory.clone(), stores).unwrap();

    TestState {
        app,
        directory,
        provider,
    }
}
