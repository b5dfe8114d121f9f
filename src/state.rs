// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Application context.
//!
//! Every component is constructed exactly once at startup and handed to the
//! handlers through [`AppState`]; nothing lives in module-level globals.

use std::sync::Arc;

use crate::auth::jwks::JwksManager;
use crate::auth::provider::{IdentityProvider, JwksProvider, ProviderError, SharedSecretProvider};
use crate::auth::rate_limit::RateLimiter;
use crate::auth::refresh::{RefreshTokenStore, TokenHasher};
use crate::auth::session::SessionIssuer;
use crate::auth::verifier::TokenVerifier;
use crate::auth::AuthError;
use crate::config::{AuthServerConfig, IdentityProviderConfig};
use crate::storage::{
    AuditLog, DirectoryError, InMemoryDirectory, StoreError, Stores, UserDirectory,
};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("storage: {0}")]
    Store(#[from] StoreError),
    #[error("user directory: {0}")]
    Directory(#[from] DirectoryError),
    #[error("identity provider: {0}")]
    Provider(#[from] ProviderError),
    #[error("auth: {0}")]
    Auth(#[from] AuthError),
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AuthServerConfig>,
    pub verifier: TokenVerifier,
    pub sessions: Arc<SessionIssuer>,
    pub refresh_tokens: RefreshTokenStore,
    pub rate_limiter: RateLimiter,
    pub directory: Arc<dyn UserDirectory>,
    pub audit: AuditLog,
}

impl AppState {
    /// Wire all components from configuration.
    ///
    /// Stores are redb-backed when `DATA_DIR` is set and in-memory otherwise.
    pub fn from_config(config: AuthServerConfig) -> Result<Self, StartupError> {
        let stores = match &config.data_dir {
            Some(dir) => {
                tracing::info!(data_dir = %dir.display(), "Using durable auth store");
                Stores::open(dir)?
            }
            None => {
                tracing::warn!(
                    "DATA_DIR not set: refresh tokens and rate limits are in-memory, \
                     non-durable and not shared between instances"
                );
                Stores::in_memory()
            }
        };

        let directory: Arc<dyn UserDirectory> = match &config.user_directory_file {
            Some(path) => {
                let directory = InMemoryDirectory::from_json_file(path)?;
                tracing::info!(path = %path.display(), "Loaded user directory seed");
                Arc::new(directory)
            }
            None => Arc::new(InMemoryDirectory::new()),
        };

        let provider = build_provider(&config)?;
        Self::assemble(config, provider, directory, stores)
    }

    /// Wire components around an explicit provider, directory and stores.
    pub fn assemble(
        config: AuthServerConfig,
        provider: Arc<dyn IdentityProvider>,
        directory: Arc<dyn UserDirectory>,
        stores: Stores,
    ) -> Result<Self, StartupError> {
        let sessions = Arc::new(SessionIssuer::new(
            &config.session_secret,
            config.session_ttl,
            config.refresh_ttl,
            config.secure_cookies(),
        ));

        let verifier = TokenVerifier::new(
            provider,
            sessions.clone(),
            directory.clone(),
            config.provider_timeout,
        );

        let refresh_tokens = RefreshTokenStore::new(
            stores.refresh_tokens,
            TokenHasher::new(&config.session_secret)?,
            config.store_timeout,
        );

        let rate_limiter = RateLimiter::new(
            stores.rate_limits,
            config.store_timeout,
            config.auth_rate_limit,
            config.refresh_rate_limit,
            config.admin_rate_limit,
        );

        Ok(Self {
            config: Arc::new(config),
            verifier,
            sessions,
            refresh_tokens,
            rate_limiter,
            directory,
            audit: AuditLog::new(stores.audit),
        })
    }
}

fn build_provider(config: &AuthServerConfig) -> Result<Arc<dyn IdentityProvider>, ProviderError> {
    let provider: Arc<dyn IdentityProvider> = match &config.identity_provider {
        IdentityProviderConfig::Jwks { url, issuer, audience } => {
            let jwks = JwksManager::new(url.clone(), config.provider_timeout)?;
            Arc::new(JwksProvider::new(jwks, issuer.clone(), audience.clone()))
        }
        IdentityProviderConfig::SharedSecret { secret, issuer, audience } => {
            tracing::warn!("Using shared-secret identity provider (development only)");
            Arc::new(SharedSecretProvider::new(secret, issuer.clone(), audience.clone()))
        }
    };
    tracing::info!(provider = provider.name(), "Identity provider configured");
    Ok(provider)
}
