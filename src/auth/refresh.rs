// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Refresh-token store with rotation and reuse detection.
//!
//! ## State machine
//!
//! ```text
//! issued ──rotate──▶ consumed
//!   │ ──revoke──▶ revoked
//!   └ ──time────▶ expired
//! ```
//!
//! `consumed`, `revoked` and `expired` are terminal. A token in a terminal
//! state is never valid again.
//!
//! ## At rest
//!
//! Records are keyed by HMAC-SHA256 of the token under the server secret.
//! Raw tokens are never persisted.
//!
//! ## Atomicity
//!
//! [`RefreshTokenRepository::consume_and_insert`] must flip `issued → consumed`
//! and insert the successor in one atomic step, so that of two racing
//! rotations of the same token exactly one wins.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::error::AuthError;
use super::session::SessionIdentity;
use crate::storage::error::{with_timeout, StoreResult};

type HmacSha256 = Hmac<Sha256>;

/// Random bytes per refresh token.
const TOKEN_BYTES: usize = 32;

/// Generate a new refresh token (256 bits, base64url).
pub fn generate_refresh_token() -> Result<String, AuthError> {
    let mut bytes = [0u8; TOKEN_BYTES];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| AuthError::Internal("system RNG failure".to_string()))?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Keyed hash of refresh tokens for storage lookups.
#[derive(Clone)]
pub struct TokenHasher {
    mac: HmacSha256,
}

impl TokenHasher {
    pub fn new(key: &[u8]) -> Result<Self, AuthError> {
        let mac = HmacSha256::new_from_slice(key)
            .map_err(|e| AuthError::Internal(format!("invalid HMAC key: {e}")))?;
        Ok(Self { mac })
    }

    pub fn hash(&self, token: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(token.as_bytes());
        Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes())
    }
}

/// Refresh token lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Issued,
    Consumed,
    Revoked,
    Expired,
}

impl TokenState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TokenState::Issued)
    }
}

/// Persisted refresh-token record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRecord {
    /// HMAC of the token value
    pub token_hash: String,
    /// Identity the token re-mints sessions for
    pub owner: SessionIdentity,
    /// Creation time (Unix seconds)
    pub issued_at: i64,
    /// Expiry (Unix seconds)
    pub expires_at: i64,
    /// Stored state; see [`RefreshTokenRecord::effective_state`]
    pub state: TokenState,
    /// Last state change (Unix seconds)
    pub updated_at: i64,
}

impl RefreshTokenRecord {
    pub fn new(token_hash: String, owner: SessionIdentity, now: i64, ttl: Duration) -> Self {
        Self {
            token_hash,
            owner,
            issued_at: now,
            expires_at: now + ttl.as_secs() as i64,
            state: TokenState::Issued,
            updated_at: now,
        }
    }

    /// State as of `now`; an `issued` record past expiry reads as `expired`.
    pub fn effective_state(&self, now: i64) -> TokenState {
        if self.state == TokenState::Issued && now >= self.expires_at {
            TokenState::Expired
        } else {
            self.state
        }
    }

    pub fn is_valid_at(&self, now: i64) -> bool {
        self.effective_state(now) == TokenState::Issued
    }

    /// Move out of `issued`. Returns false (and changes nothing) if the
    /// record is already terminal at `now`.
    pub fn transition(&mut self, to: TokenState, now: i64) -> bool {
        if !self.is_valid_at(now) {
            return false;
        }
        self.state = to;
        self.updated_at = now;
        true
    }

    /// Terminal and last touched before `cutoff`.
    pub fn is_purgeable(&self, cutoff: i64) -> bool {
        match self.effective_state(cutoff) {
            TokenState::Issued => false,
            TokenState::Expired => self.expires_at < cutoff,
            TokenState::Consumed | TokenState::Revoked => self.updated_at < cutoff,
        }
    }
}

/// Outcome of an atomic rotation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotateOutcome {
    /// Old record consumed, successor stored
    Rotated,
    /// Old record absent, terminal, or owned by someone else
    Rejected,
}

/// Backend for refresh-token records, keyed by token hash.
#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    /// Insert a new record; [`crate::storage::error::StoreError::DuplicateToken`]
    /// if the hash exists.
    async fn insert(&self, record: RefreshTokenRecord) -> StoreResult<()>;

    async fn get(&self, token_hash: &str) -> StoreResult<Option<RefreshTokenRecord>>;

    /// Atomically consume `old_hash` and insert `successor`.
    ///
    /// Rejected unless the old record is valid at `now` and belongs to the
    /// successor's owner.
    async fn consume_and_insert(
        &self,
        old_hash: &str,
        successor: RefreshTokenRecord,
        now: i64,
    ) -> StoreResult<RotateOutcome>;

    /// Revoke one record. No-op if absent or terminal.
    async fn revoke(&self, token_hash: &str, now: i64) -> StoreResult<()>;

    /// Revoke every non-terminal record of a user; returns how many changed.
    async fn revoke_all(&self, user_id: &str, now: i64) -> StoreResult<usize>;

    /// Delete terminal records last touched before `cutoff`.
    async fn purge(&self, cutoff: i64) -> StoreResult<usize>;

    /// Cheap liveness check.
    async fn ping(&self) -> StoreResult<()>;
}

/// Refresh-Token Store.
///
/// Hashes token values, bounds every backend call with a timeout and
/// exposes the token-level operations.
#[derive(Clone)]
pub struct RefreshTokenStore {
    repo: Arc<dyn RefreshTokenRepository>,
    hasher: TokenHasher,
    timeout: Duration,
}

impl RefreshTokenStore {
    pub fn new(repo: Arc<dyn RefreshTokenRepository>, hasher: TokenHasher, timeout: Duration) -> Self {
        Self {
            repo,
            hasher,
            timeout,
        }
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// Create an `issued` record for `token`.
    pub async fn store(&self, token: &str, owner: &SessionIdentity, ttl: Duration) -> StoreResult<()> {
        let record = RefreshTokenRecord::new(self.hasher.hash(token), owner.clone(), Self::now(), ttl);
        with_timeout(self.timeout, self.repo.insert(record)).await
    }

    /// Owner of `token` if it is issued and unexpired; `None` otherwise.
    pub async fn verify(&self, token: &str) -> StoreResult<Option<SessionIdentity>> {
        let now = Self::now();
        Ok(self
            .inspect(token)
            .await?
            .filter(|record| record.is_valid_at(now))
            .map(|record| record.owner))
    }

    /// Raw record for `token`, whatever its state.
    pub async fn inspect(&self, token: &str) -> StoreResult<Option<RefreshTokenRecord>> {
        let hash = self.hasher.hash(token);
        with_timeout(self.timeout, self.repo.get(&hash)).await
    }

    /// Consume `old_token` and store `new_token` for `owner`.
    ///
    /// `false` means `old_token` was not in `issued` state for this owner;
    /// callers treat that as possible reuse.
    pub async fn rotate(
        &self,
        old_token: &str,
        new_token: &str,
        owner: &SessionIdentity,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let now = Self::now();
        let successor = RefreshTokenRecord::new(self.hasher.hash(new_token), owner.clone(), now, ttl);
        let old_hash = self.hasher.hash(old_token);

        let outcome = with_timeout(
            self.timeout,
            self.repo.consume_and_insert(&old_hash, successor, now),
        )
        .await?;
        Ok(outcome == RotateOutcome::Rotated)
    }

    /// Revoke a single token. Idempotent.
    pub async fn revoke(&self, token: &str) -> StoreResult<()> {
        let hash = self.hasher.hash(token);
        with_timeout(self.timeout, self.repo.revoke(&hash, Self::now())).await
    }

    /// Revoke every live token of `user_id`.
    pub async fn revoke_all(&self, user_id: &str) -> StoreResult<usize> {
        with_timeout(self.timeout, self.repo.revoke_all(user_id, Self::now())).await
    }

    /// Delete terminal records older than `retention`.
    pub async fn purge_expired(&self, retention: Duration) -> StoreResult<usize> {
        let cutoff = Self::now() - retention.as_secs() as i64;
        with_timeout(self.timeout, self.repo.purge(cutoff)).await
    }

    pub async fn ping(&self) -> StoreResult<()> {
        with_timeout(self.timeout, self.repo.ping()).await
    }
}

/// Behaviour every [`RefreshTokenRepository`] must satisfy. Each backend's
/// tests run these against a fresh instance.
#[cfg(test)]
pub(crate) mod contract {
    use super::*;
    use crate::auth::Role;
    use crate::storage::error::StoreError;

    pub fn owner(user_id: &str) -> SessionIdentity {
        SessionIdentity {
            user_id: user_id.to_string(),
            email: None,
            role: Role::Employee,
            company_id: Some("acme".into()),
        }
    }

    fn store(repo: Arc<dyn RefreshTokenRepository>) -> RefreshTokenStore {
        RefreshTokenStore::new(
            repo,
            TokenHasher::new(b"contract-test-key").unwrap(),
            Duration::from_secs(5),
        )
    }

    const TTL: Duration = Duration::from_secs(3600);

    pub async fn store_and_verify(repo: Arc<dyn RefreshTokenRepository>) {
        let store = store(repo);
        store.store("t1", &owner("u1"), TTL).await.unwrap();

        assert_eq!(store.verify("t1").await.unwrap(), Some(owner("u1")));
        assert_eq!(store.verify("unknown").await.unwrap(), None);
    }

    pub async fn duplicate_is_rejected(repo: Arc<dyn RefreshTokenRepository>) {
        let store = store(repo);
        store.store("t1", &owner("u1"), TTL).await.unwrap();

        let err = store.store("t1", &owner("u2"), TTL).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateToken));
        // Original owner untouched.
        assert_eq!(store.verify("t1").await.unwrap(), Some(owner("u1")));
    }

    pub async fn rotate_consumes_old_token(repo: Arc<dyn RefreshTokenRepository>) {
        let store = store(repo);
        store.store("t1", &owner("u1"), TTL).await.unwrap();

        assert!(store.rotate("t1", "t2", &owner("u1"), TTL).await.unwrap());
        assert_eq!(store.verify("t1").await.unwrap(), None);
        assert_eq!(store.verify("t2").await.unwrap(), Some(owner("u1")));

        let old = store.inspect("t1").await.unwrap().unwrap();
        assert_eq!(old.state, TokenState::Consumed);

        // Second rotation of the same token fails.
        assert!(!store.rotate("t1", "t3", &owner("u1"), TTL).await.unwrap());
        assert_eq!(store.verify("t3").await.unwrap(), None);
    }

    pub async fn rotate_rejects_foreign_owner(repo: Arc<dyn RefreshTokenRepository>) {
        let store = store(repo);
        store.store("t1", &owner("u1"), TTL).await.unwrap();

        assert!(!store.rotate("t1", "t2", &owner("u2"), TTL).await.unwrap());
        assert_eq!(store.verify("t1").await.unwrap(), Some(owner("u1")));
    }

    pub async fn rotate_unknown_token_fails(repo: Arc<dyn RefreshTokenRepository>) {
        let store = store(repo);
        assert!(!store.rotate("ghost", "t2", &owner("u1"), TTL).await.unwrap());
        assert_eq!(store.verify("t2").await.unwrap(), None);
    }

    pub async fn concurrent_rotations_have_one_winner(repo: Arc<dyn RefreshTokenRepository>) {
        let store = store(repo);
        store.store("t1", &owner("u1"), TTL).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .rotate("t1", &format!("next-{i}"), &owner("u1"), TTL)
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    pub async fn revoke_all_kills_every_live_token(repo: Arc<dyn RefreshTokenRepository>) {
        let store = store(repo);
        for token in ["a", "b", "c"] {
            store.store(token, &owner("u1"), TTL).await.unwrap();
        }
        store.store("other", &owner("u2"), TTL).await.unwrap();

        assert_eq!(store.revoke_all("u1").await.unwrap(), 3);
        for token in ["a", "b", "c"] {
            assert_eq!(store.verify(token).await.unwrap(), None);
        }
        assert_eq!(store.verify("other").await.unwrap(), Some(owner("u2")));

        // Nothing left to revoke.
        assert_eq!(store.revoke_all("u1").await.unwrap(), 0);
    }

    pub async fn revoke_is_idempotent(repo: Arc<dyn RefreshTokenRepository>) {
        let store = store(repo);
        store.store("t1", &owner("u1"), TTL).await.unwrap();

        store.revoke("t1").await.unwrap();
        store.revoke("t1").await.unwrap();
        store.revoke("never-existed").await.unwrap();

        let record = store.inspect("t1").await.unwrap().unwrap();
        assert_eq!(record.state, TokenState::Revoked);
    }

    pub async fn expired_token_does_not_verify(repo: Arc<dyn RefreshTokenRepository>) {
        let store = store(repo);
        store.store("t1", &owner("u1"), Duration::ZERO).await.unwrap();

        assert_eq!(store.verify("t1").await.unwrap(), None);
        assert!(!store.rotate("t1", "t2", &owner("u1"), TTL).await.unwrap());
    }

    pub async fn purge_removes_only_old_terminal_records(repo: Arc<dyn RefreshTokenRepository>) {
        let now = chrono::Utc::now().timestamp();
        let hasher = TokenHasher::new(b"contract-test-key").unwrap();

        let mut consumed = RefreshTokenRecord::new(hasher.hash("old"), owner("u1"), now - 10_000, TTL);
        consumed.state = TokenState::Consumed;
        consumed.updated_at = now - 9_000;
        repo.insert(consumed).await.unwrap();

        let expired = RefreshTokenRecord::new(hasher.hash("stale"), owner("u1"), now - 10_000, Duration::from_secs(10));
        repo.insert(expired).await.unwrap();

        let live = RefreshTokenRecord::new(hasher.hash("live"), owner("u1"), now, TTL);
        repo.insert(live).await.unwrap();

        assert_eq!(repo.purge(now - 3_600).await.unwrap(), 2);
        assert!(repo.get(&hasher.hash("old")).await.unwrap().is_none());
        assert!(repo.get(&hasher.hash("stale")).await.unwrap().is_none());
        assert!(repo.get(&hasher.hash("live")).await.unwrap().is_some());
    }

    pub async fn run_all<F>(make: F)
    where
        F: Fn() -> Arc<dyn RefreshTokenRepository>,
    {
        store_and_verify(make()).await;
        duplicate_is_rejected(make()).await;
        rotate_consumes_old_token(make()).await;
        rotate_rejects_foreign_owner(make()).await;
        rotate_unknown_token_fails(make()).await;
        concurrent_rotations_have_one_winner(make()).await;
        revoke_all_kills_every_live_token(make()).await;
        revoke_is_idempotent(make()).await;
        expired_token_does_not_verify(make()).await;
        purge_removes_only_old_terminal_records(make()).await;
    }
}
