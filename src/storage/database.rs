// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Durable auth store backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `refresh_tokens`: token hash → serialized RefreshTokenRecord
//! - `user_tokens`: composite key (user_id \x1f token hash) → ()
//! - `rate_limits`: counter key → (count, reset_at_ms)
//! - `audit_events`: composite key (day|timestamp_ms|sequence|event_id) → serialized AuditEvent
//!
//! redb serializes write transactions. Every mutating operation runs inside
//! one write transaction, which is what makes rotation and counter
//! increments atomic. Calls run on the blocking pool.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use super::audit::{AuditEvent, AuditQuery, AuditRepository};
use super::error::{StoreError, StoreResult};
use crate::auth::rate_limit::{RateLimitStore, WindowCount};
use crate::auth::refresh::{RefreshTokenRecord, RefreshTokenRepository, RotateOutcome, TokenState};

// =============================================================================
// Table Definitions
// =============================================================================

/// Primary table: token hash → serialized RefreshTokenRecord (JSON bytes).
const REFRESH_TOKENS: TableDefinition<&str, &[u8]> = TableDefinition::new("refresh_tokens");

/// Index: `user_id \x1f token_hash` → ().
const USER_TOKENS: TableDefinition<&str, ()> = TableDefinition::new("user_tokens");

/// Rate-limit windows: key → (count, reset_at_ms).
const RATE_LIMITS: TableDefinition<&str, (u32, i64)> = TableDefinition::new("rate_limits");

/// Audit events: `day|timestamp_ms|sequence|event_id` → serialized AuditEvent.
const AUDIT_EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("audit_events");

// =============================================================================
// Index Key Helpers
// =============================================================================

const USER_SEPARATOR: char = '\x1f';

fn user_token_key(user_id: &str, token_hash: &str) -> String {
    format!("{user_id}{USER_SEPARATOR}{token_hash}")
}

/// `[start, end)` covering every index key of `user_id`.
fn user_token_range(user_id: &str) -> (String, String) {
    (format!("{user_id}\x1f"), format!("{user_id}\x20"))
}

/// The sequence breaks ties between events of the same millisecond, so a
/// day reads back in append order.
fn audit_key(event: &AuditEvent, sequence: u64) -> String {
    format!(
        "{}|{:020}|{:020}|{}",
        event.day(),
        event.timestamp.timestamp_millis().max(0),
        sequence,
        event.event_id
    )
}

/// `[start, end)` covering one day; `}` sorts right after `|`.
fn audit_day_range(date: NaiveDate) -> (String, String) {
    let day = date.format("%Y-%m-%d");
    (format!("{day}|"), format!("{day}}}"))
}

// =============================================================================
// AuthDatabase
// =============================================================================

/// Embedded ACID store for refresh tokens, rate limits and audit events.
#[derive(Clone)]
pub struct AuthDatabase {
    db: Arc<Database>,
    audit_sequence: Arc<AtomicU64>,
}

impl AuthDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(REFRESH_TOKENS)?;
            let _ = write_txn.open_table(USER_TOKENS)?;
            let _ = write_txn.open_table(RATE_LIMITS)?;
            let _ = write_txn.open_table(AUDIT_EVENTS)?;
        }
        write_txn.commit()?;

        tracing::info!(path = %path.display(), "Auth database opened");
        Ok(Self {
            db: Arc::new(db),
            audit_sequence: Arc::new(AtomicU64::new(0)),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&AuthDatabase) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || f(&this)).await?
    }

    // -------------------------------------------------------------------------
    // Refresh tokens
    // -------------------------------------------------------------------------

    /// Insert a new token record and its user index entry.
    pub fn put_new_token(&self, record: &RefreshTokenRecord) -> StoreResult<()> {
        let bytes = serde_json::to_vec(record)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut tokens = write_txn.open_table(REFRESH_TOKENS)?;
            if tokens.get(record.token_hash.as_str())?.is_some() {
                return Err(StoreError::DuplicateToken);
            }
            tokens.insert(record.token_hash.as_str(), bytes.as_slice())?;

            let mut index = write_txn.open_table(USER_TOKENS)?;
            index.insert(
                user_token_key(&record.owner.user_id, &record.token_hash).as_str(),
                (),
            )?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_token(&self, token_hash: &str) -> StoreResult<Option<RefreshTokenRecord>> {
        let read_txn = self.db.begin_read()?;
        let tokens = read_txn.open_table(REFRESH_TOKENS)?;
        match tokens.get(token_hash)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Consume `old_hash` and insert `successor` in one write transaction.
    pub fn rotate_token(
        &self,
        old_hash: &str,
        successor: &RefreshTokenRecord,
        now: i64,
    ) -> StoreResult<RotateOutcome> {
        let successor_bytes = serde_json::to_vec(successor)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut tokens = write_txn.open_table(REFRESH_TOKENS)?;

            let existing = tokens.get(old_hash)?.map(|guard| guard.value().to_vec());
            let Some(existing) = existing else {
                return Ok(RotateOutcome::Rejected);
            };
            let mut old: RefreshTokenRecord = serde_json::from_slice(&existing)?;
            if old.owner.user_id != successor.owner.user_id
                || !old.transition(TokenState::Consumed, now)
            {
                // Dropping the transaction aborts it.
                return Ok(RotateOutcome::Rejected);
            }
            if tokens.get(successor.token_hash.as_str())?.is_some() {
                return Err(StoreError::DuplicateToken);
            }

            let old_bytes = serde_json::to_vec(&old)?;
            tokens.insert(old_hash, old_bytes.as_slice())?;
            tokens.insert(successor.token_hash.as_str(), successor_bytes.as_slice())?;

            let mut index = write_txn.open_table(USER_TOKENS)?;
            index.insert(
                user_token_key(&successor.owner.user_id, &successor.token_hash).as_str(),
                (),
            )?;
        }
        write_txn.commit()?;
        Ok(RotateOutcome::Rotated)
    }

    pub fn revoke_token(&self, token_hash: &str, now: i64) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut tokens = write_txn.open_table(REFRESH_TOKENS)?;
            let existing = tokens.get(token_hash)?.map(|guard| guard.value().to_vec());
            if let Some(existing) = existing {
                let mut record: RefreshTokenRecord = serde_json::from_slice(&existing)?;
                if record.transition(TokenState::Revoked, now) {
                    let bytes = serde_json::to_vec(&record)?;
                    tokens.insert(token_hash, bytes.as_slice())?;
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn revoke_user_tokens(&self, user_id: &str, now: i64) -> StoreResult<usize> {
        let (start, end) = user_token_range(user_id);
        let write_txn = self.db.begin_write()?;
        let mut revoked = 0;
        {
            let index = write_txn.open_table(USER_TOKENS)?;
            let mut hashes = Vec::new();
            for entry in index.range(start.as_str()..end.as_str())? {
                let (key, _) = entry?;
                if let Some((_, hash)) = key.value().split_once(USER_SEPARATOR) {
                    hashes.push(hash.to_string());
                }
            }

            let mut tokens = write_txn.open_table(REFRESH_TOKENS)?;
            for hash in hashes {
                let existing = tokens.get(hash.as_str())?.map(|guard| guard.value().to_vec());
                let Some(existing) = existing else { continue };
                let mut record: RefreshTokenRecord = serde_json::from_slice(&existing)?;
                if record.transition(TokenState::Revoked, now) {
                    let bytes = serde_json::to_vec(&record)?;
                    tokens.insert(hash.as_str(), bytes.as_slice())?;
                    revoked += 1;
                }
            }
        }
        write_txn.commit()?;
        Ok(revoked)
    }

    pub fn purge_tokens(&self, cutoff: i64) -> StoreResult<usize> {
        let write_txn = self.db.begin_write()?;
        let purged;
        {
            let mut tokens = write_txn.open_table(REFRESH_TOKENS)?;
            let mut doomed = Vec::new();
            for entry in tokens.iter()? {
                let (key, value) = entry?;
                let record: RefreshTokenRecord = serde_json::from_slice(value.value())?;
                if record.is_purgeable(cutoff) {
                    doomed.push((key.value().to_string(), record.owner.user_id));
                }
            }

            let mut index = write_txn.open_table(USER_TOKENS)?;
            for (hash, user_id) in &doomed {
                tokens.remove(hash.as_str())?;
                index.remove(user_token_key(user_id, hash).as_str())?;
            }
            purged = doomed.len();
        }
        write_txn.commit()?;
        Ok(purged)
    }

    // -------------------------------------------------------------------------
    // Rate limits
    // -------------------------------------------------------------------------

    /// Count one hit in a single write transaction.
    pub fn hit_window(&self, key: &str, window: Duration, now_ms: i64) -> StoreResult<WindowCount> {
        let write_txn = self.db.begin_write()?;
        let next;
        {
            let mut windows = write_txn.open_table(RATE_LIMITS)?;
            let current = windows.get(key)?.map(|guard| guard.value());
            next = match current {
                Some((count, reset_at)) if now_ms <= reset_at => WindowCount {
                    count: count.saturating_add(1),
                    reset_at,
                },
                _ => WindowCount {
                    count: 1,
                    reset_at: now_ms + window.as_millis() as i64,
                },
            };
            windows.insert(key, (next.count, next.reset_at))?;
        }
        write_txn.commit()?;
        Ok(next)
    }

    pub fn purge_windows(&self, now_ms: i64) -> StoreResult<usize> {
        let write_txn = self.db.begin_write()?;
        let purged;
        {
            let mut windows = write_txn.open_table(RATE_LIMITS)?;
            let mut stale = Vec::new();
            for entry in windows.iter()? {
                let (key, value) = entry?;
                let (_, reset_at) = value.value();
                if reset_at < now_ms {
                    stale.push(key.value().to_string());
                }
            }
            for key in &stale {
                windows.remove(key.as_str())?;
            }
            purged = stale.len();
        }
        write_txn.commit()?;
        Ok(purged)
    }

    // -------------------------------------------------------------------------
    // Audit
    // -------------------------------------------------------------------------

    pub fn append_audit(&self, event: &AuditEvent) -> StoreResult<()> {
        let bytes = serde_json::to_vec(event)?;
        let write_txn = self.db.begin_write()?;
        {
            // Taken inside the write transaction, so sequence order is commit order.
            let sequence = self.audit_sequence.fetch_add(1, Ordering::SeqCst);
            let mut events = write_txn.open_table(AUDIT_EVENTS)?;
            events.insert(audit_key(event, sequence).as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn read_audit(&self, date: NaiveDate, query: &AuditQuery) -> StoreResult<Vec<AuditEvent>> {
        let (start, end) = audit_day_range(date);
        let read_txn = self.db.begin_read()?;
        let events = read_txn.open_table(AUDIT_EVENTS)?;

        let mut result = Vec::new();
        for entry in events.range(start.as_str()..end.as_str())? {
            let (_, value) = entry?;
            let event: AuditEvent = serde_json::from_slice(value.value())?;
            if query.matches(&event) {
                result.push(event);
            }
        }
        Ok(result)
    }

    pub fn purge_audit_before(&self, date: NaiveDate) -> StoreResult<usize> {
        let (end, _) = audit_day_range(date);
        let write_txn = self.db.begin_write()?;
        let purged;
        {
            let mut events = write_txn.open_table(AUDIT_EVENTS)?;
            let mut doomed = Vec::new();
            for entry in events.range(..end.as_str())? {
                let (key, _) = entry?;
                doomed.push(key.value().to_string());
            }
            for key in &doomed {
                events.remove(key.as_str())?;
            }
            purged = doomed.len();
        }
        write_txn.commit()?;
        Ok(purged)
    }
}

#[async_trait]
impl RefreshTokenRepository for AuthDatabase {
    async fn insert(&self, record: RefreshTokenRecord) -> StoreResult<()> {
        self.blocking(move |db| db.put_new_token(&record)).await
    }

    async fn get(&self, token_hash: &str) -> StoreResult<Option<RefreshTokenRecord>> {
        let token_hash = token_hash.to_string();
        self.blocking(move |db| db.get_token(&token_hash)).await
    }

    async fn consume_and_insert(
        &self,
        old_hash: &str,
        successor: RefreshTokenRecord,
        now: i64,
    ) -> StoreResult<RotateOutcome> {
        let old_hash = old_hash.to_string();
        self.blocking(move |db| db.rotate_token(&old_hash, &successor, now))
            .await
    }

    async fn revoke(&self, token_hash: &str, now: i64) -> StoreResult<()> {
        let token_hash = token_hash.to_string();
        self.blocking(move |db| db.revoke_token(&token_hash, now)).await
    }

    async fn revoke_all(&self, user_id: &str, now: i64) -> StoreResult<usize> {
        let user_id = user_id.to_string();
        self.blocking(move |db| db.revoke_user_tokens(&user_id, now))
            .await
    }

    async fn purge(&self, cutoff: i64) -> StoreResult<usize> {
        self.blocking(move |db| db.purge_tokens(cutoff)).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.blocking(|db| {
            let read_txn = db.db.begin_read()?;
            let _ = read_txn.open_table(REFRESH_TOKENS)?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl RateLimitStore for AuthDatabase {
    async fn hit(&self, key: &str, window: Duration, now_ms: i64) -> StoreResult<WindowCount> {
        let key = key.to_string();
        self.blocking(move |db| db.hit_window(&key, window, now_ms))
            .await
    }

    async fn purge(&self, now_ms: i64) -> StoreResult<usize> {
        self.blocking(move |db| db.purge_windows(now_ms)).await
    }
}

#[async_trait]
impl AuditRepository for AuthDatabase {
    async fn append(&self, event: &AuditEvent) -> StoreResult<()> {
        let event = event.clone();
        self.blocking(move |db| db.append_audit(&event)).await
    }

    async fn read_events(&self, date: NaiveDate, query: &AuditQuery) -> StoreResult<Vec<AuditEvent>> {
        let query = query.clone();
        self.blocking(move |db| db.read_audit(date, &query)).await
    }

    async fn purge_before(&self, date: NaiveDate) -> StoreResult<usize> {
        self.blocking(move |db| db.purge_audit_before(date)).await
    }
}
