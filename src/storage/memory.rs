// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory stores.
//!
//! **Non-durable and non-shared.** State lives in this process only and is
//! lost on restart; several instances each see their own counters and
//! tokens. Suitable for local development and single-instance deployments.
//! Set `DATA_DIR` to use the redb-backed [`AuthDatabase`](super::database::AuthDatabase).

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use lru::LruCache;

use super::audit::{AuditEvent, AuditQuery, AuditRepository};
use super::error::{StoreError, StoreResult};
use crate::auth::rate_limit::{RateLimitStore, WindowCount};
use crate::auth::refresh::{RefreshTokenRecord, RefreshTokenRepository, RotateOutcome, TokenState};

// =============================================================================
// Refresh tokens
// =============================================================================

/// Refresh-token records behind a single mutex; every operation is atomic.
#[derive(Default)]
pub struct MemoryRefreshStore {
    records: Mutex<HashMap<String, RefreshTokenRecord>>,
}

impl MemoryRefreshStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RefreshTokenRepository for MemoryRefreshStore {
    async fn insert(&self, record: RefreshTokenRecord) -> StoreResult<()> {
        let mut records = self.records.lock()?;
        if records.contains_key(&record.token_hash) {
            return Err(StoreError::DuplicateToken);
        }
        records.insert(record.token_hash.clone(), record);
        Ok(())
    }

    async fn get(&self, token_hash: &str) -> StoreResult<Option<RefreshTokenRecord>> {
        Ok(self.records.lock()?.get(token_hash).cloned())
    }

    async fn consume_and_insert(
        &self,
        old_hash: &str,
        successor: RefreshTokenRecord,
        now: i64,
    ) -> StoreResult<RotateOutcome> {
        let mut records = self.records.lock()?;
        if records.contains_key(&successor.token_hash) {
            return Err(StoreError::DuplicateToken);
        }

        let Some(old) = records.get_mut(old_hash) else {
            return Ok(RotateOutcome::Rejected);
        };
        if old.owner.user_id != successor.owner.user_id
            || !old.transition(TokenState::Consumed, now)
        {
            return Ok(RotateOutcome::Rejected);
        }

        records.insert(successor.token_hash.clone(), successor);
        Ok(RotateOutcome::Rotated)
    }

    async fn revoke(&self, token_hash: &str, now: i64) -> StoreResult<()> {
        if let Some(record) = self.records.lock()?.get_mut(token_hash) {
            record.transition(TokenState::Revoked, now);
        }
        Ok(())
    }

    async fn revoke_all(&self, user_id: &str, now: i64) -> StoreResult<usize> {
        let mut records = self.records.lock()?;
        let mut revoked = 0;
        for record in records.values_mut() {
            if record.owner.user_id == user_id && record.transition(TokenState::Revoked, now) {
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn purge(&self, cutoff: i64) -> StoreResult<usize> {
        let mut records = self.records.lock()?;
        let before = records.len();
        records.retain(|_, record| !record.is_purgeable(cutoff));
        Ok(before - records.len())
    }

    async fn ping(&self) -> StoreResult<()> {
        drop(self.records.lock()?);
        Ok(())
    }
}

// =============================================================================
// Rate limits
// =============================================================================

/// Rate-limit windows in a bounded LRU; the least recently seen keys are
/// evicted first when capacity is reached.
pub struct MemoryRateLimitStore {
    windows: Mutex<LruCache<String, WindowCount>>,
}

impl MemoryRateLimitStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            windows: Mutex::new(LruCache::new(capacity)),
        }
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn hit(&self, key: &str, window: Duration, now_ms: i64) -> StoreResult<WindowCount> {
        let mut windows = self.windows.lock()?;
        let next = match windows.get(key) {
            Some(current) if now_ms <= current.reset_at => WindowCount {
                count: current.count.saturating_add(1),
                reset_at: current.reset_at,
            },
            _ => WindowCount {
                count: 1,
                reset_at: now_ms + window.as_millis() as i64,
            },
        };
        windows.put(key.to_string(), next);
        Ok(next)
    }

    async fn purge(&self, now_ms: i64) -> StoreResult<usize> {
        let mut windows = self.windows.lock()?;
        let stale: Vec<String> = windows
            .iter()
            .filter(|(_, window)| window.reset_at < now_ms)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            windows.pop(key);
        }
        Ok(stale.len())
    }
}

// =============================================================================
// Audit
// =============================================================================

/// Most recent audit events in a bounded ring.
pub struct MemoryAuditStore {
    events: Mutex<VecDeque<AuditEvent>>,
    capacity: usize,
}

impl MemoryAuditStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }
}

#[async_trait]
impl AuditRepository for MemoryAuditStore {
    async fn append(&self, event: &AuditEvent) -> StoreResult<()> {
        let mut events = self.events.lock()?;
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
        Ok(())
    }

    async fn read_events(&self, date: NaiveDate, query: &AuditQuery) -> StoreResult<Vec<AuditEvent>> {
        let events = self.events.lock()?;
        Ok(events
            .iter()
            .filter(|event| event.timestamp.date_naive() == date && query.matches(event))
            .cloned()
            .collect())
    }

    async fn purge_before(&self, date: NaiveDate) -> StoreResult<usize> {
        let mut events = self.events.lock()?;
        let before = events.len();
        events.retain(|event| event.timestamp.date_naive() >= date);
        Ok(before - events.len())
    }
}
