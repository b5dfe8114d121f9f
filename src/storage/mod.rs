// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Backing stores for the authentication core.
//!
//! ## Backends
//!
//! - [`database::AuthDatabase`]: a single redb file, `$DATA_DIR/auth.redb`,
//!   holding refresh tokens, rate-limit windows and audit events. Write
//!   transactions are serialized, which is what makes rotation atomic.
//! - [`memory`]: per-process maps. Non-durable and non-shared.
//!
//! ## Layout
//!
//! ```text
//! $DATA_DIR/
//!   auth.redb
//!     refresh_tokens   hmac(token) -> record (JSON)
//!     user_tokens      user_id \x1f hmac(token) -> ()
//!     rate_limits      class:ip:user -> (count, reset_at_ms)
//!     audit_events     day|ts|event_id -> event (JSON)
//! ```
//!
//! Raw refresh tokens are never written anywhere.

pub mod audit;
pub mod database;
pub mod directory;
pub mod error;
pub mod memory;

use std::path::Path;
use std::sync::Arc;

pub use audit::{AuditEvent, AuditEventType, AuditLog, AuditQuery, AuditRepository};
pub use database::AuthDatabase;
pub use directory::{DirectoryError, DirectoryUser, InMemoryDirectory, UserDirectory};
pub use error::{StoreError, StoreResult};

use crate::auth::rate_limit::RateLimitStore;
use crate::auth::refresh::RefreshTokenRepository;
use memory::{MemoryAuditStore, MemoryRateLimitStore, MemoryRefreshStore};

/// File name of the database inside `DATA_DIR`.
pub const DATABASE_FILE: &str = "auth.redb";

const MEMORY_RATE_LIMIT_KEYS: usize = 100_000;
const MEMORY_AUDIT_EVENTS: usize = 10_000;

/// The three stores behind the application context.
#[derive(Clone)]
pub struct Stores {
    pub refresh_tokens: Arc<dyn RefreshTokenRepository>,
    pub rate_limits: Arc<dyn RateLimitStore>,
    pub audit: Arc<dyn AuditRepository>,
    pub durable: bool,
}

impl Stores {
    /// Open `auth.redb` under `data_dir`, creating the directory if needed.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db = AuthDatabase::open(&data_dir.join(DATABASE_FILE))?;
        Ok(Self {
            refresh_tokens: Arc::new(db.clone()),
            rate_limits: Arc::new(db.clone()),
            audit: Arc::new(db),
            durable: true,
        })
    }

    /// Per-process stores.
    pub fn in_memory() -> Self {
        Self {
            refresh_tokens: Arc::new(MemoryRefreshStore::new()),
            rate_limits: Arc::new(MemoryRateLimitStore::new(MEMORY_RATE_LIMIT_KEYS)),
            audit: Arc::new(MemoryAuditStore::new(MEMORY_AUDIT_EVENTS)),
            durable: false,
        }
    }
}
