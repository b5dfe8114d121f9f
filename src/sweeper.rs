// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Store Sweeper
//!
//! Background task that keeps the shared stores bounded.
//!
//! ## Strategy
//!
//! Every `interval` (default 5 min) the sweeper:
//! 1. Deletes refresh-token records that are consumed, revoked or expired
//!    and untouched for longer than [`REFRESH_RETENTION`]. They stay around
//!    that long so a replayed token is still recognized as reuse.
//! 2. Drops rate-limit windows whose reset time has passed.
//! 3. Deletes audit days older than [`AUDIT_RETENTION_DAYS`].
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::rate_limit::RateLimiter;
use crate::auth::refresh::RefreshTokenStore;
use crate::state::AppState;
use crate::storage::AuditLog;

/// How long terminal refresh-token records are kept.
pub const REFRESH_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Audit days kept.
pub const AUDIT_RETENTION_DAYS: i64 = 90;

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub refresh_tokens: usize,
    pub rate_windows: usize,
    pub audit_events: usize,
}

pub struct Sweeper {
    refresh_tokens: RefreshTokenStore,
    rate_limiter: RateLimiter,
    audit: AuditLog,
    interval: Duration,
}

impl Sweeper {
    pub fn new(state: &AppState) -> Self {
        Self {
            refresh_tokens: state.refresh_tokens.clone(),
            rate_limiter: state.rate_limiter.clone(),
            audit: state.audit.clone(),
            interval: state.config.sweep_interval,
        }
    }

    /// Run the sweep loop until the cancellation token is triggered.
    ///
    /// ```rust,ignore
    /// tokio::spawn(Sweeper::new(&state).run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Store sweeper starting");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Store sweeper shutting down");
                    return;
                }
            }

            self.sweep_once().await;
        }
    }

    /// One pass over every store. Failures are logged and skipped.
    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        match self.refresh_tokens.purge_expired(REFRESH_RETENTION).await {
            Ok(count) => report.refresh_tokens = count,
            Err(e) => warn!(error = %e, "Sweeper: failed to purge refresh tokens"),
        }

        match self.rate_limiter.purge().await {
            Ok(count) => report.rate_windows = count,
            Err(e) => warn!(error = %e, "Sweeper: failed to purge rate-limit windows"),
        }

        let cutoff = Utc::now().date_naive() - chrono::Duration::days(AUDIT_RETENTION_DAYS);
        match self.audit.purge_before(cutoff).await {
            Ok(count) => report.audit_events = count,
            Err(e) => warn!(error = %e, "Sweeper: failed to purge audit events"),
        }

        if report == SweepReport::default() {
            debug!("Sweeper: nothing to purge");
        } else {
            info!(
                refresh_tokens = report.refresh_tokens,
                rate_windows = report.rate_windows,
                audit_events = report.audit_events,
                "Sweeper: purged stale records"
            );
        }
        report
    }
}
