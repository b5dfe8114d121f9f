// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Benefits Auth Server - Authentication & Session Lifecycle Service
//!
//! Verifies identity-provider tokens, issues signed session cookies, rotates
//! refresh tokens with reuse detection, and gates every request on a
//! tenant-scoped role hierarchy.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Token verification, sessions, refresh tokens, RBAC, rate limiting
//! - `config` - Environment configuration
//! - `storage` - Refresh-token, rate-limit and audit stores (redb or memory)
//! - `sweeper` - Background purge of stale records

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod state;
pub mod storage;
pub mod sweeper;

#[cfg(test)]
mod test_support;
