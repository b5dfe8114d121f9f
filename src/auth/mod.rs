// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Verification, sessions, refresh tokens, roles and access control for
//! the Benefits AI Assistant.
//!
//! ## Auth Flow
//!
//! 1. Frontend authenticates the user with the identity provider
//! 2. Frontend posts the ID token to `POST /auth/session`
//! 3. Server:
//!    - Verifies the ID token (JWKS or shared secret, 60 s clock skew)
//!    - Resolves role and company from claims and the user directory
//!    - Sets the `__session` cookie and a rotating `refresh_token` cookie
//! 4. Later requests present `__session` (browsers) or
//!    `Authorization: Bearer <ID token>` (services)
//!
//! ## Security
//!
//! - Every provider and store call is time-bounded and fails closed
//! - Refresh tokens are single use; presenting a consumed one revokes every
//!   refresh token of that user
//! - Refresh tokens are stored as HMAC-SHA256 digests only
//! - Role and tenant checks run before any protected operation
//! - Security events are logged under the `security` target

pub mod claims;
pub mod error;
pub mod extractor;
pub mod gate;
pub mod jwks;
pub mod provider;
pub mod rate_limit;
pub mod refresh;
pub mod resolver;
pub mod roles;
pub mod session;
pub mod verifier;

pub use claims::{AuthenticatedUser, CredentialKind, DecodedClaims};
pub use error::{AuthError, ForbiddenReason};
pub use extractor::{Auth, Authorized, OptionalAuth};
pub use gate::Policy;
pub use jwks::JwksManager;
pub use roles::Role;
