// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Rate Limiter.
//!
//! Fixed-window counters keyed by `{endpointClass}:{clientIp}:{userId|anonymous}`.
//! The increment-and-compare is a single store operation
//! ([`RateLimitStore::hit`]), never a read followed by a write.
//!
//! Store failures fail open: the request is allowed and the error logged.
//! Authorization does not depend on the limiter.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;

use super::error::AuthError;
use super::session::SESSION_COOKIE;
use crate::state::AppState;
use crate::storage::audit::{AuditEvent, AuditEventType};
use crate::storage::error::{with_timeout, StoreResult};

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Endpoint classes with separate budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    /// Session creation, verification, sign-out
    Auth,
    /// Refresh-token rotation
    Refresh,
    /// Sensitive admin and directory operations
    Admin,
}

impl EndpointClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointClass::Auth => "auth",
            EndpointClass::Refresh => "refresh",
            EndpointClass::Admin => "admin",
        }
    }
}

/// Budget for one endpoint class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub const fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

/// Result of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Window end (Unix milliseconds)
    pub reset_at: i64,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, at least 1.
    pub fn retry_after_secs(&self, now_ms: i64) -> u64 {
        let millis = (self.reset_at - now_ms).max(0) as u64;
        millis.div_ceil(1000).max(1)
    }
}

/// Counter state after a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Hits in the current window, including this one
    pub count: u32,
    /// Window end (Unix milliseconds)
    pub reset_at: i64,
}

/// Backing store for counters.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomically count one hit for `key`, opening a fresh window when
    /// `now_ms` is past the current window's end.
    async fn hit(&self, key: &str, window: Duration, now_ms: i64) -> StoreResult<WindowCount>;

    /// Drop windows that ended before `now_ms`.
    async fn purge(&self, now_ms: i64) -> StoreResult<usize>;
}

/// Build a counter key.
pub fn rate_limit_key(class: EndpointClass, client_ip: &str, user_id: Option<&str>) -> String {
    format!(
        "{}:{}:{}",
        class.as_str(),
        client_ip,
        user_id.unwrap_or("anonymous")
    )
}

/// Rate limiter over a shared counter store.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    timeout: Duration,
    auth: RateLimitPolicy,
    refresh: RateLimitPolicy,
    admin: RateLimitPolicy,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn RateLimitStore>,
        timeout: Duration,
        auth: RateLimitPolicy,
        refresh: RateLimitPolicy,
        admin: RateLimitPolicy,
    ) -> Self {
        Self {
            store,
            timeout,
            auth,
            refresh,
            admin,
        }
    }

    pub fn policy(&self, class: EndpointClass) -> RateLimitPolicy {
        match class {
            EndpointClass::Auth => self.auth,
            EndpointClass::Refresh => self.refresh,
            EndpointClass::Admin => self.admin,
        }
    }

    /// Check and count one request for `key`.
    pub async fn check(&self, key: &str, policy: RateLimitPolicy) -> RateLimitDecision {
        self.check_at(key, policy, chrono::Utc::now().timestamp_millis())
            .await
    }

    /// [`check`](Self::check) at an explicit time.
    pub async fn check_at(&self, key: &str, policy: RateLimitPolicy, now_ms: i64) -> RateLimitDecision {
        match with_timeout(self.timeout, self.store.hit(key, policy.window, now_ms)).await {
            Ok(window) => RateLimitDecision {
                allowed: window.count <= policy.max_requests,
                limit: policy.max_requests,
                remaining: policy.max_requests.saturating_sub(window.count),
                reset_at: window.reset_at,
            },
            Err(e) => {
                tracing::error!(error = %e, key = key, "Rate limit store failed, allowing request");
                RateLimitDecision {
                    allowed: true,
                    limit: policy.max_requests,
                    remaining: policy.max_requests,
                    reset_at: now_ms + policy.window.as_millis() as i64,
                }
            }
        }
    }

    /// Drop elapsed windows.
    pub async fn purge(&self) -> StoreResult<usize> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        with_timeout(self.timeout, self.store.purge(now_ms)).await
    }
}

/// Client IP of a request.
///
/// Forwarded headers (first `X-Forwarded-For` hop, then `X-Real-IP`) are
/// only read when `trust_proxy_headers` is set; otherwise any client could
/// pick its own rate-limit key. Falls back to the peer address.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy_headers: bool) -> String {
    if trust_proxy_headers {
        if let Some(ip) = forwarded_ip(headers) {
            return ip;
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
        .map(str::to_string)
}

fn peer_addr(extensions: &axum::http::Extensions) -> Option<SocketAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Client IP of the current request, as used for rate-limit keys and audit.
pub struct ClientIp(pub String);

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(client_ip(
            &parts.headers,
            peer_addr(&parts.extensions),
            state.config.trust_proxy_headers,
        )))
    }
}

fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    let reset_secs = decision.reset_at.div_euclid(1000);
    for (name, value) in [
        (X_RATELIMIT_LIMIT, decision.limit.to_string()),
        (X_RATELIMIT_REMAINING, decision.remaining.to_string()),
        (X_RATELIMIT_RESET, reset_secs.to_string()),
    ] {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
}

/// Middleware enforcing the budget of one endpoint class.
///
/// ```rust,ignore
/// .route_layer(middleware::from_fn_with_state((state.clone(), EndpointClass::Auth), enforce_rate_limit))
/// ```
pub async fn enforce_rate_limit(
    State((state, class)): State<(AppState, EndpointClass)>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(
        request.headers(),
        peer_addr(request.extensions()),
        state.config.trust_proxy_headers,
    );

    // Cheap local decode only; an invalid cookie just counts as anonymous.
    let user_id = CookieJar::from_headers(request.headers())
        .get(SESSION_COOKIE)
        .and_then(|cookie| state.sessions.decode_session(cookie.value()).ok())
        .map(|claims| claims.sub);

    let key = rate_limit_key(class, &ip, user_id.as_deref());
    let now_ms = chrono::Utc::now().timestamp_millis();
    let decision = state
        .rate_limiter
        .check_at(&key, state.rate_limiter.policy(class), now_ms)
        .await;

    if !decision.allowed {
        let mut event = AuditEvent::new(AuditEventType::RateLimited)
            .with_ip(ip)
            .with_details(serde_json::json!({ "class": class.as_str() }))
            .failed("rate_limit_exceeded");
        if let Some(user_id) = &user_id {
            event = event.with_user(user_id.clone());
        }
        state.audit.record(event).await;

        let mut response = AuthError::RateLimitExceeded {
            retry_after_secs: decision.retry_after_secs(now_ms),
        }
        .into_response();
        apply_headers(response.headers_mut(), &decision);
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &decision);
    response
}
