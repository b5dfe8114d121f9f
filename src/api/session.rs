// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session lifecycle endpoints.
//!
//! One flow: `POST /auth/session` exchanges an ID token for a session cookie
//! plus a refresh token; `POST /auth/refresh` rotates the refresh token and
//! re-mints both cookies.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::claims::{CredentialKind, DecodedClaims};
use crate::auth::rate_limit::ClientIp;
use crate::auth::refresh::{generate_refresh_token, TokenState};
use crate::auth::session::{SessionIdentity, REFRESH_COOKIE};
use crate::auth::{resolver, Auth, AuthError};
use crate::error::ApiError;
use crate::state::AppState;
use crate::storage::{AuditEvent, AuditEventType, DirectoryUser};

/// Request body for `POST /auth/session`.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// ID token issued by the identity provider
    pub id_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    fn success() -> Json<Self> {
        Json(Self {
            status: "success".to_string(),
        })
    }
}

/// Mint the session cookie and a fresh refresh token for `identity`.
async fn start_session(
    state: &AppState,
    jar: CookieJar,
    identity: &SessionIdentity,
) -> Result<CookieJar, AuthError> {
    let refresh_token = generate_refresh_token()?;
    state
        .refresh_tokens
        .store(&refresh_token, identity, state.sessions.refresh_ttl())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, user_id = %identity.user_id, "Failed to store refresh token");
            AuthError::SessionIssuanceFailed
        })?;

    let (jar, _) = state.sessions.issue_session(jar, identity)?;
    Ok(state.sessions.set_refresh_cookie(jar, refresh_token))
}

/// Create a session from an ID token.
///
/// Sets the `__session` and `refresh_token` cookies.
#[utoipa::path(
    post,
    path = "/auth/session",
    tag = "Session",
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Session created", body = StatusResponse),
        (status = 400, description = "idToken missing"),
        (status = 429, description = "Rate limited"),
        (status = 500, description = "Session could not be issued")
    )
)]
pub async fn create_session(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    jar: CookieJar,
    body: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<StatusResponse>), ApiError> {
    let id_token = body
        .ok()
        .and_then(|Json(body)| body.id_token)
        .filter(|token| !token.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("idToken is required"))?;

    let user = match state.verifier.authenticate(&id_token, CredentialKind::IdToken).await {
        Ok(user) => user,
        Err(error) => {
            state
                .audit
                .record(
                    AuditEvent::new(AuditEventType::AuthFailure)
                        .with_ip(ip)
                        .with_resource("route", "/auth/session")
                        .failed(error.error_code()),
                )
                .await;
            return Err(AuthError::SessionIssuanceFailed.into());
        }
    };

    let identity = SessionIdentity::from(&user);
    let jar = start_session(&state, jar, &identity).await?;

    state
        .audit
        .record(
            AuditEvent::new(AuditEventType::SessionIssued)
                .with_user(user.user_id.clone())
                .with_company(user.company_id.clone())
                .with_ip(ip)
                .with_details(serde_json::json!({ "role": user.role.as_str() })),
        )
        .await;

    Ok((jar, StatusResponse::success()))
}

/// Sign out: clear the session cookie and retire the presented refresh token.
///
/// Succeeds whether or not a session existed.
#[utoipa::path(
    delete,
    path = "/auth/session",
    tag = "Session",
    responses(
        (status = 200, description = "Session cleared", body = StatusResponse)
    )
)]
pub async fn delete_session(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    jar: CookieJar,
) -> (CookieJar, Json<StatusResponse>) {
    if let Some(cookie) = jar.get(REFRESH_COOKIE) {
        if let Err(e) = state.refresh_tokens.revoke(cookie.value()).await {
            tracing::warn!(error = %e, "Failed to revoke refresh token on sign-out");
        }
    }

    let user_id = state
        .verifier
        .from_cookies(&jar)
        .await
        .ok()
        .flatten()
        .map(|user| user.user_id);

    let jar = state.sessions.destroy_session(jar);
    let jar = state.sessions.clear_refresh_cookie(jar);

    if let Some(user_id) = user_id {
        state
            .audit
            .record(
                AuditEvent::new(AuditEventType::SessionDestroyed)
                    .with_user(user_id)
                    .with_ip(ip),
            )
            .await;
    }

    (jar, StatusResponse::success())
}

/// Re-resolve role and company for a refreshed session.
///
/// The owner snapshot stored with the token is the fallback; a directory row
/// wins, so role changes take effect at the next refresh.
fn refreshed_identity(owner: &SessionIdentity, row: Option<&DirectoryUser>) -> SessionIdentity {
    let snapshot = DecodedClaims {
        kind: CredentialKind::SessionCookie,
        subject: owner.user_id.clone(),
        email: owner.email.clone(),
        role_claim: Some(owner.role.as_str().to_string()),
        tenant_claim: owner.company_id.clone(),
        expires_at: 0,
        issuer: None,
        session_id: None,
    };
    let resolved = resolver::resolve_with_directory(&snapshot, row);
    SessionIdentity {
        user_id: owner.user_id.clone(),
        email: row.and_then(|r| r.email.clone()).or_else(|| owner.email.clone()),
        role: resolved.role,
        company_id: resolved.company_id,
    }
}

/// Revoke every refresh token of `user_id` after a reuse signal.
async fn handle_reuse(state: &AppState, user_id: &str, company_id: Option<String>, ip: String) {
    let revoked = match state.refresh_tokens.revoke_all(user_id).await {
        Ok(count) => count,
        Err(e) => {
            tracing::error!(error = %e, user_id = user_id, "Failed to revoke tokens after reuse");
            0
        }
    };
    state
        .audit
        .record(
            AuditEvent::new(AuditEventType::TokenReuseDetected)
                .with_user(user_id)
                .with_company(company_id)
                .with_ip(ip)
                .with_details(serde_json::json!({ "revoked": revoked }))
                .failed(AuthError::TokenReuseDetected.error_code()),
        )
        .await;
}

fn cleared(state: &AppState, jar: CookieJar) -> CookieJar {
    let jar = state.sessions.destroy_session(jar);
    state.sessions.clear_refresh_cookie(jar)
}

/// Rotate the refresh token and re-mint the session.
///
/// Presenting a consumed or revoked token revokes every refresh token of its
/// owner. Sessions already handed out stay valid until they expire.
#[utoipa::path(
    post,
    path = "/auth/refresh",
    tag = "Session",
    responses(
        (status = 200, description = "Session refreshed", body = StatusResponse),
        (status = 401, description = "Refresh token missing, invalid or reused"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn refresh_session(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    jar: CookieJar,
) -> Result<(CookieJar, Json<StatusResponse>), (CookieJar, AuthError)> {
    let Some(presented) = jar.get(REFRESH_COOKIE).map(|c| c.value().to_string()) else {
        return Err((jar, AuthError::Unauthorized));
    };

    let record = match state.refresh_tokens.inspect(&presented).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            tracing::debug!("Unknown refresh token presented");
            return Err((cleared(&state, jar), AuthError::Unauthorized));
        }
        Err(e) => {
            tracing::error!(error = %e, "Refresh token lookup failed");
            return Err((jar, AuthError::Unauthorized));
        }
    };

    let owner = record.owner.clone();
    match record.effective_state(chrono::Utc::now().timestamp()) {
        TokenState::Issued => {}
        TokenState::Expired => {
            tracing::debug!(user_id = %owner.user_id, "Expired refresh token presented");
            return Err((cleared(&state, jar), AuthError::Unauthorized));
        }
        TokenState::Consumed | TokenState::Revoked => {
            handle_reuse(&state, &owner.user_id, owner.company_id.clone(), ip).await;
            return Err((cleared(&state, jar), AuthError::TokenReuseDetected));
        }
    }

    let row = match state.verifier.lookup_directory(&owner.user_id).await {
        Ok(row) => row,
        Err(error) => return Err((jar, error)),
    };
    if row.as_ref().is_some_and(|r| !r.active) {
        if let Err(e) = state.refresh_tokens.revoke_all(&owner.user_id).await {
            tracing::error!(error = %e, user_id = %owner.user_id, "Failed to revoke tokens of inactive user");
        }
        state
            .audit
            .record(
                AuditEvent::new(AuditEventType::RefreshRejected)
                    .with_user(owner.user_id.clone())
                    .with_ip(ip)
                    .failed("account_inactive"),
            )
            .await;
        return Err((cleared(&state, jar), AuthError::Unauthorized));
    }

    let identity = refreshed_identity(&owner, row.as_ref());
    let successor = match generate_refresh_token() {
        Ok(token) => token,
        Err(error) => return Err((jar, error)),
    };

    match state
        .refresh_tokens
        .rotate(&presented, &successor, &identity, state.sessions.refresh_ttl())
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            // Lost a race for the same token: treated as reuse.
            handle_reuse(&state, &owner.user_id, owner.company_id.clone(), ip).await;
            return Err((cleared(&state, jar), AuthError::TokenReuseDetected));
        }
        Err(e) => {
            // The write may still have committed, so the presented token can
            // no longer be trusted to be live: drop it from the client too.
            tracing::error!(error = %e, user_id = %owner.user_id, "Refresh token rotation failed");
            return Err((cleared(&state, jar), AuthError::Unauthorized));
        }
    }

    let jar = match state.sessions.issue_session(jar, &identity) {
        Ok((jar, _)) => jar,
        Err(error) => return Err((CookieJar::new(), error)),
    };
    let jar = state.sessions.set_refresh_cookie(jar, successor);

    state
        .audit
        .record(
            AuditEvent::new(AuditEventType::RefreshRotated)
                .with_user(identity.user_id.clone())
                .with_company(identity.company_id.clone())
                .with_ip(ip),
        )
        .await;

    Ok((jar, StatusResponse::success()))
}

/// Revoke every refresh token of the caller and clear their cookies.
#[utoipa::path(
    post,
    path = "/auth/sign-out-everywhere",
    tag = "Session",
    security(("session" = []), ("bearer" = [])),
    responses(
        (status = 200, description = "All refresh tokens revoked", body = StatusResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn sign_out_everywhere(
    State(state): State<AppState>,
    Auth(user): Auth,
    ClientIp(ip): ClientIp,
    jar: CookieJar,
) -> Result<(CookieJar, Json<StatusResponse>), ApiError> {
    let revoked = state.refresh_tokens.revoke_all(&user.user_id).await?;

    state
        .audit
        .record(
            AuditEvent::new(AuditEventType::TokensRevoked)
                .with_user(user.user_id.clone())
                .with_company(user.company_id.clone())
                .with_ip(ip)
                .with_details(serde_json::json!({ "revoked": revoked, "reason": "sign_out_everywhere" })),
        )
        .await;

    Ok((cleared(&state, jar), StatusResponse::success()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::router;
    use crate::auth::session::SESSION_COOKIE;
    use crate::auth::Role;
    use crate::auth::refresh::{RefreshTokenRecord, RefreshTokenRepository, RotateOutcome};
    use crate::storage::memory::MemoryRefreshStore;
    use crate::storage::{AuditQuery, StoreError, StoreResult, Stores};
    use crate::test_support::{test_state, test_state_with_stores, TestState};
    use async_trait::async_trait;
    use std::sync::Arc;
    use axum_extra::extract::cookie::Cookie;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, Response, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn cookie_value(response: &Response<Body>, name: &str) -> Option<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| Cookie::parse(v.to_string()).ok())
            .find(|c| c.name() == name)
            .map(|c| c.value().to_string())
    }

    async fn body_json(response: Response<Body>) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn sign_in(state: &TestState, subject: &str, claims: Value) -> Response<Body> {
        let token = state.id_token(subject, claims).await;
        router(state.app.clone())
            .oneshot(
                Request::post("/auth/session")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(json!({ "idToken": token }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn refresh(state: &TestState, token: &str) -> Response<Body> {
        router(state.app.clone())
            .oneshot(
                Request::post("/auth/refresh")
                    .header(header::COOKIE, format!("{REFRESH_COOKIE}={token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn me(state: &TestState, session: &str) -> StatusCode {
        router(state.app.clone())
            .oneshot(
                Request::get("/auth/me")
                    .header(header::COOKIE, format!("{SESSION_COOKIE}={session}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn sign_in_sets_session_and_refresh_cookies() {
        let state = test_state().await;
        let response = sign_in(
            &state,
            "user_1",
            json!({ "custom_claims": { "role": "Company-Admin" }, "companyId": "acme" }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let session = cookie_value(&response, SESSION_COOKIE).unwrap();
        let refresh_token = cookie_value(&response, REFRESH_COOKIE).unwrap();
        assert_eq!(body_json(response).await, json!({ "status": "success" }));

        let claims = state.app.sessions.decode_session(&session).unwrap();
        assert_eq!(claims.role, Role::CompanyAdmin);
        assert_eq!(claims.cid.as_deref(), Some("acme"));

        let owner = state.app.refresh_tokens.verify(&refresh_token).await.unwrap().unwrap();
        assert_eq!(owner.user_id, "user_1");
    }

    #[tokio::test]
    async fn missing_id_token_is_400() {
        let state = test_state().await;
        for body in ["{}", r#"{"idToken":"  "}"#, "not json"] {
            let response = router(state.app.clone())
                .oneshot(
                    Request::post("/auth/session")
                        .header(header::CONTENT_TYPE, "application/json")
                        .body(Body::from(body))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {body}");
        }
    }

    #[tokio::test]
    async fn rejected_id_token_sets_no_cookie() {
        let state = test_state().await;
        let response = router(state.app.clone())
            .oneshot(
                Request::post("/auth/session")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(json!({ "idToken": "a.b.c" }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        assert_eq!(body_json(response).await, json!({ "error": "Failed to create session" }));
    }

    #[tokio::test]
    async fn refresh_rotates_and_old_token_is_dead() {
        let state = test_state().await;
        let first = sign_in(&state, "user_1", json!({})).await;
        let token = cookie_value(&first, REFRESH_COOKIE).unwrap();

        let response = refresh(&state, &token).await;
        assert_eq!(response.status(), StatusCode::OK);
        let next = cookie_value(&response, REFRESH_COOKIE).unwrap();
        assert_ne!(next, token);
        assert!(cookie_value(&response, SESSION_COOKIE).is_some());

        assert!(state.app.refresh_tokens.verify(&token).await.unwrap().is_none());
        assert!(state.app.refresh_tokens.verify(&next).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reuse_revokes_refresh_tokens_but_not_sessions() {
        let state = test_state().await;
        let first = sign_in(&state, "user_1", json!({})).await;
        let original = cookie_value(&first, REFRESH_COOKIE).unwrap();

        let rotated = refresh(&state, &original).await;
        let current_refresh = cookie_value(&rotated, REFRESH_COOKIE).unwrap();
        let current_session = cookie_value(&rotated, SESSION_COOKIE).unwrap();

        // Replaying the consumed token looks like theft.
        let replay = refresh(&state, &original).await;
        assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(cookie_value(&replay, REFRESH_COOKIE).as_deref(), Some(""));

        // Every refresh token of the user is gone...
        assert!(state.app.refresh_tokens.verify(&current_refresh).await.unwrap().is_none());
        assert_eq!(refresh(&state, &current_refresh).await.status(), StatusCode::UNAUTHORIZED);

        // ...while the stateless session already handed out keeps working.
        assert_eq!(me(&state, &current_session).await, StatusCode::OK);

        let events = state
            .app
            .audit
            .read_events(
                chrono::Utc::now().date_naive(),
                &AuditQuery {
                    user_id: Some("user_1".into()),
                    event_type: Some(AuditEventType::TokenReuseDetected),
                },
            )
            .await
            .unwrap();
        assert!(!events.is_empty());
    }

    #[tokio::test]
    async fn unknown_or_missing_refresh_token_is_401() {
        let state = test_state().await;
        assert_eq!(refresh(&state, "not-a-token").await.status(), StatusCode::UNAUTHORIZED);

        let response = router(state.app.clone())
            .oneshot(Request::post("/auth/refresh").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn refresh_picks_up_directory_role_change() {
        let state = test_state().await;
        state.add_user("user_1", "employee", Some("acme")).await;
        let first = sign_in(&state, "user_1", json!({})).await;
        let token = cookie_value(&first, REFRESH_COOKIE).unwrap();

        state.add_user("user_1", "hr_admin", Some("acme")).await;
        let response = refresh(&state, &token).await;
        let session = cookie_value(&response, SESSION_COOKIE).unwrap();
        assert_eq!(state.app.sessions.decode_session(&session).unwrap().role, Role::HrAdmin);
    }

    #[tokio::test]
    async fn deactivated_user_cannot_refresh() {
        let state = test_state().await;
        state.add_user("user_1", "employee", Some("acme")).await;
        let first = sign_in(&state, "user_1", json!({})).await;
        let token = cookie_value(&first, REFRESH_COOKIE).unwrap();

        crate::storage::UserDirectory::set_active(state.directory.as_ref(), "user_1", false)
            .await
            .unwrap();
        assert_eq!(refresh(&state, &token).await.status(), StatusCode::UNAUTHORIZED);
        assert!(state.app.refresh_tokens.verify(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_session_is_idempotent() {
        let state = test_state().await;
        for _ in 0..2 {
            let response = router(state.app.clone())
                .oneshot(Request::delete("/auth/session").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(cookie_value(&response, SESSION_COOKIE).as_deref(), Some(""));
        }
    }

    #[tokio::test]
    async fn sign_out_everywhere_revokes_all_refresh_tokens() {
        let state = test_state().await;
        let a = sign_in(&state, "user_1", json!({})).await;
        let b = sign_in(&state, "user_1", json!({})).await;
        let session = cookie_value(&a, SESSION_COOKIE).unwrap();
        let tokens = [
            cookie_value(&a, REFRESH_COOKIE).unwrap(),
            cookie_value(&b, REFRESH_COOKIE).unwrap(),
        ];

        let response = router(state.app.clone())
            .oneshot(
                Request::post("/auth/sign-out-everywhere")
                    .header(header::COOKIE, format!("{SESSION_COOKIE}={session}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        for token in &tokens {
            assert!(state.app.refresh_tokens.verify(token).await.unwrap().is_none());
        }
    }

    /// Commits the rotation, then reports failure, as a timed-out write would.
    struct CommitThenFail(MemoryRefreshStore);

    #[async_trait]
    impl RefreshTokenRepository for CommitThenFail {
        async fn insert(&self, record: RefreshTokenRecord) -> StoreResult<()> {
            self.0.insert(record).await
        }

        async fn get(&self, token_hash: &str) -> StoreResult<Option<RefreshTokenRecord>> {
            self.0.get(token_hash).await
        }

        async fn consume_and_insert(
            &self,
            old_hash: &str,
            successor: RefreshTokenRecord,
            now: i64,
        ) -> StoreResult<RotateOutcome> {
            self.0.consume_and_insert(old_hash, successor, now).await?;
            Err(StoreError::Timeout)
        }

        async fn revoke(&self, token_hash: &str, now: i64) -> StoreResult<()> {
            self.0.revoke(token_hash, now).await
        }

        async fn revoke_all(&self, user_id: &str, now: i64) -> StoreResult<usize> {
            self.0.revoke_all(user_id, now).await
        }

        async fn purge(&self, cutoff: i64) -> StoreResult<usize> {
            self.0.purge(cutoff).await
        }

        async fn ping(&self) -> StoreResult<()> {
            self.0.ping().await
        }
    }

    #[tokio::test]
    async fn failed_rotation_clears_cookies() {
        let stores = Stores {
            refresh_tokens: Arc::new(CommitThenFail(MemoryRefreshStore::new())),
            ..Stores::in_memory()
        };
        let state = test_state_with_stores(&[], stores).await;
        let first = sign_in(&state, "user_1", json!({})).await;
        let token = cookie_value(&first, REFRESH_COOKIE).unwrap();

        let response = refresh(&state, &token).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(cookie_value(&response, REFRESH_COOKIE).as_deref(), Some(""));
        assert_eq!(cookie_value(&response, SESSION_COOKIE).as_deref(), Some(""));

        // The consumed token really was consumed behind the error.
        assert!(state.app.refresh_tokens.verify(&token).await.unwrap().is_none());
    }
}
