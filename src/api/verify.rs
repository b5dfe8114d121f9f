// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Credential verification endpoints for other services.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::auth::rate_limit::ClientIp;
use crate::auth::{AuthError, AuthenticatedUser, CredentialKind};
use crate::state::AppState;
use crate::storage::{AuditEvent, AuditEventType};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyTokenRequest {
    pub id_token: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifySessionRequest {
    pub session_cookie: Option<String>,
}

async fn verify(
    state: &AppState,
    ip: String,
    credential: Option<String>,
    kind: CredentialKind,
) -> Result<Json<AuthenticatedUser>, AuthError> {
    let credential = credential.unwrap_or_default();
    match state.verifier.authenticate(&credential, kind).await {
        Ok(user) => Ok(Json(user)),
        Err(error) => {
            state
                .audit
                .record(
                    AuditEvent::new(AuditEventType::AuthFailure)
                        .with_ip(ip)
                        .with_details(serde_json::json!({ "kind": kind }))
                        .failed(error.error_code()),
                )
                .await;
            Err(error)
        }
    }
}

/// Verify an identity provider ID token and return the resolved identity.
#[utoipa::path(
    post,
    path = "/auth/verify-token",
    tag = "Verify",
    request_body = VerifyTokenRequest,
    responses(
        (status = 200, description = "Token valid", body = AuthenticatedUser),
        (status = 401, description = "Token missing or invalid")
    )
)]
pub async fn verify_token(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    body: Result<Json<VerifyTokenRequest>, JsonRejection>,
) -> Result<Json<AuthenticatedUser>, AuthError> {
    let token = body.ok().and_then(|Json(body)| body.id_token);
    verify(&state, ip, token, CredentialKind::IdToken).await
}

/// Verify a session cookie value and return the resolved identity.
#[utoipa::path(
    post,
    path = "/auth/verify-session",
    tag = "Verify",
    request_body = VerifySessionRequest,
    responses(
        (status = 200, description = "Session valid", body = AuthenticatedUser),
        (status = 401, description = "Session missing or invalid")
    )
)]
pub async fn verify_session(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    body: Result<Json<VerifySessionRequest>, JsonRejection>,
) -> Result<Json<AuthenticatedUser>, AuthError> {
    let cookie = body.ok().and_then(|Json(body)| body.session_cookie);
    verify(&state, ip, cookie, CredentialKind::SessionCookie).await
}

#[cfg(test)]
mod tests {
    use crate::api::router;
    use crate::auth::session::SessionIdentity;
    use crate::auth::Role;
    use crate::test_support::test_state;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn post(app: axum::Router, path: &str, body: Value) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::post(path)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn verify_token_returns_identity() {
        let state = test_state().await;
        let token = state
            .id_token("user_9", json!({ "extension_Role": "HR", "tenantId": "globex" }))
            .await;

        let (status, body) = post(router(state.app.clone()), "/auth/verify-token", json!({ "idToken": token })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["userId"], "user_9");
        assert_eq!(body["role"], "hr_admin");
        assert_eq!(body["companyId"], "globex");
    }

    #[tokio::test]
    async fn verify_token_rejects_missing_and_forged() {
        let state = test_state().await;
        let (status, body) = post(router(state.app.clone()), "/auth/verify-token", json!({})).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());

        let (status, _) = post(
            router(state.app.clone()),
            "/auth/verify-token",
            json!({ "idToken": "eyJhbGciOiJIUzI1NiJ9.e30.c2lnbmF0dXJl" }),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn verify_session_round_trips_role_and_tenant() {
        let state = test_state().await;
        let cookie = state.session_cookie(&SessionIdentity {
            user_id: "user_2".into(),
            email: None,
            role: Role::CompanyAdmin,
            company_id: Some("acme".into()),
        });
        let value = cookie.split_once('=').unwrap().1.to_string();

        let (status, body) = post(
            router(state.app.clone()),
            "/auth/verify-session",
            json!({ "sessionCookie": value }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["role"], "company_admin");
        assert_eq!(body["companyId"], "acme");
        assert_eq!(body["via"], "sessionCookie");
    }
}
