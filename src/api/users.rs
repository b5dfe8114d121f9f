// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User endpoints.

use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::{Auth, AuthenticatedUser, CredentialKind, Role};

/// Response for GET /auth/me
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserMeResponse {
    /// User's unique ID (identity provider subject)
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// User's canonical role
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_id: Option<String>,
    /// Session ID (if authenticated with the session cookie)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Credential expiry (Unix timestamp)
    pub expires_at: i64,
    pub via: CredentialKind,
}

impl From<AuthenticatedUser> for UserMeResponse {
    fn from(user: AuthenticatedUser) -> Self {
        Self {
            user_id: user.user_id,
            email: user.email,
            role: user.role,
            company_id: user.company_id,
            session_id: user.session_id,
            expires_at: user.expires_at,
            via: user.via,
        }
    }
}

/// Get the current authenticated user's information.
#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Users",
    security(("session" = []), ("bearer" = [])),
    responses(
        (status = 200, description = "User information", body = UserMeResponse),
        (status = 401, description = "Unauthorized - invalid or missing credential"),
    )
)]
pub async fn get_current_user(Auth(user): Auth) -> Json<UserMeResponse> {
    Json(user.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::router;
    use crate::auth::session::SessionIdentity;
    use crate::test_support::test_state;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use tower::ServiceExt;

    #[test]
    fn user_me_response_from_authenticated_user() {
        let user = AuthenticatedUser {
            user_id: "user_123".to_string(),
            email: Some("a@example.com".into()),
            role: Role::HrAdmin,
            company_id: Some("acme".into()),
            session_id: Some("sess_abc".to_string()),
            expires_at: 42,
            via: CredentialKind::SessionCookie,
        };

        let response: UserMeResponse = user.into();
        assert_eq!(response.user_id, "user_123");
        assert_eq!(response.role, Role::HrAdmin);
        assert_eq!(response.company_id.as_deref(), Some("acme"));
        assert_eq!(response.session_id, Some("sess_abc".to_string()));
    }

    #[tokio::test]
    async fn me_with_bearer_id_token() {
        let state = test_state().await;
        let token = state
            .id_token("user_5", serde_json::json!({ "role": "super-admin" }))
            .await;

        let response = router(state.app.clone())
            .oneshot(
                Request::get("/auth/me")
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["role"], "super_admin");
        assert_eq!(body["via"], "idToken");
    }

    #[tokio::test]
    async fn me_redirects_page_navigation_without_session() {
        let state = test_state().await;
        let response = router(state.app.clone())
            .oneshot(
                Request::get("/auth/me")
                    .header(header::ACCEPT, "text/html")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/sign-in");
    }

    #[tokio::test]
    async fn deactivated_user_session_is_rejected() {
        let state = test_state().await;
        state.add_user("user_7", "employee", Some("acme")).await;
        let cookie = state.session_cookie(&SessionIdentity {
            user_id: "user_7".into(),
            email: None,
            role: Role::Employee,
            company_id: Some("acme".into()),
        });
        crate::storage::UserDirectory::set_active(state.directory.as_ref(), "user_7", false)
            .await
            .unwrap();

        let response = router(state.app.clone())
            .oneshot(
                Request::get("/auth/me")
                    .header(header::COOKIE, cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
