// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    body::Body,
    http::{header, HeaderValue, Method, Request},
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::{
        rate_limit::{enforce_rate_limit, EndpointClass},
        session::SESSION_COOKIE,
        AuthenticatedUser, CredentialKind, Role,
    },
    state::AppState,
    storage::{AuditEvent, AuditEventType, DirectoryUser},
};

pub mod admin;
pub mod employees;
pub mod health;
pub mod session;
pub mod users;
pub mod verify;

pub fn router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route(
            "/auth/session",
            post(session::create_session).delete(session::delete_session),
        )
        .route("/auth/verify-token", post(verify::verify_token))
        .route("/auth/verify-session", post(verify::verify_session))
        .route("/auth/sign-out-everywhere", post(session::sign_out_everywhere))
        .route("/auth/me", get(users::get_current_user))
        .route_layer(middleware::from_fn_with_state(
            (state.clone(), EndpointClass::Auth),
            enforce_rate_limit,
        ));

    let refresh_routes = Router::new()
        .route("/auth/refresh", post(session::refresh_session))
        .route_layer(middleware::from_fn_with_state(
            (state.clone(), EndpointClass::Refresh),
            enforce_rate_limit,
        ));

    let admin_routes = Router::new()
        .route("/admin/audit", get(admin::query_audit_logs))
        .route(
            "/companies/{company_id}/employees/{user_id}/deactivate",
            post(employees::deactivate_employee),
        )
        .route(
            "/companies/{company_id}/employees/{user_id}/role",
            put(employees::change_role),
        )
        .route_layer(middleware::from_fn_with_state(
            (state.clone(), EndpointClass::Admin),
            enforce_rate_limit,
        ));

    let cors = state.config.cors_allowed_origin.clone();

    let router = Router::new()
        .merge(auth_routes)
        .merge(refresh_routes)
        .merge(admin_routes)
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-");
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri().path(),
                request_id = %request_id,
            )
        }))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    match cors.as_deref().and_then(|origin| HeaderValue::from_str(origin).ok()) {
        Some(origin) => router.layer(cors_layer(origin)),
        None => router,
    }
}

/// Credentialed CORS for the single web front-end origin.
fn cors_layer(origin: HeaderValue) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
        components.add_security_scheme(
            "session",
            SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new(SESSION_COOKIE))),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        session::create_session,
        session::delete_session,
        session::refresh_session,
        session::sign_out_everywhere,
        verify::verify_token,
        verify::verify_session,
        users::get_current_user,
        employees::deactivate_employee,
        employees::change_role,
        admin::query_audit_logs,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            session::CreateSessionRequest,
            session::StatusResponse,
            verify::VerifyTokenRequest,
            verify::VerifySessionRequest,
            users::UserMeResponse,
            employees::ChangeRoleRequest,
            admin::AuditLogResponse,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse,
            AuthenticatedUser,
            CredentialKind,
            Role,
            DirectoryUser,
            AuditEvent,
            AuditEventType
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Session", description = "Session and refresh token lifecycle"),
        (name = "Verify", description = "Credential verification"),
        (name = "Users", description = "Current user"),
        (name = "Employees", description = "Tenant-scoped employee management"),
        (name = "Admin", description = "Platform operator tooling"),
        (name = "Health", description = "Liveness and readiness")
    )
)]
pub struct ApiDoc;
