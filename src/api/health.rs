// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

/// Health check response with individual component status.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyResponse {
    /// Overall health status ("ok" or "degraded").
    pub status: String,
    /// Individual health checks and their results.
    pub checks: HealthChecks,
}

/// Individual health check results.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthChecks {
    /// Whether the service process is running.
    pub service: String,
    /// Refresh-token store reachability.
    pub store: String,
    /// Identity provider readiness (JWKS keys loaded or fetchable).
    pub identity_provider: String,
}

/// Simple health check response for liveness checks.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

fn check_label(ok: bool) -> String {
    if ok { "ok" } else { "unavailable" }.to_string()
}

/// Liveness handler.
///
/// Always returns 200 if the process is running.
/// Does not check dependencies - use readiness for that.
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness handler.
///
/// Returns 503 while the store or the identity provider is unreachable.
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Service is ready", body = ReadyResponse),
        (status = 503, description = "Service is not ready", body = ReadyResponse)
    )
)]
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let store_ok = match state.refresh_tokens.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness: store unavailable");
            false
        }
    };

    let provider = state.verifier.provider();
    let provider_ok = match tokio::time::timeout(state.config.provider_timeout, provider.check_ready()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, provider = provider.name(), "Readiness: identity provider unavailable");
            false
        }
        Err(_) => {
            tracing::warn!(provider = provider.name(), "Readiness: identity provider check timed out");
            false
        }
    };

    let all_ok = store_ok && provider_ok;
    let response = ReadyResponse {
        status: if all_ok { "ok" } else { "degraded" }.to_string(),
        checks: HealthChecks {
            service: "ok".to_string(),
            store: check_label(store_ok),
            identity_provider: check_label(provider_ok),
        },
    };

    let status = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state;

    #[tokio::test]
    async fn liveness_is_ok() {
        assert_eq!(liveness().await.0.status, "ok");
    }

    #[tokio::test]
    async fn ready_with_in_memory_store_and_shared_secret() {
        let state = test_state().await;
        let (status, Json(body)) = readiness(State(state.app)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.checks.store, "ok");
        assert_eq!(body.checks.identity_provider, "ok");
    }
}
