//! Liveness and health endpoints.
//!
//! `/v1/status` answers as long as the process and store are up;
//! `/v1/status/health` aggregates the persisted circuit breaker rows and
//! degrades to 503 while any circuit is not CLOSED.

use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::gateway::social::HealthSnapshot;
use crate::server::AppState;

/// Basic service information for the liveness endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct ServiceStatus {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/v1/status",
    responses(
        (status = 200, description = "Service is alive", body = ServiceStatus)
    ),
    tag = "status"
)]
pub async fn liveness(State(state): State<AppState>) -> Result<Json<ServiceStatus>, ApiError> {
    crate::db::health_check(&state.db).await.map_err(|err| {
        tracing::error!(error = %err, "liveness database check failed");
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "DATABASE_UNAVAILABLE",
            "Database is not reachable",
        )
    })?;

    Ok(Json(ServiceStatus {
        status: "ok".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

/// Aggregated circuit health: 200 when every circuit is CLOSED, 503 otherwise.
#[utoipa::path(
    get,
    path = "/v1/status/health",
    responses(
        (status = 200, description = "All circuits closed"),
        (status = 503, description = "At least one circuit is open or half-open"),
    ),
    tag = "status"
)]
pub async fn health(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<HealthSnapshot>), ApiError> {
    let snapshot = state.social.health_snapshot().await.map_err(|err| {
        tracing::error!(error = %err, "failed to read circuit breaker states");
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "Could not read circuit state",
        )
    })?;

    let status = if snapshot.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    Ok((status, Json(snapshot)))
}
