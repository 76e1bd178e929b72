//! Unified error handling for the Mentions API.
//!
//! Core layers raise typed errors; the HTTP boundary renders them as a
//! problem+json [`ApiError`] with a stable machine-readable code and the
//! request correlation id.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::telemetry::current_trace_id;

/// Unified API error response structure.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl ApiError {
    /// Create a new API error with the given status code and message.
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
            trace_id: current_trace_id(),
        }
    }

    /// Add details to the error.
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );
        (self.status, headers, axum::Json(self)).into_response()
    }
}

/// Create a validation error (400) with field details.
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}

/// Create an unauthorized error (401).
pub fn unauthorized(message: Option<&str>) -> ApiError {
    ApiError::new(
        StatusCode::UNAUTHORIZED,
        "UNAUTHORIZED",
        message.unwrap_or("Authentication required"),
    )
}

/// Create a not-found error (404).
pub fn not_found(message: &str) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
}

/// Create an upstream error (502) for aggregator failures surfaced to clients.
pub fn upstream_error(message: &str) -> ApiError {
    ApiError::new(StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", message)
}

/// Wrapper for the error sources handlers actually encounter.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{}", .0.message)]
    Api(ApiError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
    #[error(transparent)]
    Json(#[from] JsonRejection),
    #[error(transparent)]
    Db(#[from] sea_orm::DbErr),
}

impl From<ApiError> for AppError {
    fn from(error: ApiError) -> Self {
        AppError::Api(error)
    }
}

impl From<crate::engine::EngineError> for AppError {
    fn from(err: crate::engine::EngineError) -> Self {
        use crate::engine::EngineError;
        use crate::gateway::BreakerError;

        match err {
            EngineError::MentionNotFound(id) => {
                AppError::Api(not_found(&format!("mention {id} does not exist")))
            }
            EngineError::Validation(message) => AppError::Api(ApiError::new(
                StatusCode::BAD_REQUEST,
                "VALIDATION_FAILED".to_string(),
                message,
            )),
            EngineError::Db(db_err) => AppError::Db(db_err),
            EngineError::Upstream(breaker_err) => match breaker_err {
                BreakerError::Open { .. } => AppError::Api(ApiError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "UPSTREAM_UNAVAILABLE".to_string(),
                    breaker_err.to_string(),
                )),
                other => AppError::Api(upstream_error(&other.to_string())),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let api_error = match self {
            AppError::Api(err) => err,
            AppError::Json(err) => ApiError::new(
                StatusCode::BAD_REQUEST,
                "VALIDATION_FAILED".to_string(),
                err.to_string(),
            ),
            AppError::Db(sea_orm::DbErr::RecordNotFound(message)) => {
                ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND".to_string(), message)
            }
            AppError::Db(err) => {
                tracing::error!(error = %err, "database error reached the HTTP boundary");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "An internal error occurred",
                )
            }
            AppError::Anyhow(err) => {
                tracing::error!(error = %err, "unclassified error reached the HTTP boundary");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "An internal error occurred",
                )
            }
        };
        api_error.into_response()
    }
}
