//! Login endpoint: exchanges an operator email for a bearer token.

use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::issue_token;
use crate::error::{AppError, validation_error};
use crate::repositories::UserRepository;
use crate::server::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub expires_in_seconds: u64,
    pub user: UserInfo,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserInfo {
    pub id: i64,
    pub email: String,
}

/// Issues a bearer token, creating the user row on first login.
#[utoipa::path(
    post,
    path = "/v1/users/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued", body = LoginResponse),
        (status = 400, description = "Invalid email"),
    ),
    tag = "users"
)]
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let email = body.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(validation_error(
            "email must be a valid address",
            serde_json::json!({ "email": "invalid" }),
        )
        .into());
    }

    let now = chrono::Utc::now();
    let user = UserRepository::find_or_create_by_email(&state.db, &email, now).await?;

    let token = issue_token(&state.config.jwt, user.id, &user.email, now).map_err(|err| {
        tracing::error!(error = %err, "failed to sign bearer token");
        anyhow::anyhow!("token signing failed")
    })?;

    Ok(Json(LoginResponse {
        token,
        expires_in_seconds: state.config.jwt.expires_in_seconds,
        user: UserInfo {
            id: user.id,
            email: user.email,
        },
    }))
}
