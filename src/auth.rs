//! Bearer authentication for operator endpoints.
//!
//! Tokens are JWTs (HS256) carrying the operator's id and email. The
//! middleware validates the token and injects an [`Actor`] extension;
//! handlers receive it as an extractor. Audits and task rows record the
//! actor's email.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::config::JwtConfig;
use crate::error::{ApiError, unauthorized};
use crate::server::AppState;

/// The authenticated user on whose behalf a core operation runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub id: i64,
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: i64,
    email: String,
    exp: i64,
}

/// Issues a bearer token for the given user.
pub fn issue_token(
    config: &JwtConfig,
    user_id: i64,
    email: &str,
    now: DateTime<Utc>,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        exp: now.timestamp() + config.expires_in_seconds as i64,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
}

/// Validates a bearer token and returns the actor it carries.
pub fn verify_token(config: &JwtConfig, token: &str) -> Result<Actor, ApiError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| unauthorized(Some("Invalid bearer token")))?;

    Ok(Actor {
        id: data.claims.sub,
        email: data.claims.email,
    })
}

/// Middleware guarding operator routes: validates the bearer token and makes
/// the actor available to handlers.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .ok_or_else(|| unauthorized(Some("Missing Authorization header")))?
        .to_str()
        .map_err(|_| unauthorized(Some("Invalid Authorization header")))?
        .strip_prefix("Bearer ")
        .ok_or_else(|| unauthorized(Some("Authorization header must use Bearer scheme")))?
        .to_string();

    let actor = verify_token(&state.config.jwt, &token)?;
    tracing::debug!(actor = %actor.email, "authenticated operator request");

    request.extensions_mut().insert(actor);
    Ok(next.run(request).await)
}

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Actor>()
            .cloned()
            .ok_or_else(|| unauthorized(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret".to_string(),
            expires_in_seconds: 3600,
        }
    }

    #[test]
    fn token_round_trip() {
        let token = issue_token(&config(), 7, "op@example.com", Utc::now()).unwrap();
        let actor = verify_token(&config(), &token).unwrap();
        assert_eq!(actor.id, 7);
        assert_eq!(actor.email, "op@example.com");
    }

    #[test]
    fn expired_token_is_rejected() {
        let issued_at = Utc::now() - chrono::Duration::hours(2);
        let token = issue_token(&config(), 7, "op@example.com", issued_at).unwrap();
        assert!(verify_token(&config(), &token).is_err());
    }

    #[test]
    fn token_with_wrong_secret_is_rejected() {
        let other = JwtConfig {
            secret: "different".to_string(),
            expires_in_seconds: 3600,
        };
        let token = issue_token(&other, 7, "op@example.com", Utc::now()).unwrap();
        assert!(verify_token(&config(), &token).is_err());
    }

    #[test]
    fn garbage_token_is_rejected() {
        assert!(verify_token(&config(), "not-a-jwt").is_err());
    }
}
