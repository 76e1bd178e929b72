//! Server composition root.
//!
//! Builds the axum router over an explicit [`AppState`] (no process-wide
//! singletons): configuration, store, social gateway, and mention engine are
//! constructed once in `main` and handed down.

use std::sync::Arc;

use axum::{
    Router,
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
};
use sea_orm::DatabaseConnection;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::auth;
use crate::config::AppConfig;
use crate::engine::MentionEngine;
use crate::gateway::SocialGateway;
use crate::handlers;
use crate::telemetry::{TraceContext, with_trace_context};

/// Application state shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub engine: Arc<MentionEngine>,
    pub social: Arc<SocialGateway>,
}

/// Binds every request to a trace context (from `x-request-id` or freshly
/// generated) so logs and error responses correlate.
async fn trace_middleware(request: Request, next: Next) -> Response {
    let context = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|id| TraceContext {
            trace_id: id.to_string(),
        })
        .unwrap_or_else(TraceContext::generate);

    with_trace_context(context, next.run(request)).await
}

/// Creates and configures the axum application router.
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/mentions", get(handlers::mentions::list_mentions))
        .route("/v1/mentions/{id}", put(handlers::mentions::update_mention))
        .route(
            "/v1/mentions/{id}/reply",
            post(handlers::mentions::reply_to_mention),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    let open = Router::new()
        .route("/v1/users/login", post(handlers::users::login))
        .route("/v1/status", get(handlers::status::liveness))
        .route("/v1/status/health", get(handlers::status::health));

    Router::new()
        .merge(protected)
        .merge(open)
        .layer(middleware::from_fn(trace_middleware))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Starts the server with the given state.
pub async fn run_server(state: AppState) -> Result<(), Box<dyn std::error::Error>> {
    let addr = state
        .config
        .bind_addr()
        .map_err(|e| format!("invalid server address: {e}"))?;

    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// OpenAPI documentation.
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::mentions::list_mentions,
        crate::handlers::mentions::update_mention,
        crate::handlers::mentions::reply_to_mention,
        crate::handlers::users::login,
        crate::handlers::status::liveness,
        crate::handlers::status::health,
    ),
    components(
        schemas(
            crate::handlers::mentions::MentionsResponse,
            crate::handlers::mentions::MentionInfo,
            crate::handlers::mentions::MetaInfo,
            crate::handlers::mentions::UpdateMentionBody,
            crate::handlers::mentions::ReplyBody,
            crate::handlers::mentions::ReplyResponse,
            crate::handlers::mentions::TaskInfo,
            crate::handlers::users::LoginRequest,
            crate::handlers::users::LoginResponse,
            crate::handlers::users::UserInfo,
            crate::handlers::status::ServiceStatus,
        )
    ),
    info(
        title = "Mentions API",
        description = "Social-media mention triage and reply service",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
