//! Mention triage endpoints: list, update, reply.

use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::auth::Actor;
use crate::engine::{ListMeta, ReplyRequest, UpdateMentionPatch, double_option};
use crate::error::AppError;
use crate::models::mention::{MentionKind, MentionState};
use crate::models::task::TaskCode;
use crate::models::{mention, task};
use crate::server::AppState;

/// Query parameters for listing mentions.
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListMentionsQuery {
    /// How many milliseconds to wait for a fresh upstream sync (default 2000).
    #[serde(rename = "waitMs")]
    pub wait_ms: Option<u64>,
}

/// Mention as rendered to operators.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MentionInfo {
    pub id: i64,
    pub content: String,
    pub social_media_platform_ref: String,
    pub social_media_api_post_ref: Option<String>,
    pub platform: String,
    #[serde(rename = "type")]
    pub kind: MentionKind,
    pub state: Option<MentionState>,
    pub disposition: Option<String>,
    pub user_id: Option<i64>,
    pub mention_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<mention::Model> for MentionInfo {
    fn from(model: mention::Model) -> Self {
        Self {
            id: model.id,
            content: model.content,
            social_media_platform_ref: model.social_media_platform_ref,
            social_media_api_post_ref: model.social_media_api_post_ref,
            platform: model.platform,
            kind: model.kind,
            state: model.state,
            disposition: model.disposition,
            user_id: model.user_id,
            mention_id: model.mention_id,
            created_at: model.created_at.to_rfc3339(),
            updated_at: model.updated_at.to_rfc3339(),
        }
    }
}

/// Sync metadata rendered to operators.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetaInfo {
    pub is_syncing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl From<ListMeta> for MetaInfo {
    fn from(meta: ListMeta) -> Self {
        Self {
            is_syncing: meta.is_syncing,
            errors: meta.errors,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MentionsResponse {
    pub result: Vec<MentionInfo>,
    pub meta: MetaInfo,
}

/// Operator patch body; `{"userId": null}` clears the assignment.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMentionBody {
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<i64>)]
    pub user_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub disposition: Option<Option<String>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReplyBody {
    pub content: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub id: i64,
    pub code: TaskCode,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub created_by: String,
}

impl From<task::Model> for TaskInfo {
    fn from(model: task::Model) -> Self {
        Self {
            id: model.id,
            code: model.code,
            started_at: model.started_at.map(|dt| dt.to_rfc3339()),
            finished_at: model.finished_at.map(|dt| dt.to_rfc3339()),
            created_by: model.created_by,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReplyResponse {
    pub mention: MentionInfo,
    pub task: TaskInfo,
    pub ignored: bool,
}

/// List all mentions, racing a background sync against `waitMs`.
#[utoipa::path(
    get,
    path = "/v1/mentions",
    security(("bearer_auth" = [])),
    params(ListMentionsQuery),
    responses(
        (status = 200, description = "Mentions listed", body = MentionsResponse),
        (status = 401, description = "Missing or invalid bearer token"),
    ),
    tag = "mentions"
)]
pub async fn list_mentions(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<ListMentionsQuery>,
) -> Result<Json<MentionsResponse>, AppError> {
    let wait = query.wait_ms.map(Duration::from_millis);
    let (mentions, meta) = state.engine.clone().list_mentions(wait, &actor).await?;

    Ok(Json(MentionsResponse {
        result: mentions.into_iter().map(MentionInfo::from).collect(),
        meta: meta.into(),
    }))
}

/// Update a mention: assign/unassign an operator, set disposition.
#[utoipa::path(
    put,
    path = "/v1/mentions/{id}",
    security(("bearer_auth" = [])),
    request_body = UpdateMentionBody,
    responses(
        (status = 200, description = "Mention updated", body = MentionInfo),
        (status = 404, description = "Mention does not exist"),
    ),
    tag = "mentions"
)]
pub async fn update_mention(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(body): Json<UpdateMentionBody>,
) -> Result<Json<MentionInfo>, AppError> {
    let patch = UpdateMentionPatch {
        user_id: body.user_id,
        disposition: body.disposition,
    };
    let updated = state.engine.update_mention(id, patch, &actor).await?;
    Ok(Json(updated.into()))
}

/// Reply to a mention exactly once.
#[utoipa::path(
    post,
    path = "/v1/mentions/{id}/reply",
    security(("bearer_auth" = [])),
    request_body = ReplyBody,
    responses(
        (status = 200, description = "Reply enqueued (and processed best-effort)", body = ReplyResponse),
        (status = 400, description = "Invalid reply content"),
        (status = 404, description = "Mention does not exist"),
    ),
    tag = "mentions"
)]
pub async fn reply_to_mention(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(body): Json<ReplyBody>,
) -> Result<Json<ReplyResponse>, AppError> {
    let receipt = state
        .engine
        .reply_to_mention(ReplyRequest {
            mention_id: id,
            content: body.content,
            actor,
        })
        .await?;

    Ok(Json(ReplyResponse {
        mention: receipt.mention.into(),
        task: receipt.task.into(),
        ignored: receipt.ignored,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::issue_token;
    use crate::clock::SystemClock;
    use crate::config::AppConfig;
    use crate::engine::{EngineConfig, MentionEngine};
    use crate::gateway::http::{GatewayError, Transport, UpstreamRequest};
    use crate::gateway::{BreakerConfig, RetryConfig, SocialGateway};
    use crate::models::mention::ActiveModel as MentionActiveModel;
    use crate::repositories::AuditRepository;
    use crate::repositories::audit::EVENT_ASSIGNMENT;
    use crate::server::{AppState, create_app};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use chrono::Utc;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
    use std::sync::Arc;
    use tower::ServiceExt;

    /// Transport answering every call with an empty history.
    struct QuietTransport;

    #[async_trait]
    impl Transport for QuietTransport {
        async fn request(&self, _request: UpstreamRequest) -> Result<serde_json::Value, GatewayError> {
            Ok(serde_json::json!({ "history": [] }))
        }
    }

    async fn setup_state() -> (AppState, DatabaseConnection) {
        // A single pooled connection so background sync tasks see the same
        // in-memory database as the request path.
        let mut options = sea_orm::ConnectOptions::new("sqlite::memory:".to_owned());
        options.max_connections(1);
        let db = Database::connect(options).await.unwrap();
        Migrator::up(&db, None).await.unwrap();

        let config = Arc::new(AppConfig::default());
        let clock = Arc::new(SystemClock);
        let social = Arc::new(SocialGateway::new(
            db.clone(),
            Arc::new(QuietTransport),
            clock.clone(),
            &config.social,
            BreakerConfig::default(),
            RetryConfig::default(),
        ));
        let engine = MentionEngine::new(
            db.clone(),
            social.clone(),
            clock,
            EngineConfig::default(),
        );

        (
            AppState {
                config,
                db: db.clone(),
                engine,
                social,
            },
            db,
        )
    }

    async fn seed_mention(db: &DatabaseConnection, platform_ref: &str) -> mention::Model {
        let now = Utc::now();
        MentionActiveModel {
            content: Set("hello there".to_string()),
            social_media_platform_ref: Set(platform_ref.to_string()),
            social_media_api_post_ref: Set(Some("post-1".to_string())),
            platform: Set("bluesky".to_string()),
            kind: Set(MentionKind::Comment),
            state: Set(None),
            disposition: Set(None),
            user_id: Set(None),
            mention_id: Set(None),
            data: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
    }

    fn bearer(state: &AppState) -> String {
        let token = issue_token(&state.config.jwt, 1, "op@example.com", Utc::now()).unwrap();
        format!("Bearer {token}")
    }

    #[tokio::test]
    async fn list_requires_authentication() {
        let (state, _db) = setup_state().await;
        let app = create_app(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/mentions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn list_returns_mentions_newest_first() {
        let (state, db) = setup_state().await;
        seed_mention(&db, "ref-1").await;
        seed_mention(&db, "ref-2").await;

        let auth = bearer(&state);
        let app = create_app(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/mentions?waitMs=50")
                    .header(header::AUTHORIZATION, auth)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let result = parsed["result"].as_array().unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0]["socialMediaPlatformRef"], "ref-2");
        assert_eq!(result[1]["socialMediaPlatformRef"], "ref-1");
        assert_eq!(result[0]["type"], "COMMENT");
    }

    #[tokio::test]
    async fn assignment_sets_state_and_writes_audit() {
        let (state, db) = setup_state().await;
        let seeded = seed_mention(&db, "ref-assign").await;

        let auth = bearer(&state);
        let app = create_app(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri(format!("/v1/mentions/{}", seeded.id))
                    .header(header::AUTHORIZATION, auth)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"userId": 42}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["userId"], 42);
        assert_eq!(parsed["state"], "ASSIGNMENT");

        let audits = AuditRepository::list_by_event(&db, EVENT_ASSIGNMENT)
            .await
            .unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].data.as_ref().unwrap()["mentionId"], seeded.id);
    }

    #[tokio::test]
    async fn clearing_assignment_clears_state_without_audit() {
        let (state, db) = setup_state().await;
        let seeded = seed_mention(&db, "ref-clear").await;

        let auth = bearer(&state);
        let app = create_app(state);

        let assign = Request::builder()
            .method("PUT")
            .uri(format!("/v1/mentions/{}", seeded.id))
            .header(header::AUTHORIZATION, auth.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"userId": 42}"#))
            .unwrap();
        let response = app.clone().oneshot(assign).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let clear = Request::builder()
            .method("PUT")
            .uri(format!("/v1/mentions/{}", seeded.id))
            .header(header::AUTHORIZATION, auth)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"userId": null}"#))
            .unwrap();
        let response = app.oneshot(clear).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(parsed["userId"].is_null());
        assert!(parsed["state"].is_null());

        // Clearing writes no audit entry; only the assignment did.
        let audits = AuditRepository::list_by_event(&db, EVENT_ASSIGNMENT)
            .await
            .unwrap();
        assert_eq!(audits.len(), 1);
    }

    #[tokio::test]
    async fn updating_a_missing_mention_is_404() {
        let (state, _db) = setup_state().await;
        let auth = bearer(&state);
        let app = create_app(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/v1/mentions/9999")
                    .header(header::AUTHORIZATION, auth)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"userId": 1}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_reply_content_is_rejected() {
        let (state, db) = setup_state().await;
        let seeded = seed_mention(&db, "ref-reply").await;

        let auth = bearer(&state);
        let app = create_app(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/v1/mentions/{}/reply", seeded.id))
                    .header(header::AUTHORIZATION, auth)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"content": "   "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
