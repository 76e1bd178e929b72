//! Platform-aware operations against the upstream aggregator.
//!
//! Every call composes as `retry(breaker(http))`: the breaker counts one
//! failure per underlying attempt and the retry engine stops as soon as the
//! breaker leaves CLOSED. Platform-specific quirks (twitter's threaded
//! replies) are isolated in the comment filter here and never leak into the
//! mention table.

use std::collections::HashMap;
use std::sync::Arc;

use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tracing::warn;

use crate::auth::Actor;
use crate::clock::Clock;
use crate::config::SocialConfig;
use crate::gateway::breaker::{BreakerConfig, BreakerError, CircuitBreaker, CircuitState};
use crate::gateway::http::{Transport, UpstreamRequest};
use crate::gateway::retry::{RetryConfig, RetryEngine};
use crate::repositories::BreakerStateRepository;

/// Circuit key for calls not associated with a platform.
pub const DEFAULT_CIRCUIT: &str = "default";

/// A post as returned by `/history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    #[serde(default)]
    pub post_ids: Vec<String>,
    #[serde(default)]
    pub platform: String,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    history: Vec<HistoryEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryEntry {
    id: String,
    #[serde(default)]
    post_ids: Vec<String>,
}

/// A comment as returned by `/comments/{postId}`, tagged with the post it
/// was fetched for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub comment_id: String,
    pub comment: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced_tweets: Option<Vec<JsonValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_post_id: Option<String>,
}

/// Result of posting a reply upstream.
#[derive(Debug, Clone)]
pub struct ReplyOutcome {
    pub status: String,
    pub comment: Option<String>,
    pub comment_id: Option<String>,
    pub raw: JsonValue,
}

impl ReplyOutcome {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Per-circuit row in the health snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitHealth {
    pub platform: String,
    pub healthy: bool,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: String,
    pub circuits: Vec<CircuitHealth>,
}

impl HealthSnapshot {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

pub struct SocialGateway {
    transport: Arc<dyn Transport>,
    retry: RetryEngine,
    breakers: HashMap<String, Arc<CircuitBreaker>>,
    db: DatabaseConnection,
    platforms: Vec<String>,
    history_last_days: u32,
}

impl SocialGateway {
    pub fn new(
        db: DatabaseConnection,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        config: &SocialConfig,
        breaker_config: BreakerConfig,
        retry_config: RetryConfig,
    ) -> Self {
        let mut breakers = HashMap::new();
        for name in config
            .platforms
            .iter()
            .map(String::as_str)
            .chain([DEFAULT_CIRCUIT])
        {
            breakers.insert(
                name.to_string(),
                Arc::new(CircuitBreaker::new(
                    name,
                    breaker_config.clone(),
                    db.clone(),
                    clock.clone(),
                )),
            );
        }

        Self {
            transport,
            retry: RetryEngine::new(retry_config, clock),
            breakers,
            db,
            platforms: config.platforms.clone(),
            history_last_days: config.history_last_days,
        }
    }

    fn breaker_for(&self, platform: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .get(platform)
            .or_else(|| self.breakers.get(DEFAULT_CIRCUIT))
            .cloned()
            .expect("default circuit always registered")
    }

    /// Retry outside, breaker inside, HTTP innermost.
    async fn call(
        &self,
        platform: &str,
        request: UpstreamRequest,
    ) -> Result<JsonValue, BreakerError> {
        let breaker = self.breaker_for(platform);
        let transport = Arc::clone(&self.transport);

        self.retry
            .execute(
                || {
                    let breaker = Arc::clone(&breaker);
                    let transport = Arc::clone(&transport);
                    let request = request.clone();
                    async move {
                        breaker
                            .execute(move || async move { transport.request(request).await })
                            .await
                    }
                },
                |err: &BreakerError| {
                    // Do not waste retries while the circuit says "stop".
                    if breaker.current_state() != CircuitState::Closed {
                        return false;
                    }
                    err.upstream().map(|g| g.is_retryable()).unwrap_or(false)
                },
            )
            .await
    }

    /// Recent posts across every configured platform. A failing platform is
    /// logged and skipped; the call succeeds with whatever the others
    /// returned.
    pub async fn list_recent_posts(&self, actor: &Actor) -> (Vec<Post>, Vec<String>) {
        let mut posts = Vec::new();
        let mut errors = Vec::new();

        for platform in &self.platforms {
            let request = UpstreamRequest::get(format!(
                "/history?lastDays={}&platform={}",
                self.history_last_days, platform
            ));

            match self.call(platform, request).await {
                Ok(body) => match serde_json::from_value::<HistoryResponse>(body) {
                    Ok(parsed) => {
                        posts.extend(parsed.history.into_iter().map(|entry| Post {
                            id: entry.id,
                            post_ids: entry.post_ids,
                            platform: platform.clone(),
                        }));
                    }
                    Err(err) => {
                        warn!(platform = %platform, error = %err, "history response did not parse");
                        errors.push(format!("{platform}: {err}"));
                    }
                },
                Err(err) => {
                    warn!(
                        platform = %platform,
                        actor = %actor.email,
                        error = %err,
                        "failed to list recent posts"
                    );
                    errors.push(format!("{platform}: {err}"));
                }
            }
        }

        (posts, errors)
    }

    /// Comments on a post, passed through the per-platform filter and tagged
    /// with the post id they were fetched for.
    pub async fn list_comments(
        &self,
        post: &Post,
        _actor: &Actor,
    ) -> Result<Vec<Comment>, BreakerError> {
        let request = UpstreamRequest::get(format!("/comments/{}", post.id));
        let body = self.call(&post.platform, request).await?;

        let mut comments = Vec::new();
        if let JsonValue::Object(by_platform) = body {
            for (platform, entries) in by_platform {
                let Ok(mut parsed) = serde_json::from_value::<Vec<Comment>>(entries) else {
                    continue;
                };
                for comment in &mut parsed {
                    if comment.platform.is_empty() {
                        comment.platform = platform.clone();
                    }
                    comment.api_post_id = Some(post.id.clone());
                }
                comments.extend(filter_platform_comments(&platform, parsed, post));
            }
        }

        Ok(comments)
    }

    /// Posts a reply to the comment behind `platform_ref`.
    pub async fn reply_to_comment(
        &self,
        platform: &str,
        platform_ref: &str,
        content: &str,
        _actor: &Actor,
    ) -> Result<ReplyOutcome, BreakerError> {
        let request = UpstreamRequest::post(
            format!("/comments/{platform_ref}/reply"),
            json!({
                "comment": content,
                "platforms": [platform],
                "searchPlatformId": true,
            }),
        );

        let body = self.call(platform, request).await?;

        let success = body
            .get("success")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false);
        let platform_result = body.get(platform);
        let comment = platform_result
            .and_then(|v| v.get("comment"))
            .and_then(JsonValue::as_str)
            .map(str::to_string);
        let comment_id = platform_result
            .and_then(|v| v.get("commentId"))
            .and_then(JsonValue::as_str)
            .map(str::to_string);

        Ok(ReplyOutcome {
            status: if success { "success" } else { "error" }.to_string(),
            comment,
            comment_id,
            raw: body,
        })
    }

    /// Aggregated circuit health from the persisted breaker rows: healthy
    /// iff every circuit is CLOSED.
    pub async fn health_snapshot(&self) -> Result<HealthSnapshot, sea_orm::DbErr> {
        let rows = BreakerStateRepository::list_all(&self.db).await?;

        let circuits: Vec<CircuitHealth> = rows
            .into_iter()
            .map(|row| {
                let state = row
                    .state_data
                    .get("state")
                    .and_then(JsonValue::as_str)
                    .unwrap_or("CLOSED")
                    .to_string();
                CircuitHealth {
                    platform: row.circuit_name,
                    healthy: state == "CLOSED",
                    state,
                }
            })
            .collect();

        let status = if circuits.iter().all(|c| c.healthy) {
            "healthy"
        } else {
            "degraded"
        };

        Ok(HealthSnapshot {
            status: status.to_string(),
            circuits,
        })
    }
}

/// For twitter, drop comments that reference a tweet other than the post
/// itself: those are threaded replies, not top-level comments. Other
/// platforms pass through unchanged.
fn filter_platform_comments(platform: &str, comments: Vec<Comment>, post: &Post) -> Vec<Comment> {
    if platform != "twitter" {
        return comments;
    }

    comments
        .into_iter()
        .filter(|comment| match &comment.referenced_tweets {
            None => true,
            Some(refs) if refs.is_empty() => true,
            Some(refs) => refs
                .iter()
                .filter_map(|r| r.get("id").and_then(JsonValue::as_str))
                .any(|id| post.post_ids.iter().any(|p| p == id)),
        })
        .collect()
}
