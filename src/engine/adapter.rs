//! Mention-type adapters.
//!
//! One adapter per mention kind (comment, message) behind a small trait; the
//! engine dispatches operator replies and recovery work through it. Both
//! adapters share the same pipeline core and differ only in their task code
//! and the mention kind they ingest.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set, TransactionTrait};
use serde_json::json;
use tracing::{info, warn};

use crate::auth::Actor;
use crate::clock::Clock;
use crate::engine::EngineError;
use crate::engine::batch::{BatchOptions, process_batched};
use crate::gateway::SocialGateway;
use crate::gateway::social::{Comment, Post};
use crate::models::mention::{self, MentionKind, MentionState};
use crate::models::task::{self, TaskCode};
use crate::repositories::audit::EVENT_REPLY_ATTEMPT;
use crate::repositories::mention::NewMention;
use crate::repositories::task::{ReplyTaskData, is_unique_violation};
use crate::repositories::{AuditRepository, MentionRepository, TaskRepository};

/// How long an unfinished reply task may sit before a fresh attempt may
/// evict it.
pub const REPLY_INTERVAL_SECONDS: i64 = 300;

/// Static configuration distinguishing the two adapter flavors.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub fetch_code: TaskCode,
    pub kind: MentionKind,
}

/// Outcome of enqueueing a reply.
#[derive(Debug)]
pub enum ReplyEnqueue {
    /// The reply task was inserted; the caller should process it now.
    Accepted(task::Model),
    /// A duplicate attempt lost against the unique guard and was recorded as
    /// `REPLY_MENTION_IGNORED`.
    Ignored(task::Model),
}

#[async_trait]
pub trait MentionAdapter: Send + Sync {
    fn config(&self) -> &AdapterConfig;

    /// Transactionally installs the reply task (evicting stale unfinished
    /// ones), the audit entry, and the parent state transition.
    async fn enqueue_reply(
        &self,
        mention: &mention::Model,
        content: &str,
        actor: &Actor,
    ) -> Result<ReplyEnqueue, EngineError>;

    /// Executes a reply task: calls upstream and commits the child mention,
    /// parent state, and task completion atomically.
    async fn process_reply_task(&self, task: &task::Model) -> Result<(), EngineError>;

    /// Executes a fetch task: pulls comments for each post and upserts the
    /// resulting mentions.
    async fn process_fetch_task(&self, task: &task::Model, actor: &Actor)
        -> Result<(), EngineError>;
}

/// Shared services and pipeline logic behind both adapters.
pub struct AdapterContext {
    pub db: DatabaseConnection,
    pub social: Arc<SocialGateway>,
    pub clock: Arc<dyn Clock>,
    pub fan_out: usize,
}

struct AdapterCore {
    ctx: AdapterContext,
    config: AdapterConfig,
}

impl AdapterCore {
    async fn enqueue_reply(
        &self,
        mention: &mention::Model,
        content: &str,
        actor: &Actor,
    ) -> Result<ReplyEnqueue, EngineError> {
        let now = self.ctx.clock.now();
        let cutoff = now - ChronoDuration::seconds(REPLY_INTERVAL_SECONDS);

        let txn = self.ctx.db.begin().await?;

        let evicted = TaskRepository::delete_stale_reply_tasks(&txn, mention.id, cutoff).await?;
        if evicted > 0 {
            info!(
                mention_id = mention.id,
                evicted, "evicted stale unfinished reply tasks"
            );
        }

        match TaskRepository::insert_reply_task(&txn, mention.id, content, &actor.email, now).await
        {
            Ok(inserted) => {
                AuditRepository::record(
                    &txn,
                    EVENT_REPLY_ATTEMPT,
                    json!({ "mentionId": mention.id, "content": content }),
                    &actor.email,
                    now,
                )
                .await?;

                let mut active: mention::ActiveModel = mention.clone().into();
                active.state = Set(Some(MentionState::ReplyAttempt));
                active.updated_at = Set(now);
                active.update(&txn).await?;

                txn.commit().await?;
                Ok(ReplyEnqueue::Accepted(inserted))
            }
            Err(err) if is_unique_violation(&err) => {
                txn.rollback().await?;
                let ignored = TaskRepository::insert_ignored_reply_task(
                    &self.ctx.db,
                    mention.id,
                    content,
                    &actor.email,
                    now,
                )
                .await?;
                info!(
                    mention_id = mention.id,
                    task_id = ignored.id,
                    "duplicate reply attempt recorded as ignored"
                );
                Ok(ReplyEnqueue::Ignored(ignored))
            }
            Err(err) => {
                let _ = txn.rollback().await;
                Err(err.into())
            }
        }
    }

    async fn process_reply_task(&self, task: &task::Model) -> Result<(), EngineError> {
        let data: ReplyTaskData = serde_json::from_value(task.data.clone())
            .map_err(|err| EngineError::Validation(format!("malformed reply task data: {err}")))?;
        if data.is_ignored {
            return Ok(());
        }

        let mention_id: i64 = data.mention_id.parse().map_err(|_| {
            EngineError::Validation(format!("reply task {} has no usable mention id", task.id))
        })?;

        let Some(parent) = MentionRepository::find_by_id(&self.ctx.db, mention_id).await? else {
            warn!(
                task_id = task.id,
                mention_id, "reply task points at a vanished mention, skipping"
            );
            return Ok(());
        };

        let actor = Actor {
            id: 0,
            email: task.created_by.clone(),
        };

        let now = self.ctx.clock.now();
        let txn = self.ctx.db.begin().await?;

        // The upstream call stays inside the transaction on purpose: the
        // child insert and parent update must commit atomically with the
        // acknowledgement. A crash between upstream success and commit makes
        // the recovery loop re-send; see the reply-record race note in the
        // README.
        let outcome = self
            .ctx
            .social
            .reply_to_comment(
                &parent.platform,
                &parent.social_media_platform_ref,
                &data.content,
                &actor,
            )
            .await;

        let mut task_active: task::ActiveModel = task.clone().into();
        let mut task_data = task.data.clone();
        let mut parent_active: mention::ActiveModel = parent.clone().into();

        match outcome {
            Ok(result) if result.is_success() => {
                let child_ref = result.comment_id.clone().unwrap_or_else(|| {
                    format!("{}#reply-{}", parent.social_media_platform_ref, task.id)
                });

                mention::ActiveModel {
                    content: Set(result.comment.clone().unwrap_or_else(|| data.content.clone())),
                    social_media_platform_ref: Set(child_ref),
                    social_media_api_post_ref: Set(parent.social_media_api_post_ref.clone()),
                    platform: Set(parent.platform.clone()),
                    kind: Set(MentionKind::Reply),
                    state: Set(None),
                    disposition: Set(None),
                    user_id: Set(None),
                    mention_id: Set(Some(parent.id)),
                    data: Set(Some(json!({
                        "socialMediaPayload": result.raw.clone(),
                        "taskId": task.id,
                    }))),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;

                parent_active.state = Set(Some(MentionState::Replied));
                task_data["result"] = result.raw;
                task_active.finished_at = Set(Some(now));
                info!(mention_id = parent.id, task_id = task.id, "reply delivered");
            }
            Ok(result) => {
                parent_active.state = Set(Some(MentionState::ProviderError));
                task_data["result"] = result.raw;
                warn!(
                    mention_id = parent.id,
                    task_id = task.id,
                    status = %result.status,
                    "provider rejected the reply, leaving task for recovery"
                );
            }
            Err(err) => {
                parent_active.state = Set(Some(MentionState::ProviderError));
                task_data["result"] = json!({ "error": err.to_string() });
                warn!(
                    mention_id = parent.id,
                    task_id = task.id,
                    error = %err,
                    "reply call failed, leaving task for recovery"
                );
            }
        }

        parent_active.updated_at = Set(now);
        parent_active.update(&txn).await?;

        task_active.data = Set(task_data);
        task_active.updated_at = Set(now);
        task_active.update(&txn).await?;

        txn.commit().await?;
        Ok(())
    }

    async fn process_fetch_task(
        &self,
        task: &task::Model,
        actor: &Actor,
    ) -> Result<(), EngineError> {
        let posts: Vec<Post> = task
            .data
            .get("posts")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|err| EngineError::Validation(format!("malformed fetch task data: {err}")))?
            .unwrap_or_default();

        let social = Arc::clone(&self.ctx.social);
        let actor_for_fetch = actor.clone();
        let comment_batches = process_batched(
            posts.clone(),
            &BatchOptions {
                limit: self.ctx.fan_out,
                ..Default::default()
            },
            move |post: Post| {
                let social = Arc::clone(&social);
                let actor = actor_for_fetch.clone();
                async move { social.list_comments(&post, &actor).await }
            },
            |index, err| {
                warn!(
                    task_id = task.id,
                    post_index = index,
                    error = %err,
                    "failed to fetch comments for post"
                );
            },
        )
        .await
        .unwrap_or_default();

        let comments: Vec<Comment> = comment_batches.into_iter().flatten().collect();

        let now = self.ctx.clock.now();
        if !comments.is_empty() {
            let rows: Vec<NewMention> = comments
                .iter()
                .map(|comment| NewMention {
                    content: comment.comment.clone(),
                    social_media_platform_ref: comment.comment_id.clone(),
                    social_media_api_post_ref: comment.api_post_id.clone(),
                    platform: comment.platform.clone(),
                    kind: self.config.kind,
                    data: Some(json!({
                        "socialMediaPayload": comment,
                        "taskId": task.id,
                    })),
                })
                .collect();

            let written =
                MentionRepository::insert_ignoring_duplicates(&self.ctx.db, rows, now).await?;
            info!(
                task_id = task.id,
                fetched = comments.len(),
                written,
                "reconciled comments into mentions"
            );
        }

        // The task is finished even when individual posts failed: the post
        // ids collapse into data.posts and the flat comment list is attached.
        let mut task_active: task::ActiveModel = task.clone().into();
        let post_ids: Vec<String> = posts.iter().map(|p| p.id.clone()).collect();
        task_active.data = Set(json!({
            "posts": post_ids,
            "comments": comments,
        }));
        task_active.finished_at = Set(Some(now));
        task_active.updated_at = Set(now);
        task_active.update(&self.ctx.db).await?;

        Ok(())
    }
}

/// Adapter for top-level comments (and replies threaded under them).
pub struct CommentAdapter {
    core: AdapterCore,
}

impl CommentAdapter {
    pub fn new(ctx: AdapterContext) -> Self {
        Self {
            core: AdapterCore {
                ctx,
                config: AdapterConfig {
                    fetch_code: TaskCode::FetchComments,
                    kind: MentionKind::Comment,
                },
            },
        }
    }
}

#[async_trait]
impl MentionAdapter for CommentAdapter {
    fn config(&self) -> &AdapterConfig {
        &self.core.config
    }

    async fn enqueue_reply(
        &self,
        mention: &mention::Model,
        content: &str,
        actor: &Actor,
    ) -> Result<ReplyEnqueue, EngineError> {
        self.core.enqueue_reply(mention, content, actor).await
    }

    async fn process_reply_task(&self, task: &task::Model) -> Result<(), EngineError> {
        self.core.process_reply_task(task).await
    }

    async fn process_fetch_task(
        &self,
        task: &task::Model,
        actor: &Actor,
    ) -> Result<(), EngineError> {
        self.core.process_fetch_task(task, actor).await
    }
}

/// Adapter for direct messages.
pub struct MessageAdapter {
    core: AdapterCore,
}

impl MessageAdapter {
    pub fn new(ctx: AdapterContext) -> Self {
        Self {
            core: AdapterCore {
                ctx,
                config: AdapterConfig {
                    fetch_code: TaskCode::FetchMessages,
                    kind: MentionKind::Message,
                },
            },
        }
    }
}

#[async_trait]
impl MentionAdapter for MessageAdapter {
    fn config(&self) -> &AdapterConfig {
        &self.core.config
    }

    async fn enqueue_reply(
        &self,
        mention: &mention::Model,
        content: &str,
        actor: &Actor,
    ) -> Result<ReplyEnqueue, EngineError> {
        self.core.enqueue_reply(mention, content, actor).await
    }

    async fn process_reply_task(&self, task: &task::Model) -> Result<(), EngineError> {
        self.core.process_reply_task(task).await
    }

    async fn process_fetch_task(
        &self,
        task: &task::Model,
        actor: &Actor,
    ) -> Result<(), EngineError> {
        self.core.process_fetch_task(task, actor).await
    }
}
