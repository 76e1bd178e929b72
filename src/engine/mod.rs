//! Outbox & mention engine.
//!
//! Operator-facing operations (`list_mentions`, `update_mention`,
//! `reply_to_mention`) plus the background recovery loops over the task
//! outbox. All long-running work is modeled as tasks rather than in-process
//! futures: the fetch pipeline and the reply pipeline both survive process
//! restarts through the `tasks` table.

pub mod adapter;
pub mod batch;

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use metrics::counter;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set, TransactionTrait};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::auth::Actor;
use crate::clock::Clock;
use crate::gateway::{BreakerError, SocialGateway};
use crate::models::mention::{self, MentionKind, MentionState};
use crate::models::task::{self, TaskCode};
use crate::repositories::audit::EVENT_ASSIGNMENT;
use crate::repositories::{AuditRepository, MentionRepository, TaskRepository};

use adapter::{
    AdapterContext, CommentAdapter, MentionAdapter, MessageAdapter, REPLY_INTERVAL_SECONDS,
    ReplyEnqueue,
};
use batch::{BatchOptions, process_batched};

/// Window within which unfinished fetch tasks are retried, and recently
/// fetched posts are skipped.
const FETCH_INTERVAL_SECONDS: i64 = 600;

/// Longest reply content accepted from operators.
const MAX_REPLY_CONTENT_CHARS: usize = 10_000;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("mention {0} does not exist")]
    MentionNotFound(i64),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Db(#[from] sea_orm::DbErr),
    #[error(transparent)]
    Upstream(#[from] BreakerError),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long `list_mentions` waits for the background fetch before
    /// answering with the last known snapshot.
    pub list_wait: Duration,
    /// Cadence of the background recovery loops.
    pub recovery_tick: Duration,
    /// Fan-out limit across posts and recovered tasks.
    pub fan_out: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            list_wait: Duration::from_millis(2000),
            recovery_tick: Duration::from_secs(60),
            fan_out: 10,
        }
    }
}

/// Sync metadata returned alongside the mention list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    pub is_syncing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

/// Operator patch for a mention. Both fields distinguish "absent" from
/// "explicitly null": `{"userId": null}` clears the assignment.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMentionPatch {
    #[serde(default, deserialize_with = "double_option")]
    pub user_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub disposition: Option<Option<String>>,
}

pub fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

/// Validated reply request.
#[derive(Debug, Clone)]
pub struct ReplyRequest {
    pub mention_id: i64,
    pub content: String,
    pub actor: Actor,
}

/// What the operator gets back from `reply_to_mention`.
#[derive(Debug)]
pub struct ReplyReceipt {
    pub mention: mention::Model,
    pub task: task::Model,
    pub ignored: bool,
}

pub struct MentionEngine {
    db: DatabaseConnection,
    social: Arc<SocialGateway>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    comment_adapter: Arc<CommentAdapter>,
    message_adapter: Arc<MessageAdapter>,
}

impl MentionEngine {
    pub fn new(
        db: DatabaseConnection,
        social: Arc<SocialGateway>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let comment_adapter = Arc::new(CommentAdapter::new(AdapterContext {
            db: db.clone(),
            social: Arc::clone(&social),
            clock: Arc::clone(&clock),
            fan_out: config.fan_out,
        }));
        let message_adapter = Arc::new(MessageAdapter::new(AdapterContext {
            db: db.clone(),
            social: Arc::clone(&social),
            clock: Arc::clone(&clock),
            fan_out: config.fan_out,
        }));

        Arc::new(Self {
            comment_adapter,
            message_adapter,
            db,
            social,
            clock,
            config,
        })
    }

    /// Adapter registry indexed by mention kind. Replies thread through the
    /// comment surface.
    fn adapter_for(&self, kind: MentionKind) -> Arc<dyn MentionAdapter> {
        match kind {
            MentionKind::Comment | MentionKind::Reply => self.comment_adapter.clone(),
            MentionKind::Message => self.message_adapter.clone(),
        }
    }

    /// Kicks off a fetch-and-reconcile in the background, waits up to `wait`
    /// for it, then returns all mentions newest-first. When the upstream is
    /// slower than the deadline the caller gets the last known snapshot and
    /// `isSyncing = true`; the fetch keeps running detached.
    pub async fn list_mentions(
        self: Arc<Self>,
        wait: Option<Duration>,
        actor: &Actor,
    ) -> Result<(Vec<mention::Model>, ListMeta), EngineError> {
        let wait = wait.unwrap_or(self.config.list_wait);

        let engine = Arc::clone(&self);
        let background_actor = actor.clone();
        let sync = tokio::spawn(async move { engine.fetch_and_reconcile(background_actor).await });

        let meta = match tokio::time::timeout(wait, sync).await {
            Ok(Ok(errors)) => ListMeta {
                is_syncing: false,
                errors: if errors.is_empty() { None } else { Some(errors) },
            },
            Ok(Err(join_err)) => {
                error!(error = %join_err, "background sync worker failed");
                ListMeta {
                    is_syncing: false,
                    errors: Some(vec!["background sync failed".to_string()]),
                }
            }
            Err(_elapsed) => ListMeta {
                is_syncing: true,
                errors: None,
            },
        };

        let mentions = MentionRepository::list_newest_first(&self.db).await?;
        Ok((mentions, meta))
    }

    /// Applies an operator patch. Assigning a user moves the mention into
    /// ASSIGNMENT and writes an audit entry; clearing the assignment clears
    /// the state (no audit entry is written for the clear).
    pub async fn update_mention(
        &self,
        id: i64,
        patch: UpdateMentionPatch,
        actor: &Actor,
    ) -> Result<mention::Model, EngineError> {
        let mention = MentionRepository::find_by_id(&self.db, id)
            .await?
            .ok_or(EngineError::MentionNotFound(id))?;

        let now = self.clock.now();
        let txn = self.db.begin().await?;

        let mut active: mention::ActiveModel = mention.clone().into();
        match patch.user_id {
            Some(Some(user_id)) => {
                active.user_id = Set(Some(user_id));
                active.state = Set(Some(MentionState::Assignment));
                AuditRepository::record(
                    &txn,
                    EVENT_ASSIGNMENT,
                    json!({ "mentionId": mention.id, "userId": user_id }),
                    &actor.email,
                    now,
                )
                .await?;
            }
            Some(None) => {
                active.user_id = Set(None);
                if mention.user_id.is_some() {
                    active.state = Set(None);
                }
            }
            None => {}
        }

        if let Some(disposition) = patch.disposition {
            active.disposition = Set(disposition);
        }

        active.updated_at = Set(now);
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        Ok(updated)
    }

    /// Enqueues a reply exactly once and processes it synchronously so the
    /// operator sees a best-effort immediate result.
    pub async fn reply_to_mention(&self, request: ReplyRequest) -> Result<ReplyReceipt, EngineError> {
        validate_reply_request(&request)?;

        let mention = MentionRepository::find_by_id(&self.db, request.mention_id)
            .await?
            .ok_or(EngineError::MentionNotFound(request.mention_id))?;

        let adapter = self.adapter_for(mention.kind);
        let enqueued = adapter
            .enqueue_reply(&mention, &request.content, &request.actor)
            .await?;

        match enqueued {
            ReplyEnqueue::Ignored(task) => Ok(ReplyReceipt {
                mention,
                task,
                ignored: true,
            }),
            ReplyEnqueue::Accepted(task) => {
                counter!("reply_tasks_created_total").increment(1);
                if let Err(err) = adapter.process_reply_task(&task).await {
                    warn!(
                        task_id = task.id,
                        error = %err,
                        "immediate reply processing failed, recovery will retry"
                    );
                }

                // Reload for the post-processing view.
                let mention = MentionRepository::find_by_id(&self.db, request.mention_id)
                    .await?
                    .ok_or(EngineError::MentionNotFound(request.mention_id))?;
                let task = TaskRepository::find_by_id(&self.db, task.id)
                    .await?
                    .unwrap_or(task);

                Ok(ReplyReceipt {
                    mention,
                    task,
                    ignored: false,
                })
            }
        }
    }

    /// Fetches recent posts, skips the ones a fetch task already covered in
    /// the last window, creates a fetch task for the rest, and processes it.
    /// Also re-activates recovery for pending tasks. Returns accumulated
    /// per-platform errors (the call itself is best-effort).
    pub async fn fetch_and_reconcile(self: Arc<Self>, actor: Actor) -> Vec<String> {
        let mut errors = Vec::new();

        if let Err(err) = self.recover_reply_tasks().await {
            warn!(error = %err, "reply recovery pass failed");
            errors.push(format!("reply recovery: {err}"));
        }
        if let Err(err) = self.recover_fetch_tasks(&actor).await {
            warn!(error = %err, "fetch recovery pass failed");
            errors.push(format!("fetch recovery: {err}"));
        }

        let (posts, platform_errors) = self.social.list_recent_posts(&actor).await;
        errors.extend(platform_errors);

        if posts.is_empty() {
            return errors;
        }

        let now = self.clock.now();
        let cutoff = now - ChronoDuration::seconds(FETCH_INTERVAL_SECONDS);
        let recently_fetched = match TaskRepository::recent_fetch_post_ids(
            &self.db,
            TaskCode::FetchComments,
            cutoff,
        )
        .await
        {
            Ok(ids) => ids,
            Err(err) => {
                error!(error = %err, "could not load recently fetched posts");
                errors.push(format!("fetch dedup: {err}"));
                return errors;
            }
        };

        let fresh: Vec<_> = posts
            .into_iter()
            .filter(|post| !recently_fetched.contains(&post.id))
            .collect();
        if fresh.is_empty() {
            return errors;
        }

        let posts_value = match serde_json::to_value(&fresh) {
            Ok(value) => value,
            Err(err) => {
                errors.push(format!("fetch task payload: {err}"));
                return errors;
            }
        };

        let task = match TaskRepository::insert_fetch_task(
            &self.db,
            TaskCode::FetchComments,
            posts_value,
            &actor.email,
            now,
        )
        .await
        {
            Ok(task) => task,
            Err(err) => {
                error!(error = %err, "could not create fetch task");
                errors.push(format!("fetch task: {err}"));
                return errors;
            }
        };

        counter!("fetch_tasks_created_total").increment(1);
        if let Err(err) = self.comment_adapter.process_fetch_task(&task, &actor).await {
            warn!(task_id = task.id, error = %err, "fetch task processing failed");
            errors.push(format!("fetch task {}: {err}", task.id));
        }

        errors
    }

    /// Re-processes unfinished reply tasks younger than the reply window.
    pub async fn recover_reply_tasks(&self) -> Result<usize, EngineError> {
        let cutoff = self.clock.now() - ChronoDuration::seconds(REPLY_INTERVAL_SECONDS);
        let tasks =
            TaskRepository::pending_within_window(&self.db, TaskCode::ReplyMention, cutoff).await?;
        if tasks.is_empty() {
            return Ok(0);
        }

        info!(count = tasks.len(), "recovering unfinished reply tasks");
        let adapter = Arc::clone(&self.comment_adapter);
        let count = tasks.len();
        let _ = process_batched(
            tasks,
            &BatchOptions {
                limit: self.config.fan_out,
                ..Default::default()
            },
            move |task: task::Model| {
                let adapter = Arc::clone(&adapter);
                async move { adapter.process_reply_task(&task).await }
            },
            |index, err| warn!(task_index = index, error = %err, "reply recovery failed"),
        )
        .await;

        Ok(count)
    }

    /// Re-processes unfinished fetch tasks younger than the fetch window.
    pub async fn recover_fetch_tasks(&self, actor: &Actor) -> Result<usize, EngineError> {
        let cutoff = self.clock.now() - ChronoDuration::seconds(FETCH_INTERVAL_SECONDS);
        let mut total = 0;

        for (code, adapter) in [
            (
                TaskCode::FetchComments,
                self.comment_adapter.clone() as Arc<dyn MentionAdapter>,
            ),
            (
                TaskCode::FetchMessages,
                self.message_adapter.clone() as Arc<dyn MentionAdapter>,
            ),
        ] {
            let tasks = TaskRepository::pending_within_window(&self.db, code, cutoff).await?;
            if tasks.is_empty() {
                continue;
            }

            info!(count = tasks.len(), code = ?code, "recovering unfinished fetch tasks");
            total += tasks.len();
            let actor = actor.clone();
            let _ = process_batched(
                tasks,
                &BatchOptions {
                    limit: self.config.fan_out,
                    ..Default::default()
                },
                move |task: task::Model| {
                    let adapter = Arc::clone(&adapter);
                    let actor = actor.clone();
                    async move { adapter.process_fetch_task(&task, &actor).await }
                },
                |index, err| warn!(task_index = index, error = %err, "fetch recovery failed"),
            )
            .await;
        }

        Ok(total)
    }

    /// Starts the two background recovery loops (reply and fetch), running
    /// until the shutdown token fires.
    pub fn start_recovery_loops(self: Arc<Self>, shutdown: CancellationToken) {
        let reply_engine = Arc::clone(&self);
        let reply_shutdown = shutdown.clone();
        tokio::spawn(async move {
            info!("starting reply recovery loop");
            if let Err(err) = reply_engine.recover_reply_tasks().await {
                error!(error = %err, "startup reply recovery failed");
            }
            loop {
                tokio::select! {
                    _ = reply_shutdown.cancelled() => {
                        info!("reply recovery loop shutdown requested");
                        break;
                    }
                    _ = tokio::time::sleep(reply_engine.config.recovery_tick) => {
                        if let Err(err) = reply_engine.recover_reply_tasks().await {
                            error!(error = %err, "reply recovery tick failed");
                        }
                    }
                }
            }
        });

        let fetch_engine = self;
        tokio::spawn(async move {
            info!("starting fetch recovery loop");
            let actor = Actor {
                id: 0,
                email: "system".to_string(),
            };
            if let Err(err) = fetch_engine.recover_fetch_tasks(&actor).await {
                error!(error = %err, "startup fetch recovery failed");
            }
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("fetch recovery loop shutdown requested");
                        break;
                    }
                    _ = tokio::time::sleep(fetch_engine.config.recovery_tick) => {
                        if let Err(err) = fetch_engine.recover_fetch_tasks(&actor).await {
                            error!(error = %err, "fetch recovery tick failed");
                        }
                    }
                }
            }
        });
    }
}

fn validate_reply_request(request: &ReplyRequest) -> Result<(), EngineError> {
    if request.mention_id <= 0 {
        return Err(EngineError::Validation(
            "mentionId must be a positive integer".to_string(),
        ));
    }
    let trimmed = request.content.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Validation(
            "content must be a non-empty string".to_string(),
        ));
    }
    if request.content.chars().count() > MAX_REPLY_CONTENT_CHARS {
        return Err(EngineError::Validation(format!(
            "content must be at most {MAX_REPLY_CONTENT_CHARS} characters"
        )));
    }
    if request.actor.id <= 0 {
        return Err(EngineError::Validation("actor id is required".to_string()));
    }
    if request.actor.email.trim().is_empty() {
        return Err(EngineError::Validation(
            "actor email is required".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor() -> Actor {
        Actor {
            id: 1,
            email: "op@example.com".to_string(),
        }
    }

    #[test]
    fn reply_validation_rejects_bad_input() {
        let base = ReplyRequest {
            mention_id: 1,
            content: "hello".to_string(),
            actor: actor(),
        };

        assert!(validate_reply_request(&base).is_ok());

        let mut bad = base.clone();
        bad.mention_id = 0;
        assert!(matches!(
            validate_reply_request(&bad),
            Err(EngineError::Validation(_))
        ));

        let mut bad = base.clone();
        bad.content = "   ".to_string();
        assert!(validate_reply_request(&bad).is_err());

        let mut bad = base.clone();
        bad.content = "x".repeat(MAX_REPLY_CONTENT_CHARS + 1);
        assert!(validate_reply_request(&bad).is_err());

        let mut bad = base.clone();
        bad.actor.email = String::new();
        assert!(validate_reply_request(&bad).is_err());
    }

    #[test]
    fn content_at_the_limit_is_accepted() {
        let request = ReplyRequest {
            mention_id: 1,
            content: "x".repeat(MAX_REPLY_CONTENT_CHARS),
            actor: actor(),
        };
        assert!(validate_reply_request(&request).is_ok());
    }

    #[test]
    fn patch_distinguishes_absent_from_null() {
        let absent: UpdateMentionPatch = serde_json::from_str("{}").unwrap();
        assert!(absent.user_id.is_none());

        let cleared: UpdateMentionPatch = serde_json::from_str(r#"{"userId": null}"#).unwrap();
        assert_eq!(cleared.user_id, Some(None));

        let assigned: UpdateMentionPatch = serde_json::from_str(r#"{"userId": 7}"#).unwrap();
        assert_eq!(assigned.user_id, Some(Some(7)));
    }
}
