//! Task (outbox) repository.
//!
//! Reply-task inserts deliberately race against the partial unique indexes;
//! callers detect the loss via [`is_unique_violation`] and record a
//! `REPLY_MENTION_IGNORED` row instead. Queries over the JSON payload bind
//! every value and switch the extraction expression per backend.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter,
    QueryOrder, RuntimeErr, Set, Statement, Value,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::models::task::{ActiveModel, Column, Entity as Task, Model, TaskCode};

use super::json_text_expr;

/// Payload of a `REPLY_MENTION` / `REPLY_MENTION_IGNORED` task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyTaskData {
    /// Target mention id, stored as a string so the unique-index expression
    /// compares uniformly across backends.
    pub mention_id: String,
    pub content: String,
    #[serde(default)]
    pub is_ignored: bool,
    /// Raw provider response recorded by the reply pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

pub struct TaskRepository;

impl TaskRepository {
    pub async fn find_by_id<C: ConnectionTrait>(
        conn: &C,
        id: i64,
    ) -> Result<Option<Model>, DbErr> {
        Task::find_by_id(id).one(conn).await
    }

    /// Inserts the single in-flight reply task for a mention. Fails with a
    /// unique violation when another attempt already holds the slot.
    pub async fn insert_reply_task<C: ConnectionTrait>(
        conn: &C,
        mention_id: i64,
        content: &str,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> Result<Model, DbErr> {
        ActiveModel {
            code: Set(TaskCode::ReplyMention),
            data: Set(json!({
                "mentionId": mention_id.to_string(),
                "content": content,
                "isIgnored": false,
            })),
            started_at: Set(Some(now)),
            finished_at: Set(None),
            created_by: Set(created_by.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(conn)
        .await
    }

    /// Records a rejected duplicate attempt. Created already finished so the
    /// recovery loop never picks it up.
    pub async fn insert_ignored_reply_task<C: ConnectionTrait>(
        conn: &C,
        mention_id: i64,
        content: &str,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> Result<Model, DbErr> {
        ActiveModel {
            code: Set(TaskCode::ReplyMentionIgnored),
            data: Set(json!({
                "mentionId": mention_id.to_string(),
                "content": content,
                "isIgnored": true,
            })),
            started_at: Set(Some(now)),
            finished_at: Set(Some(now)),
            created_by: Set(created_by.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(conn)
        .await
    }

    /// Inserts a fetch task carrying the posts to reconcile.
    pub async fn insert_fetch_task<C: ConnectionTrait>(
        conn: &C,
        code: TaskCode,
        posts: serde_json::Value,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> Result<Model, DbErr> {
        ActiveModel {
            code: Set(code),
            data: Set(json!({ "posts": posts })),
            started_at: Set(Some(now)),
            finished_at: Set(None),
            created_by: Set(created_by.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(conn)
        .await
    }

    /// Deletes unfinished reply tasks for a mention whose `started_at` fell
    /// out of the reply window, freeing the unique slot for a fresh attempt.
    pub async fn delete_stale_reply_tasks<C: ConnectionTrait>(
        conn: &C,
        mention_id: i64,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        let backend = conn.get_database_backend();
        let mention_expr = json_text_expr(backend, "mentionId");

        let sql = match backend {
            sea_orm::DatabaseBackend::Postgres => format!(
                "DELETE FROM tasks \
                 WHERE code = $1 AND {mention_expr} = $2 \
                 AND finished_at IS NULL AND started_at < $3"
            ),
            _ => format!(
                "DELETE FROM tasks \
                 WHERE code = ? AND {mention_expr} = ? \
                 AND finished_at IS NULL AND started_at < ?"
            ),
        };

        let result = conn
            .execute(Statement::from_sql_and_values(
                backend,
                sql,
                [
                    Value::from("REPLY_MENTION"),
                    Value::from(mention_id.to_string()),
                    Value::from(cutoff),
                ],
            ))
            .await?;

        Ok(result.rows_affected())
    }

    /// Unfinished tasks of `code` that started inside the recovery window.
    pub async fn pending_within_window<C: ConnectionTrait>(
        conn: &C,
        code: TaskCode,
        window_start: DateTime<Utc>,
    ) -> Result<Vec<Model>, DbErr> {
        Task::find()
            .filter(Column::Code.eq(code))
            .filter(Column::FinishedAt.is_null())
            .filter(Column::StartedAt.gte(window_start))
            .order_by_asc(Column::Id)
            .all(conn)
            .await
    }

    /// Post ids referenced by any fetch task created since `cutoff`. Entries
    /// are either full post objects (fresh tasks) or bare ids (collapsed by
    /// task completion); both shapes count.
    pub async fn recent_fetch_post_ids<C: ConnectionTrait>(
        conn: &C,
        code: TaskCode,
        cutoff: DateTime<Utc>,
    ) -> Result<HashSet<String>, DbErr> {
        let tasks = Task::find()
            .filter(Column::Code.eq(code))
            .filter(Column::CreatedAt.gte(cutoff))
            .all(conn)
            .await?;

        let mut ids = HashSet::new();
        for task in tasks {
            let Some(posts) = task.data.get("posts").and_then(|p| p.as_array()) else {
                continue;
            };
            for post in posts {
                match post {
                    serde_json::Value::String(id) => {
                        ids.insert(id.clone());
                    }
                    serde_json::Value::Object(obj) => {
                        if let Some(id) = obj.get("id").and_then(|v| v.as_str()) {
                            ids.insert(id.to_string());
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(ids)
    }
}

/// Whether a database error is a unique-index violation (any backend).
pub fn is_unique_violation(err: &DbErr) -> bool {
    let db_err = match err {
        DbErr::Exec(RuntimeErr::SqlxError(sea_orm::SqlxError::Database(db_err)))
        | DbErr::Query(RuntimeErr::SqlxError(sea_orm::SqlxError::Database(db_err))) => db_err,
        _ => return false,
    };

    if matches!(
        db_err.constraint(),
        Some("idx_tasks_reply_mention_pending") | Some("idx_tasks_reply_mention_content")
    ) {
        return true;
    }

    // 23505: Postgres unique_violation; 2067/1555: SQLite constraint codes.
    matches!(
        db_err.code().as_deref(),
        Some("23505") | Some("2067") | Some("1555")
    )
}
