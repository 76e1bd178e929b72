//! Adds the reply-uniqueness guards and the task data indexes.
//!
//! Two partial unique indexes enforce reply-exactly-once at the store level:
//! one on `(code, data->>'mentionId')` so a mention can carry at most one
//! REPLY_MENTION task, one on `(code, data->>'mentionId', data->>'content')`
//! so identical content cannot be re-submitted. A losing insert is expected
//! to fail and be recorded as REPLY_MENTION_IGNORED by the caller.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::{DatabaseBackend, Statement};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        let conn = manager.get_connection();

        let statements: Vec<String> = match backend {
            DatabaseBackend::Postgres => vec![
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_reply_mention_pending \
                 ON tasks (code, (data->>'mentionId')) \
                 WHERE code = 'REPLY_MENTION'"
                    .to_string(),
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_reply_mention_content \
                 ON tasks (code, (data->>'mentionId'), (data->>'content')) \
                 WHERE code = 'REPLY_MENTION'"
                    .to_string(),
                "CREATE INDEX IF NOT EXISTS idx_tasks_data_mention_id \
                 ON tasks ((data->>'mentionId'))"
                    .to_string(),
                // GIN keeps the "recently fetched posts" containment query cheap.
                "CREATE INDEX IF NOT EXISTS idx_tasks_data_gin \
                 ON tasks USING GIN (data)"
                    .to_string(),
            ],
            _ => vec![
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_reply_mention_pending \
                 ON tasks (code, json_extract(data, '$.mentionId')) \
                 WHERE code = 'REPLY_MENTION'"
                    .to_string(),
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_reply_mention_content \
                 ON tasks (code, json_extract(data, '$.mentionId'), json_extract(data, '$.content')) \
                 WHERE code = 'REPLY_MENTION'"
                    .to_string(),
                "CREATE INDEX IF NOT EXISTS idx_tasks_data_mention_id \
                 ON tasks (json_extract(data, '$.mentionId'))"
                    .to_string(),
            ],
        };

        for sql in statements {
            conn.execute(Statement::from_string(backend, sql)).await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        let conn = manager.get_connection();

        for name in [
            "idx_tasks_data_gin",
            "idx_tasks_data_mention_id",
            "idx_tasks_reply_mention_content",
            "idx_tasks_reply_mention_pending",
        ] {
            conn.execute(Statement::from_string(
                backend,
                format!("DROP INDEX IF EXISTS {name}"),
            ))
            .await?;
        }

        Ok(())
    }
}
