//! Task entity model.
//!
//! The transactional outbox. Each row is a durable unit of fetch or reply
//! work; `finished_at IS NULL` means in flight or abandoned. Reply tasks are
//! guarded by partial unique indexes on `data->>'mentionId'` (and content)
//! so a mention is replied to exactly once.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use serde_json::Value as JsonValue;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum TaskCode {
    #[sea_orm(string_value = "FETCH_COMMENTS")]
    #[serde(rename = "FETCH_COMMENTS")]
    FetchComments,
    #[sea_orm(string_value = "FETCH_MESSAGES")]
    #[serde(rename = "FETCH_MESSAGES")]
    FetchMessages,
    #[sea_orm(string_value = "REPLY_MENTION")]
    #[serde(rename = "REPLY_MENTION")]
    ReplyMention,
    #[sea_orm(string_value = "REPLY_MENTION_IGNORED")]
    #[serde(rename = "REPLY_MENTION_IGNORED")]
    ReplyMentionIgnored,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "tasks")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub code: TaskCode,

    /// Work payload. Reply tasks carry `{mentionId, content, isIgnored}` and
    /// later `result`; fetch tasks carry `{posts}` and later `{comments}`.
    #[sea_orm(column_type = "JsonBinary")]
    pub data: JsonValue,

    pub started_at: Option<DateTimeUtc>,
    pub finished_at: Option<DateTimeUtc>,

    /// Email of the actor that created the task.
    pub created_by: String,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
