//! Mention entity model.
//!
//! The normalized record for an external comment, message, or reply captured
//! from the upstream aggregator. `social_media_platform_ref` is the global
//! idempotency key for ingestion; `mention_id` points at the parent mention
//! for replies, forming the reply tree. Mentions are never deleted.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use serde_json::Value as JsonValue;

/// What kind of upstream object this mention normalizes.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum MentionKind {
    #[sea_orm(string_value = "COMMENT")]
    #[serde(rename = "COMMENT")]
    Comment,
    #[sea_orm(string_value = "MESSAGE")]
    #[serde(rename = "MESSAGE")]
    Message,
    #[sea_orm(string_value = "REPLY")]
    #[serde(rename = "REPLY")]
    Reply,
}

/// Triage lifecycle state. Absent until an operator or the reply pipeline
/// touches the mention.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum MentionState {
    #[sea_orm(string_value = "ASSIGNMENT")]
    #[serde(rename = "ASSIGNMENT")]
    Assignment,
    #[sea_orm(string_value = "REPLY_ATTEMPT")]
    #[serde(rename = "REPLY_ATTEMPT")]
    ReplyAttempt,
    #[sea_orm(string_value = "REPLIED")]
    #[serde(rename = "REPLIED")]
    Replied,
    #[sea_orm(string_value = "PROVIDER_ERROR")]
    #[serde(rename = "PROVIDER_ERROR")]
    ProviderError,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "mentions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Text of the comment/message as captured from the platform.
    pub content: String,

    /// The aggregator's opaque id for this comment; globally unique.
    pub social_media_platform_ref: String,

    /// The aggregator's id for the post this mention belongs to.
    pub social_media_api_post_ref: Option<String>,

    /// Platform slug (e.g. `bluesky`, `twitter`).
    pub platform: String,

    pub kind: MentionKind,

    pub state: Option<MentionState>,

    /// Free-form operator disposition.
    pub disposition: Option<String>,

    /// Assigned operator, if any.
    pub user_id: Option<i64>,

    /// Parent mention for replies.
    pub mention_id: Option<i64>,

    /// Opaque payload: `socialMediaPayload` (raw provider response excerpt)
    /// and `taskId` (outbox task that produced this row).
    #[sea_orm(column_type = "JsonBinary")]
    pub data: Option<JsonValue>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
    #[sea_orm(belongs_to = "Entity", from = "Column::MentionId", to = "Column::Id")]
    Parent,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
