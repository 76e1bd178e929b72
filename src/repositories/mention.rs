//! Mention repository.
//!
//! Ingestion writes go through [`MentionRepository::insert_ignoring_duplicates`],
//! a single batched insert with an `ON CONFLICT DO NOTHING` guard on the
//! platform ref. All values are bound parameters.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::Value as JsonValue;

use crate::models::mention::{
    ActiveModel, Column, Entity as Mention, MentionKind, Model,
};

/// Insert payload for a mention produced by the fetch pipeline.
#[derive(Debug, Clone)]
pub struct NewMention {
    pub content: String,
    pub social_media_platform_ref: String,
    pub social_media_api_post_ref: Option<String>,
    pub platform: String,
    pub kind: MentionKind,
    pub data: Option<JsonValue>,
}

pub struct MentionRepository;

impl MentionRepository {
    pub async fn find_by_id<C: ConnectionTrait>(
        conn: &C,
        id: i64,
    ) -> Result<Option<Model>, sea_orm::DbErr> {
        Mention::find_by_id(id).one(conn).await
    }

    pub async fn find_by_platform_ref<C: ConnectionTrait>(
        conn: &C,
        platform_ref: &str,
    ) -> Result<Option<Model>, sea_orm::DbErr> {
        Mention::find()
            .filter(Column::SocialMediaPlatformRef.eq(platform_ref))
            .one(conn)
            .await
    }

    /// All mentions, newest first. The triage surface renders this directly.
    pub async fn list_newest_first<C: ConnectionTrait>(
        conn: &C,
    ) -> Result<Vec<Model>, sea_orm::DbErr> {
        Mention::find()
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .all(conn)
            .await
    }

    /// Batch-inserts mentions, silently skipping rows whose platform ref
    /// already exists. Returns the number of rows actually written.
    pub async fn insert_ignoring_duplicates<C: ConnectionTrait>(
        conn: &C,
        mentions: Vec<NewMention>,
        now: DateTime<Utc>,
    ) -> Result<u64, sea_orm::DbErr> {
        if mentions.is_empty() {
            return Ok(0);
        }

        let rows: Vec<ActiveModel> = mentions
            .into_iter()
            .map(|m| ActiveModel {
                content: Set(m.content),
                social_media_platform_ref: Set(m.social_media_platform_ref),
                social_media_api_post_ref: Set(m.social_media_api_post_ref),
                platform: Set(m.platform),
                kind: Set(m.kind),
                state: Set(None),
                disposition: Set(None),
                user_id: Set(None),
                mention_id: Set(None),
                data: Set(m.data),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            })
            .collect();

        let result = Mention::insert_many(rows)
            .on_conflict(
                OnConflict::column(Column::SocialMediaPlatformRef)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;

        Ok(result)
    }
}
