//! Audit repository. Insert-only by construction: no update or delete
//! methods exist.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};

use crate::models::audit::{ActiveModel, Column, Entity as Audit, Model};

/// Event name written when an operator assigns a mention.
pub const EVENT_ASSIGNMENT: &str = "ASSIGNMENT";
/// Event name written when a reply attempt is enqueued.
pub const EVENT_REPLY_ATTEMPT: &str = "REPLY_ATTEMPT";

pub struct AuditRepository;

impl AuditRepository {
    pub async fn record<C: ConnectionTrait>(
        conn: &C,
        event: &str,
        data: serde_json::Value,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> Result<Model, sea_orm::DbErr> {
        ActiveModel {
            event: Set(event.to_string()),
            data: Set(Some(data)),
            created_by: Set(created_by.to_string()),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(conn)
        .await
    }

    pub async fn list_by_event<C: ConnectionTrait>(
        conn: &C,
        event: &str,
    ) -> Result<Vec<Model>, sea_orm::DbErr> {
        Audit::find()
            .filter(Column::Event.eq(event))
            .all(conn)
            .await
    }
}
