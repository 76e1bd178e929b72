//! Audit entity model. Append-only; rows are never updated or deleted.

use sea_orm::entity::prelude::*;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "audits")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Event name (e.g. `ASSIGNMENT`, `REPLY_ATTEMPT`).
    pub event: String,

    /// JSON excerpt of the state transition.
    #[sea_orm(column_type = "JsonBinary")]
    pub data: Option<JsonValue>,

    /// Email of the actor that caused the event.
    pub created_by: String,

    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
