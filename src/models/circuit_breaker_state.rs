//! Circuit breaker state entity model.
//!
//! One row per circuit key, upserted on every transition so that multiple
//! process instances converge on the same open/closed decision.

use sea_orm::entity::prelude::*;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "circuit_breaker_states")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Platform name, or `default` for calls not tied to a platform.
    #[sea_orm(unique)]
    pub circuit_name: String,

    /// Serialized breaker snapshot:
    /// `{state, failures, lastFailureTime, nextAttemptTime, timestamp}`.
    #[sea_orm(column_type = "JsonBinary")]
    pub state_data: JsonValue,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
