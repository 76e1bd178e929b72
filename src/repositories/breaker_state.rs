//! Circuit breaker state repository.
//!
//! Upsert-on-write keyed by circuit name; readers are the breaker itself
//! (on first use per key) and the health snapshot.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set};

use crate::models::circuit_breaker_state::{
    ActiveModel, Column, Entity as BreakerState, Model,
};

pub struct BreakerStateRepository;

impl BreakerStateRepository {
    pub async fn load<C: ConnectionTrait>(
        conn: &C,
        circuit_name: &str,
    ) -> Result<Option<Model>, sea_orm::DbErr> {
        BreakerState::find()
            .filter(Column::CircuitName.eq(circuit_name))
            .one(conn)
            .await
    }

    /// All persisted circuits in creation order (used by the health
    /// snapshot).
    pub async fn list_all<C: ConnectionTrait>(conn: &C) -> Result<Vec<Model>, sea_orm::DbErr> {
        BreakerState::find().order_by_asc(Column::Id).all(conn).await
    }

    pub async fn upsert<C: ConnectionTrait>(
        conn: &C,
        circuit_name: &str,
        state_data: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), sea_orm::DbErr> {
        let row = ActiveModel {
            circuit_name: Set(circuit_name.to_string()),
            state_data: Set(state_data),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        BreakerState::insert(row)
            .on_conflict(
                OnConflict::column(Column::CircuitName)
                    .update_columns([Column::StateData, Column::UpdatedAt])
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;

        Ok(())
    }
}
