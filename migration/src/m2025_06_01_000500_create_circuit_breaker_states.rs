//! Migration to create the circuit_breaker_states table.
//!
//! One row per circuit key (platform name, plus the `default` sentinel).
//! `state_data` holds the serialized breaker snapshot so multiple process
//! instances converge on the same open/closed decision after restart.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CircuitBreakerStates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CircuitBreakerStates::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(CircuitBreakerStates::CircuitName)
                            .text()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(CircuitBreakerStates::StateData)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CircuitBreakerStates::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CircuitBreakerStates::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CircuitBreakerStates::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CircuitBreakerStates {
    Table,
    Id,
    CircuitName,
    StateData,
    CreatedAt,
    UpdatedAt,
}
