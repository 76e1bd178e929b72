//! Migration to create the audits table.
//!
//! Audits are append-only: rows are inserted by state transitions and never
//! updated or deleted.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Audits::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Audits::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Audits::Event).text().not_null())
                    .col(ColumnDef::new(Audits::Data).json_binary().null())
                    .col(ColumnDef::new(Audits::CreatedBy).text().not_null())
                    .col(
                        ColumnDef::new(Audits::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_audits_event")
                    .table(Audits::Table)
                    .col(Audits::Event)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_audits_event").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Audits::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Audits {
    Table,
    Id,
    Event,
    Data,
    CreatedBy,
    CreatedAt,
}
