//! Migration to create the mentions table.
//!
//! A mention is the normalized record for an external comment, message, or
//! reply captured from the upstream aggregator. The platform ref is globally
//! unique and acts as the ingestion idempotency key; the self-reference
//! forms the reply tree.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Statement;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Mentions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Mentions::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Mentions::Content).text().not_null())
                    .col(
                        ColumnDef::new(Mentions::SocialMediaPlatformRef)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Mentions::SocialMediaApiPostRef)
                            .text()
                            .null(),
                    )
                    .col(ColumnDef::new(Mentions::Platform).text().not_null())
                    .col(ColumnDef::new(Mentions::Kind).text().not_null())
                    .col(ColumnDef::new(Mentions::State).text().null())
                    .col(ColumnDef::new(Mentions::Disposition).text().null())
                    .col(ColumnDef::new(Mentions::UserId).big_integer().null())
                    .col(ColumnDef::new(Mentions::MentionId).big_integer().null())
                    .col(ColumnDef::new(Mentions::Data).json_binary().null())
                    .col(
                        ColumnDef::new(Mentions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Mentions::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_mentions_user_id")
                            .from(Mentions::Table, Mentions::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_mentions_mention_id")
                            .from(Mentions::Table, Mentions::MentionId)
                            .to(Mentions::Table, Mentions::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        // The platform ref is the ingestion idempotency key.
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_mentions_platform_ref \
                 ON mentions (social_media_platform_ref)"
                    .to_string(),
            ))
            .await?;

        // Triage listing reads mentions newest-first.
        manager
            .create_index(
                Index::create()
                    .name("idx_mentions_created_at")
                    .table(Mentions::Table)
                    .col(Mentions::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_mentions_created_at").to_owned())
            .await?;

        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "DROP INDEX IF EXISTS idx_mentions_platform_ref".to_string(),
            ))
            .await?;

        manager
            .drop_table(Table::drop().table(Mentions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Mentions {
    Table,
    Id,
    Content,
    SocialMediaPlatformRef,
    SocialMediaApiPostRef,
    Platform,
    Kind,
    State,
    Disposition,
    UserId,
    MentionId,
    Data,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}
