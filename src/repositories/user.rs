//! User repository.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set,
};

use crate::models::user::{ActiveModel, Column, Entity as User, Model};

pub struct UserRepository;

impl UserRepository {
    pub async fn find_by_id<C: ConnectionTrait>(
        conn: &C,
        id: i64,
    ) -> Result<Option<Model>, sea_orm::DbErr> {
        User::find_by_id(id).one(conn).await
    }

    pub async fn find_by_email<C: ConnectionTrait>(
        conn: &C,
        email: &str,
    ) -> Result<Option<Model>, sea_orm::DbErr> {
        User::find()
            .filter(Column::Email.eq(email))
            .one(conn)
            .await
    }

    /// Returns the user with this email, creating it on first login. A
    /// concurrent create losing the unique race falls back to the winner's
    /// row.
    pub async fn find_or_create_by_email<C: ConnectionTrait>(
        conn: &C,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Model, sea_orm::DbErr> {
        if let Some(existing) = Self::find_by_email(conn, email).await? {
            return Ok(existing);
        }

        let inserted = ActiveModel {
            email: Set(email.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(conn)
        .await;

        match inserted {
            Ok(user) => Ok(user),
            Err(err) => match Self::find_by_email(conn, email).await? {
                Some(user) => Ok(user),
                None => Err(err),
            },
        }
    }
}
