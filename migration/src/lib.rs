//! Database migrations for the Mentions API.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_06_01_000100_create_users;
mod m2025_06_01_000200_create_mentions;
mod m2025_06_01_000300_create_tasks;
mod m2025_06_01_000400_create_audits;
mod m2025_06_01_000500_create_circuit_breaker_states;
mod m2025_06_02_000100_add_task_reply_guards;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_06_01_000100_create_users::Migration),
            Box::new(m2025_06_01_000200_create_mentions::Migration),
            Box::new(m2025_06_01_000300_create_tasks::Migration),
            Box::new(m2025_06_01_000400_create_audits::Migration),
            Box::new(m2025_06_01_000500_create_circuit_breaker_states::Migration),
            Box::new(m2025_06_02_000100_add_task_reply_guards::Migration),
        ]
    }
}
