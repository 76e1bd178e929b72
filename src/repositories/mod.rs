//! Data access layer: thin typed repositories over SeaORM connections.
//!
//! Repositories accept any [`sea_orm::ConnectionTrait`] implementor so the
//! same methods run against the pool or inside an open transaction.

pub mod audit;
pub mod breaker_state;
pub mod mention;
pub mod task;
pub mod user;

pub use audit::AuditRepository;
pub use breaker_state::BreakerStateRepository;
pub use mention::MentionRepository;
pub use task::TaskRepository;
pub use user::UserRepository;

use sea_orm::DatabaseBackend;

/// SQL expression extracting a task `data` field as text, per backend.
///
/// Field names are compile-time constants; only values are ever bound.
pub(crate) fn json_text_expr(backend: DatabaseBackend, field: &str) -> String {
    match backend {
        DatabaseBackend::Postgres => format!("data->>'{field}'"),
        _ => format!("json_extract(data, '$.{field}')"),
    }
}
