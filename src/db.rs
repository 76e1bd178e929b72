//! Database connection and pool management.
//!
//! Initializes a SeaORM connection pool with retry on transient startup
//! failures, plus a liveness check used by the status endpoint.

use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::AppConfig;

/// Errors that can occur during database initialization.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("failed to connect to database: {source}")]
    ConnectionFailed {
        #[from]
        source: sea_orm::DbErr,
    },
    #[error("invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Initializes the connection pool, retrying transient failures with
/// exponential backoff.
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    let url = cfg.database.connection_url();
    if url.is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "database URL cannot be empty".to_string(),
        }
        .into());
    }

    let mut opt = ConnectOptions::new(&url);
    opt.max_connections(cfg.database.max_connections)
        .acquire_timeout(Duration::from_millis(cfg.database.acquire_timeout_ms))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let max_attempts = 5;
    let mut retry_delay = Duration::from_millis(100);

    for attempt in 1..=max_attempts {
        match Database::connect(opt.clone()).await {
            Ok(conn) => {
                info!(attempt, "connected to database");
                return Ok(conn);
            }
            Err(err) if attempt < max_attempts => {
                warn!(
                    attempt,
                    error = %err,
                    delay_ms = retry_delay.as_millis() as u64,
                    "database connection attempt failed, retrying"
                );
                sleep(retry_delay).await;
                retry_delay *= 2;
            }
            Err(err) => {
                return Err(DatabaseError::ConnectionFailed { source: err }.into());
            }
        }
    }

    unreachable!("connect loop either returns or errors on the last attempt")
}

/// Verifies the connection is still usable by executing a trivial query.
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());
    db.query_one(stmt)
        .await
        .context("database health check failed")?;
    Ok(())
}
