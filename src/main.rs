//! Mentions API service entry point.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use mentions::clock::SystemClock;
use mentions::config::ConfigLoader;
use mentions::engine::{EngineConfig, MentionEngine};
use mentions::gateway::{BreakerConfig, HttpTransport, RetryConfig, SocialGateway};
use mentions::server::{AppState, run_server};
use mentions::{db, telemetry};
use migration::{Migrator, MigratorTrait};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "mentions")]
#[command(about = "Mentions API service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Apply all pending migrations
    Up,
    /// Rollback the last migration
    Down,
    /// Show migration status
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = ConfigLoader::new().load()?;
    telemetry::init_tracing(&config);

    let db = db::init_pool(&config).await?;

    if let Some(command) = cli.command {
        match command {
            Commands::Migrate { action } => {
                handle_migrate_command(&db, action).await?;
                return Ok(());
            }
        }
    }

    // Migrations run automatically for local and test profiles.
    if config.profile == "local" || config.profile == "test" {
        tracing::info!(profile = %config.profile, "running migrations automatically");
        Migrator::up(&db, None).await?;
    }

    if let Ok(redacted) = config.redacted_json() {
        tracing::info!(profile = %config.profile, config = %redacted, "configuration loaded");
    }

    let config = Arc::new(config);
    let clock = Arc::new(SystemClock);

    let transport = Arc::new(HttpTransport::new(&config.social)?);
    let social = Arc::new(SocialGateway::new(
        db.clone(),
        transport,
        clock.clone(),
        &config.social,
        BreakerConfig::default(),
        RetryConfig::default(),
    ));
    let engine = MentionEngine::new(
        db.clone(),
        social.clone(),
        clock,
        EngineConfig::default(),
    );

    let shutdown = CancellationToken::new();
    engine.clone().start_recovery_loops(shutdown.clone());

    let state = AppState {
        config,
        db,
        engine,
        social,
    };

    let result = run_server(state).await;
    shutdown.cancel();
    result
}

async fn handle_migrate_command(
    db: &DatabaseConnection,
    action: MigrateAction,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        MigrateAction::Up => {
            println!("Applying migrations...");
            Migrator::up(db, None).await?;
            println!("All migrations applied successfully");
        }
        MigrateAction::Down => {
            println!("Rolling back last migration...");
            Migrator::down(db, Some(1)).await?;
            println!("Migration rolled back successfully");
        }
        MigrateAction::Status => {
            let applied = Migrator::get_applied_migrations(db).await?;
            let pending = Migrator::get_pending_migrations(db).await?;

            if applied.is_empty() {
                println!("No migrations have been applied");
            } else {
                println!("Applied migrations: {} migration(s)", applied.len());
            }

            if pending.is_empty() {
                println!("No pending migrations");
            } else {
                println!("Pending migrations: {} migration(s)", pending.len());
            }
        }
    }
    Ok(())
}
