//! schema-migrator CLI
//!
//! Maintenance commands for the migration log and lock of an existing
//! database. Migrations themselves are registered by the embedding
//! application.

use std::time::Duration;

use clap::{Parser, Subcommand};
use sqlx::any::AnyPoolOptions;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use schema_migrator::condition::object_exists;
use schema_migrator::lock::MIGRATOR_OPERATION;
use schema_migrator::prelude::*;

/// Dialect-agnostic schema migrations.
#[derive(Parser)]
#[command(name = "schema-migrator")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (sqlite:, mysql: or postgres:).
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:data.db")]
    database: String,

    /// Age in seconds after which a held lock counts as abandoned.
    #[arg(long, env = "MIGRATOR_LOCK_LEASE_SECS", default_value_t = 300)]
    lock_lease_secs: u64,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the lock and log tables.
    Init,

    /// Show the migration log.
    Log {
        /// Only show failed attempts.
        #[arg(long)]
        failed: bool,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show the migration lock.
    LockStatus,

    /// Force-release a stuck migration lock.
    Unlock,

    /// Check whether a table exists.
    CheckTable {
        /// Table name.
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Connect to database
    sqlx::any::install_default_drivers();
    let pool = AnyPoolOptions::new()
        .max_connections(5)
        .connect(&cli.database)
        .await?;
    let kind = DialectKind::detect(&pool).await?;
    let dialect = kind.dialect();

    let log = MigrationLog::new(pool.clone(), dialect);
    let lock = MigrationLock::new(
        pool.clone(),
        dialect,
        MIGRATOR_OPERATION,
        Duration::from_secs(cli.lock_lease_secs),
        Duration::from_millis(200),
    );

    match cli.command {
        Commands::Init => {
            info!(dialect = %kind, "Initializing migration tables...");
            lock.ensure_table().await?;
            if log.ensure_table().await? {
                info!("Migration log created.");
            } else {
                info!("Migration log already exists.");
            }
        }

        Commands::Log { failed, json } => {
            let entries: Vec<MigrationLogEntry> = log
                .entries()
                .await?
                .into_iter()
                .filter(|e| !failed || !e.success)
                .collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                info!("No migration attempts recorded.");
            } else {
                println!("\nMigration log:");
                println!("{:-<80}", "");
                for entry in &entries {
                    let mark = if entry.success { "X" } else { "!" };
                    println!(
                        " [{mark}] {} ({})",
                        entry.migration_id,
                        entry.timestamp.format("%Y-%m-%d %H:%M:%S")
                    );
                    if let Some(error) = &entry.error {
                        println!("       {error}");
                    }
                }
                println!();
            }
        }

        Commands::LockStatus => {
            lock.ensure_table().await?;
            match lock.status().await? {
                None => info!("Lock '{}' has never been taken.", lock.operation_uid()),
                Some(status) => println!("{}", serde_json::to_string_pretty(&status)?),
            }
        }

        Commands::Unlock => {
            lock.ensure_table().await?;
            if lock.force_release().await? {
                info!("Lock '{}' released.", lock.operation_uid());
            } else {
                info!("Lock '{}' has never been taken.", lock.operation_uid());
            }
        }

        Commands::CheckTable { name } => {
            let mut conn = pool.acquire().await?;
            let exists = object_exists(&mut conn, &dialect.table_check_query(&name)).await?;
            println!("{name}: {}", if exists { "exists" } else { "missing" });
        }
    }

    Ok(())
}
