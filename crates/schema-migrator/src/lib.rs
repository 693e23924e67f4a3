//! Dialect-agnostic schema migrations for SQLite, MySQL and PostgreSQL.
//!
//! `schema-migrator` applies an ordered, append-only list of migrations to a
//! database and records every attempt in a migration log:
//! - Each migration has a permanent id; once it succeeded it never runs again
//! - Schema is described portably and rendered per dialect
//! - Conditions consult the live schema so diverged databases converge
//! - A lease in the lock table keeps concurrent instances from racing
//!
//! # Architecture
//!
//! - **Schema** - Portable `Table`, `Column` and `Index` descriptions
//! - **Dialect** - Per-database DDL, quoting, placeholders and introspection
//! - **Operations** - The `Migration` kinds and helper groups
//! - **Condition** - Live-schema predicates gating a migration
//! - **Log** - The `migration_log` table
//! - **Lock** - The `migration_lock` lease
//! - **Migrator** - The locked execution loop
//!
//! # Example
//!
//! ```rust,ignore
//! use schema_migrator::prelude::*;
//!
//! let user = Table::new("user")
//!     .column(Column::new("id", ColumnType::BigInt).primary_key().auto_increment())
//!     .column(Column::varchar("login", 190).not_null())
//!     .index(Index::unique(["login"]));
//!
//! let mut migrations = vec![Migration::add_table("create user table", user.clone())];
//! migrations.extend(Migration::add_table_indices("v1", &user));
//! migrations.push(
//!     Migration::add_column("add email", &user, Column::varchar("email", 190))
//!         .when(Condition::column_not_exists("user", "email")),
//! );
//!
//! sqlx::any::install_default_drivers();
//! let pool = sqlx::AnyPool::connect("sqlite:data.db").await?;
//! let report = Migrator::connect(pool, migrations, MigratorConfig::default())
//!     .await?
//!     .start()
//!     .await?;
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Create the lock and log tables
//! schema-migrator init
//!
//! # Show failed attempts as JSON
//! schema-migrator log --failed --json
//!
//! # Release a lock left behind by a crashed instance
//! schema-migrator unlock
//! ```

pub mod condition;
pub mod config;
pub mod dialect;
pub mod error;
pub mod lock;
pub mod log;
pub mod migrator;
pub mod operations;
pub mod schema;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::condition::Condition;
    pub use crate::config::MigratorConfig;
    pub use crate::dialect::{
        CheckQuery, Dialect, DialectKind, MysqlDialect, PostgresDialect, SqliteDialect,
    };
    pub use crate::error::{MigrateError, Result};
    pub use crate::lock::{LockHandle, LockStatus, MigrationLock};
    pub use crate::log::{MigrationLog, MigrationLogEntry};
    pub use crate::migrator::{MigrationReport, Migrator};
    pub use crate::operations::{CodeMigration, Migration, MigrationKind, RawSql};
    pub use crate::schema::{Column, ColumnType, Index, IndexKind, Table};
}
