//! Error types for the migration engine.

use std::time::Duration;

/// Errors that can occur while migrating a database.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// Another instance held the migration lock for the whole timeout.
    #[error("Timed out after {timeout:?} waiting for lock '{operation}'")]
    LockTimeout {
        /// Lock operation identifier.
        operation: String,
        /// How long we waited.
        timeout: Duration,
    },

    /// The lock lease was taken over by another instance mid-run.
    #[error("Lock '{0}' was lost while migrating")]
    LockLost(String),

    /// A migration was rejected by the database; the batch stopped here.
    #[error("Migration '{id}' failed: {source}")]
    MigrationFailed {
        /// Identifier of the failing migration.
        id: String,
        /// Underlying cause.
        #[source]
        source: Box<MigrateError>,
    },

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The connection's driver has no dialect implementation.
    #[error("Unsupported database driver: {0}")]
    UnsupportedDriver(String),

    /// Two registered migrations share an identifier.
    #[error("Duplicate migration id: {0}")]
    DuplicateMigration(String),

    /// A code migration reported a failure of its own.
    #[error("Code migration error: {0}")]
    Code(String),
}

impl MigrateError {
    /// Returns the identifier of the failing migration, if this is a
    /// migration failure.
    #[must_use]
    pub fn migration_id(&self) -> Option<&str> {
        match self {
            Self::MigrationFailed { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Returns true for lock acquisition problems, which are retryable by
    /// restarting the process later.
    #[must_use]
    pub fn is_lock_error(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::LockLost(_))
    }
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
