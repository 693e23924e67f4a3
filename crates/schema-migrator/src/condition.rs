//! Run conditions for migrations.
//!
//! A condition is checked against the live schema right before its migration
//! would run, on the same connection. When it does not hold, the migration is
//! skipped but still recorded as successful. This is how one ordered history
//! reconciles databases that reached the same state through different paths.

use sqlx::AnyConnection;
use sqlx::any::AnyArguments;
use sqlx::query::Query;

use crate::dialect::{CheckQuery, Dialect};
use crate::error::Result;
use crate::schema::{Index, Table};

/// A predicate over the live schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Run only if the table exists.
    TableExists {
        /// Table name.
        table: String,
    },
    /// Run only if the index exists.
    IndexExists {
        /// Table name.
        table: String,
        /// Rendered index name.
        index: String,
    },
    /// Run only if the index does not exist.
    IndexNotExists {
        /// Table name.
        table: String,
        /// Rendered index name.
        index: String,
    },
    /// Run only if the column exists.
    ColumnExists {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
    /// Run only if the column does not exist.
    ColumnNotExists {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
    /// Run only if the table has no primary key.
    PrimaryKeyNotExists {
        /// Table name.
        table: String,
    },
}

impl Condition {
    /// Holds when the table exists.
    #[must_use]
    pub fn table_exists(table: impl Into<String>) -> Self {
        Self::TableExists {
            table: table.into(),
        }
    }

    /// Holds when `index` exists on `table`.
    #[must_use]
    pub fn index_exists(table: &Table, index: &Index) -> Self {
        Self::IndexExists {
            table: table.name.clone(),
            index: index.x_name(&table.name),
        }
    }

    /// Holds when `index` does not exist on `table`.
    #[must_use]
    pub fn index_not_exists(table: &Table, index: &Index) -> Self {
        Self::IndexNotExists {
            table: table.name.clone(),
            index: index.x_name(&table.name),
        }
    }

    /// Holds when the column exists.
    #[must_use]
    pub fn column_exists(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::ColumnExists {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Holds when the column does not exist.
    #[must_use]
    pub fn column_not_exists(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::ColumnNotExists {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Holds when the table has no primary key.
    #[must_use]
    pub fn primary_key_not_exists(table: impl Into<String>) -> Self {
        Self::PrimaryKeyNotExists {
            table: table.into(),
        }
    }

    /// The introspection query backing this condition.
    #[must_use]
    pub fn check_query(&self, dialect: &dyn Dialect) -> CheckQuery {
        match self {
            Self::TableExists { table } => dialect.table_check_query(table),
            Self::IndexExists { table, index } | Self::IndexNotExists { table, index } => {
                dialect.index_check_query(table, index)
            }
            Self::ColumnExists { table, column } | Self::ColumnNotExists { table, column } => {
                dialect.column_check_query(table, column)
            }
            Self::PrimaryKeyNotExists { table } => dialect.primary_key_check_query(table),
        }
    }

    /// Whether the condition holds when the check query returns rows.
    #[must_use]
    pub const fn holds_when_found(&self) -> bool {
        matches!(
            self,
            Self::TableExists { .. } | Self::IndexExists { .. } | Self::ColumnExists { .. }
        )
    }

    /// Evaluates the condition on a live connection.
    pub async fn is_fulfilled(
        &self,
        conn: &mut AnyConnection,
        dialect: &dyn Dialect,
    ) -> Result<bool> {
        let found = object_exists(conn, &self.check_query(dialect)).await?;
        Ok(found == self.holds_when_found())
    }
}

fn bind_check(check: &CheckQuery) -> Query<'_, sqlx::Any, AnyArguments<'_>> {
    check
        .args
        .iter()
        .fold(sqlx::query(&check.sql), |q, arg| q.bind(arg.as_str()))
}

/// Runs a check query and reports whether it returned any row.
pub async fn object_exists(conn: &mut AnyConnection, check: &CheckQuery) -> Result<bool> {
    let row = bind_check(check).fetch_optional(&mut *conn).await?;
    Ok(row.is_some())
}
