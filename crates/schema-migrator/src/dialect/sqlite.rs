//! SQLite dialect.
//!
//! SQLite only has a handful of storage classes, so most semantic types
//! collapse onto `INTEGER`, `TEXT`, `REAL` or `BLOB`. `AUTOINCREMENT` is only
//! accepted on an `INTEGER PRIMARY KEY` column, which is why every integer
//! type maps to `INTEGER`.

use super::{CheckQuery, Dialect, DialectKind};
use crate::schema::{Column, ColumnType};

/// SQLite migration dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dialect for SqliteDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn auto_incr_str(&self) -> &'static str {
        "AUTOINCREMENT"
    }

    fn sql_type(&self, col: &Column) -> String {
        match col.column_type {
            ColumnType::BigInt | ColumnType::Int | ColumnType::SmallInt | ColumnType::Bool => {
                "INTEGER"
            }
            ColumnType::Varchar
            | ColumnType::NVarchar
            | ColumnType::Char
            | ColumnType::Text
            | ColumnType::MediumText
            | ColumnType::LongText => "TEXT",
            ColumnType::Blob => "BLOB",
            ColumnType::DateTime | ColumnType::Timestamp => "DATETIME",
            ColumnType::Float | ColumnType::Double => "REAL",
            ColumnType::Decimal => "NUMERIC",
        }
        .to_string()
    }

    fn table_check_query(&self, table: &str) -> CheckQuery {
        CheckQuery::new(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?",
            vec![table.to_string()],
        )
    }

    fn index_check_query(&self, table: &str, index_name: &str) -> CheckQuery {
        CheckQuery::new(
            "SELECT 1 FROM sqlite_master WHERE type = 'index' AND tbl_name = ? AND name = ?",
            vec![table.to_string(), index_name.to_string()],
        )
    }

    fn column_check_query(&self, table: &str, column: &str) -> CheckQuery {
        CheckQuery::new(
            "SELECT 1 FROM pragma_table_info(?) WHERE name = ?",
            vec![table.to_string(), column.to_string()],
        )
    }

    fn primary_key_check_query(&self, table: &str) -> CheckQuery {
        CheckQuery::new(
            "SELECT 1 FROM pragma_table_info(?) WHERE pk > 0",
            vec![table.to_string()],
        )
    }

    fn is_unique_violation(&self, err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db) => {
                db.kind() == sqlx::error::ErrorKind::UniqueViolation
                    || db.message().contains("UNIQUE constraint failed")
            }
            _ => false,
        }
    }
}
