//! Database dialect implementations.
//!
//! Each dialect knows how to render the portable schema description as DDL
//! for one database engine, how to quote identifiers and bind arguments, and
//! how to ask the live database whether a table, index or column exists.

mod mysql;
mod postgres;
mod sqlite;

use std::fmt;

pub use mysql::MysqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use serde::{Deserialize, Serialize};
use sqlx::AnyPool;

use crate::error::{MigrateError, Result};
use crate::schema::{Column, Index, Table};

static SQLITE: SqliteDialect = SqliteDialect;
static MYSQL: MysqlDialect = MysqlDialect;
static POSTGRES: PostgresDialect = PostgresDialect;

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DialectKind {
    /// SQLite 3.35+.
    Sqlite,
    /// MySQL 8 / MariaDB.
    Mysql,
    /// PostgreSQL.
    Postgres,
}

impl DialectKind {
    /// All supported dialects.
    pub const ALL: [Self; 3] = [Self::Sqlite, Self::Mysql, Self::Postgres];

    /// Resolves a driver or backend name such as `sqlite3`, `MySQL` or
    /// `PostgreSQL`.
    pub fn from_driver_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "mysql" | "mariadb" => Ok(Self::Mysql),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            _ => Err(MigrateError::UnsupportedDriver(name.to_string())),
        }
    }

    /// Detects the dialect from a live connection of the pool.
    pub async fn detect(pool: &AnyPool) -> Result<Self> {
        let conn = pool.acquire().await?;
        Self::from_driver_name(conn.backend_name())
    }

    /// Canonical driver name.
    #[must_use]
    pub const fn driver_name(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite3",
            Self::Mysql => "mysql",
            Self::Postgres => "postgres",
        }
    }

    /// Returns the dialect implementation.
    #[must_use]
    pub fn dialect(self) -> &'static dyn Dialect {
        match self {
            Self::Sqlite => &SQLITE,
            Self::Mysql => &MYSQL,
            Self::Postgres => &POSTGRES,
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.driver_name())
    }
}

/// An introspection query; the object exists iff the query returns rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckQuery {
    /// SQL with dialect placeholders.
    pub sql: String,
    /// Arguments bound in order.
    pub args: Vec<String>,
}

impl CheckQuery {
    /// Creates a check query.
    #[must_use]
    pub fn new(sql: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }
}

/// Panics on column descriptions no dialect can render.
fn validate_column(col: &Column) {
    if col.is_auto_increment {
        assert!(
            col.column_type.is_integer(),
            "column '{}': auto-increment requires an integer type, got {:?}",
            col.name,
            col.column_type
        );
        assert!(
            col.is_primary_key,
            "column '{}': auto-increment is only supported on the primary key",
            col.name
        );
    }
}

/// Trait for database-specific SQL generation.
pub trait Dialect: Send + Sync {
    /// Returns which engine this dialect targets.
    fn kind(&self) -> DialectKind;

    /// Returns the driver name used for dialect selection.
    fn driver_name(&self) -> &'static str {
        self.kind().driver_name()
    }

    /// Quotes an identifier (table name, column name, etc.).
    fn quote(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Quotes and joins a list of identifiers.
    fn quote_list(&self, names: &[String]) -> String {
        names
            .iter()
            .map(|n| self.quote(n))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Placeholder for the `n`-th (1-based) bound argument.
    fn bind_var(&self, _n: usize) -> String {
        "?".to_string()
    }

    /// Placeholders for `count` arguments, comma separated.
    fn bind_vars(&self, count: usize) -> String {
        (1..=count)
            .map(|n| self.bind_var(n))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Keyword appended after `PRIMARY KEY` for auto-increment columns.
    fn auto_incr_str(&self) -> &'static str;

    /// Native column type for the column.
    fn sql_type(&self, col: &Column) -> String;

    /// Literal used for boolean values in defaults and filters.
    fn bool_str(&self, value: bool) -> &'static str {
        if value { "1" } else { "0" }
    }

    /// Rendered default value for the column.
    fn default_value(&self, col: &Column) -> Option<String> {
        col.default.clone()
    }

    /// Column definition; `inline_pk` renders the `PRIMARY KEY` clause.
    fn column_definition(&self, col: &Column, inline_pk: bool) -> String {
        validate_column(col);

        let mut parts = vec![self.quote(&col.name), self.sql_type(col)];

        if inline_pk {
            parts.push("PRIMARY KEY".to_string());
            if col.is_auto_increment && !self.auto_incr_str().is_empty() {
                parts.push(self.auto_incr_str().to_string());
            }
        }

        if col.nullable && !inline_pk {
            parts.push("NULL".to_string());
        } else {
            parts.push("NOT NULL".to_string());
        }

        if let Some(default) = self.default_value(col) {
            parts.push(format!("DEFAULT {default}"));
        }

        parts.join(" ")
    }

    /// Column definition including its primary key clause.
    fn col_string(&self, col: &Column) -> String {
        self.column_definition(col, col.is_primary_key)
    }

    /// Column definition without primary key clause.
    fn col_string_no_pk(&self, col: &Column) -> String {
        self.column_definition(col, false)
    }

    /// Trailing table options appended to `CREATE TABLE`.
    fn table_options(&self) -> &'static str {
        ""
    }

    /// Generates SQL for creating a table.
    fn create_table_sql(&self, table: &Table) -> String {
        let pk = table.primary_key_columns();

        let mut defs: Vec<String> = table
            .columns
            .iter()
            .map(|c| {
                let inline_pk = pk.len() == 1 && pk[0] == c.name;
                self.column_definition(c, inline_pk)
            })
            .collect();

        if pk.len() > 1 {
            defs.push(format!("PRIMARY KEY ({})", self.quote_list(&pk)));
        }

        let mut sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
            self.quote(&table.name),
            defs.join(",\n  ")
        );

        let options = self.table_options();
        if !options.is_empty() {
            sql.push(' ');
            sql.push_str(options);
        }
        sql
    }

    /// Generates SQL for dropping a table.
    fn drop_table_sql(&self, name: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", self.quote(name))
    }

    /// Generates SQL for renaming a table.
    fn rename_table_sql(&self, old_name: &str, new_name: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote(old_name),
            self.quote(new_name)
        )
    }

    /// Generates SQL for adding a column.
    fn add_column_sql(&self, table: &str, col: &Column) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote(table),
            self.col_string_no_pk(col)
        )
    }

    /// Generates SQL for dropping a column.
    fn drop_column_sql(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote(table),
            self.quote(column)
        )
    }

    /// Generates SQL for renaming a column.
    fn rename_column_sql(&self, table: &str, old_name: &str, new_name: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            self.quote(table),
            self.quote(old_name),
            self.quote(new_name)
        )
    }

    /// Generates SQL for creating an index.
    fn create_index_sql(&self, table: &str, index: &Index) -> String {
        let unique = if index.is_unique() { "UNIQUE " } else { "" };
        format!(
            "CREATE {unique}INDEX {} ON {} ({})",
            self.quote(&index.x_name(table)),
            self.quote(table),
            self.quote_list(&index.cols)
        )
    }

    /// Generates SQL for dropping an index.
    fn drop_index_sql(&self, table: &str, index: &Index) -> String {
        format!("DROP INDEX IF EXISTS {}", self.quote(&index.x_name(table)))
    }

    /// Generates an `INSERT ... SELECT` copying rows between tables.
    fn copy_table_data_sql(
        &self,
        source: &str,
        target: &str,
        source_cols: &[String],
        target_cols: &[String],
    ) -> String {
        format!(
            "INSERT INTO {} ({})\nSELECT {}\nFROM {}",
            self.quote(target),
            self.quote_list(target_cols),
            self.quote_list(source_cols),
            self.quote(source)
        )
    }

    /// Statements converting a table and the given columns to the default
    /// character set. Dialects without the concept return nothing.
    fn update_table_charset_sql(&self, _table: &str, _columns: &[Column]) -> Vec<String> {
        Vec::new()
    }

    /// Statements moving the sequence behind an auto-increment column past
    /// the rows already in the table. Needed after rows were copied in with
    /// explicit ids; dialects whose counter follows the data return nothing.
    fn reset_sequence_sql(&self, _table: &str, _column: &str) -> Vec<String> {
        Vec::new()
    }

    /// Query returning rows iff the table exists.
    fn table_check_query(&self, table: &str) -> CheckQuery;

    /// Query returning rows iff the index exists on the table.
    fn index_check_query(&self, table: &str, index_name: &str) -> CheckQuery;

    /// Query returning rows iff the column exists on the table.
    fn column_check_query(&self, table: &str, column: &str) -> CheckQuery;

    /// Query returning rows iff the table has a primary key.
    fn primary_key_check_query(&self, table: &str) -> CheckQuery;

    /// Whether DDL statements can be rolled back inside a transaction.
    fn supports_transactional_ddl(&self) -> bool {
        true
    }

    /// Returns true if the error is a unique/primary key violation.
    fn is_unique_violation(&self, err: &sqlx::Error) -> bool {
        matches!(
            err,
            sqlx::Error::Database(db) if db.kind() == sqlx::error::ErrorKind::UniqueViolation
        )
    }

    /// Returns true if the error means a concurrent `CREATE` of the same
    /// object won. `IF NOT EXISTS` does not cover that race on every engine.
    fn is_duplicate_object(&self, err: &sqlx::Error) -> bool {
        if self.is_unique_violation(err) {
            return true;
        }
        match err {
            sqlx::Error::Database(db) => {
                matches!(db.code().as_deref(), Some("42P07" | "42710" | "42S01"))
                    || db.message().contains("already exists")
            }
            _ => false,
        }
    }
}
