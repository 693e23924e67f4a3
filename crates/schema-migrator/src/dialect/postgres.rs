//! PostgreSQL dialect.

use super::{CheckQuery, Dialect, DialectKind};
use crate::schema::{Column, ColumnType};

/// PostgreSQL migration dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Creates a new PostgreSQL dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn sized(name: &str, col: &Column) -> String {
    assert!(
        col.length > 0,
        "column '{}': {:?} needs a length on postgres",
        col.name,
        col.column_type
    );
    format!("{name}({})", col.length)
}

impl Dialect for PostgresDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn bind_var(&self, n: usize) -> String {
        format!("${n}")
    }

    fn auto_incr_str(&self) -> &'static str {
        // SERIAL/BIGSERIAL carry the sequence.
        ""
    }

    fn bool_str(&self, value: bool) -> &'static str {
        if value { "TRUE" } else { "FALSE" }
    }

    fn sql_type(&self, col: &Column) -> String {
        match col.column_type {
            ColumnType::BigInt if col.is_auto_increment => "BIGSERIAL".to_string(),
            ColumnType::Int if col.is_auto_increment => "SERIAL".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Int => "INTEGER".to_string(),
            ColumnType::SmallInt => "SMALLINT".to_string(),
            ColumnType::Varchar | ColumnType::NVarchar => sized("VARCHAR", col),
            ColumnType::Char => sized("CHAR", col),
            ColumnType::Text | ColumnType::MediumText | ColumnType::LongText => {
                "TEXT".to_string()
            }
            ColumnType::Blob => "BYTEA".to_string(),
            ColumnType::DateTime | ColumnType::Timestamp => "TIMESTAMP".to_string(),
            ColumnType::Bool => "BOOL".to_string(),
            ColumnType::Float => "REAL".to_string(),
            ColumnType::Double => "DOUBLE PRECISION".to_string(),
            ColumnType::Decimal => format!("DECIMAL({}, {})", col.length, col.length2),
        }
    }

    fn default_value(&self, col: &Column) -> Option<String> {
        let default = col.default.as_deref()?;
        if col.column_type == ColumnType::Bool {
            match default {
                "0" => return Some(self.bool_str(false).to_string()),
                "1" => return Some(self.bool_str(true).to_string()),
                _ => {}
            }
        }
        Some(default.to_string())
    }

    fn reset_sequence_sql(&self, table: &str, column: &str) -> Vec<String> {
        // pg_get_serial_sequence parses the table argument as an identifier
        // but takes the column name verbatim.
        vec![format!(
            "SELECT setval(pg_get_serial_sequence('{}', '{}'), COALESCE(MAX({}), 0) + 1, false) FROM {}",
            self.quote(table).replace('\'', "''"),
            column.replace('\'', "''"),
            self.quote(column),
            self.quote(table)
        )]
    }

    fn table_check_query(&self, table: &str) -> CheckQuery {
        CheckQuery::new(
            "SELECT 1 FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = $1",
            vec![table.to_string()],
        )
    }

    fn index_check_query(&self, table: &str, index_name: &str) -> CheckQuery {
        CheckQuery::new(
            "SELECT 1 FROM pg_indexes \
             WHERE schemaname = current_schema() AND tablename = $1 AND indexname = $2",
            vec![table.to_string(), index_name.to_string()],
        )
    }

    fn column_check_query(&self, table: &str, column: &str) -> CheckQuery {
        CheckQuery::new(
            "SELECT 1 FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 AND column_name = $2",
            vec![table.to_string(), column.to_string()],
        )
    }

    fn primary_key_check_query(&self, table: &str) -> CheckQuery {
        CheckQuery::new(
            "SELECT 1 FROM information_schema.table_constraints \
             WHERE table_schema = current_schema() AND table_name = $1 \
             AND constraint_type = 'PRIMARY KEY'",
            vec![table.to_string()],
        )
    }
}
