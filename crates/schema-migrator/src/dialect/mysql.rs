//! MySQL dialect.
//!
//! MySQL commits implicitly around DDL, so structural migrations cannot be
//! rolled back and run outside a transaction. Tables are created as InnoDB
//! with `utf8mb4`; `is_latin` columns opt into `latin1_bin` for
//! case-sensitive, byte-compared keys.

use super::{CheckQuery, Dialect, DialectKind};
use crate::schema::{Column, ColumnType, Index};

const DEFAULT_CHARSET: &str = "CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci";

/// MySQL migration dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDialect;

impl MysqlDialect {
    /// Creates a new MySQL dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn sized(name: &str, col: &Column) -> String {
    assert!(
        col.length > 0,
        "column '{}': {:?} needs a length on mysql",
        col.name,
        col.column_type
    );
    format!("{name}({})", col.length)
}

impl Dialect for MysqlDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Mysql
    }

    fn quote(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn auto_incr_str(&self) -> &'static str {
        "AUTO_INCREMENT"
    }

    fn sql_type(&self, col: &Column) -> String {
        let mut res = match col.column_type {
            ColumnType::BigInt => "BIGINT(20)".to_string(),
            ColumnType::Int => "INT(11)".to_string(),
            ColumnType::SmallInt => "SMALLINT".to_string(),
            ColumnType::Varchar | ColumnType::NVarchar => sized("VARCHAR", col),
            ColumnType::Char => sized("CHAR", col),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::MediumText => "MEDIUMTEXT".to_string(),
            ColumnType::LongText => "LONGTEXT".to_string(),
            ColumnType::Blob => "MEDIUMBLOB".to_string(),
            ColumnType::DateTime => "DATETIME".to_string(),
            ColumnType::Timestamp => "TIMESTAMP".to_string(),
            ColumnType::Bool => "TINYINT(1)".to_string(),
            ColumnType::Float => "FLOAT".to_string(),
            ColumnType::Double => "DOUBLE".to_string(),
            ColumnType::Decimal => format!("DECIMAL({}, {})", col.length, col.length2),
        };

        if col.is_latin && col.column_type.needs_length() {
            res.push_str(" CHARACTER SET latin1 COLLATE latin1_bin");
        }
        res
    }

    fn table_options(&self) -> &'static str {
        "ENGINE=InnoDB DEFAULT CHARSET utf8mb4 COLLATE=utf8mb4_unicode_ci"
    }

    fn drop_index_sql(&self, table: &str, index: &Index) -> String {
        format!(
            "DROP INDEX {} ON {}",
            self.quote(&index.x_name(table)),
            self.quote(table)
        )
    }

    fn update_table_charset_sql(&self, table: &str, columns: &[Column]) -> Vec<String> {
        let mut clauses = vec![format!("DEFAULT {DEFAULT_CHARSET}")];
        for col in columns {
            let mut def = self.col_string_no_pk(col);
            if col.column_type.needs_length() && !col.is_latin {
                // Charset belongs right after the type, before NULL/DEFAULT.
                let ty = self.sql_type(col);
                def = def.replacen(&ty, &format!("{ty} {DEFAULT_CHARSET}"), 1);
            }
            clauses.push(format!("MODIFY {def}"));
        }
        vec![format!(
            "ALTER TABLE {} {}",
            self.quote(table),
            clauses.join(", ")
        )]
    }

    fn table_check_query(&self, table: &str) -> CheckQuery {
        CheckQuery::new(
            "SELECT 1 FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_name = ?",
            vec![table.to_string()],
        )
    }

    fn index_check_query(&self, table: &str, index_name: &str) -> CheckQuery {
        CheckQuery::new(
            "SELECT 1 FROM information_schema.statistics \
             WHERE table_schema = DATABASE() AND table_name = ? AND index_name = ?",
            vec![table.to_string(), index_name.to_string()],
        )
    }

    fn column_check_query(&self, table: &str, column: &str) -> CheckQuery {
        CheckQuery::new(
            "SELECT 1 FROM information_schema.columns \
             WHERE table_schema = DATABASE() AND table_name = ? AND column_name = ?",
            vec![table.to_string(), column.to_string()],
        )
    }

    fn primary_key_check_query(&self, table: &str) -> CheckQuery {
        CheckQuery::new(
            "SELECT 1 FROM information_schema.table_constraints \
             WHERE table_schema = DATABASE() AND table_name = ? \
             AND constraint_type = 'PRIMARY KEY'",
            vec![table.to_string()],
        )
    }

    fn supports_transactional_ddl(&self) -> bool {
        false
    }
}
