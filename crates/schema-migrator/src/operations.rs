//! Migration definitions.
//!
//! A [`Migration`] pairs a permanent identifier with one kind of change and
//! an optional run [`Condition`]. Migrations are built once by the embedding
//! application, in order, and handed to the migrator; the identifier is the
//! idempotency key in the migration log and must never be reused.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use sqlx::AnyConnection;

use crate::condition::Condition;
use crate::dialect::{Dialect, DialectKind};
use crate::error::Result;
use crate::schema::{Column, Index, Table};

/// Log text recorded for code migrations.
pub const CODE_MIGRATION_SQL: &str = "code migration";

/// Raw SQL with optional per-dialect overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawSql {
    default: Option<String>,
    per_dialect: BTreeMap<DialectKind, String>,
}

impl RawSql {
    /// Creates an empty raw SQL migration body.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// SQL used when no dialect-specific override exists.
    #[must_use]
    pub fn default_sql(mut self, sql: impl Into<String>) -> Self {
        self.default = Some(sql.into());
        self
    }

    /// SQL for SQLite.
    #[must_use]
    pub fn sqlite(self, sql: impl Into<String>) -> Self {
        self.for_dialect(DialectKind::Sqlite, sql)
    }

    /// SQL for MySQL.
    #[must_use]
    pub fn mysql(self, sql: impl Into<String>) -> Self {
        self.for_dialect(DialectKind::Mysql, sql)
    }

    /// SQL for PostgreSQL.
    #[must_use]
    pub fn postgres(self, sql: impl Into<String>) -> Self {
        self.for_dialect(DialectKind::Postgres, sql)
    }

    /// SQL for the given dialect.
    #[must_use]
    pub fn for_dialect(mut self, kind: DialectKind, sql: impl Into<String>) -> Self {
        self.per_dialect.insert(kind, sql.into());
        self
    }

    /// The SQL for `kind`; `None` means nothing to run on that dialect.
    #[must_use]
    pub fn render(&self, kind: DialectKind) -> Option<&str> {
        self.per_dialect
            .get(&kind)
            .or(self.default.as_ref())
            .map(String::as_str)
            .filter(|sql| !sql.trim().is_empty())
    }
}

/// Imperative migration logic that cannot be expressed as static SQL.
///
/// `exec` receives the connection of the migration's transaction, so any
/// statement it issues commits or rolls back together with the log row.
/// Implementations must behave correctly on every supported dialect.
pub trait CodeMigration: Send + Sync {
    /// Text stored in the migration log.
    fn sql(&self, _dialect: &dyn Dialect) -> String {
        CODE_MIGRATION_SQL.to_string()
    }

    /// Runs the migration.
    fn exec<'a>(
        &'a self,
        conn: &'a mut AnyConnection,
        dialect: &'a dyn Dialect,
    ) -> BoxFuture<'a, Result<()>>;
}

/// The change a migration performs.
#[derive(Clone)]
pub enum MigrationKind {
    /// Create a table.
    AddTable(Table),
    /// Drop a table.
    DropTable(String),
    /// Rename a table.
    RenameTable {
        /// Current name.
        from: String,
        /// New name.
        to: String,
    },
    /// Add a column.
    AddColumn {
        /// Table name.
        table: String,
        /// Column definition.
        column: Column,
    },
    /// Drop a column.
    DropColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
    /// Rename a column.
    RenameColumn {
        /// Table name.
        table: String,
        /// Current name.
        from: String,
        /// New name.
        to: String,
    },
    /// Create an index.
    AddIndex {
        /// Owning table name.
        table: String,
        /// Index definition.
        index: Index,
    },
    /// Drop an index.
    DropIndex {
        /// Owning table name.
        table: String,
        /// Index definition.
        index: Index,
    },
    /// Copy rows between tables, `(target column, source column)` pairs.
    CopyTableData {
        /// Table receiving rows.
        target: String,
        /// Table providing rows.
        source: String,
        /// Column mapping, in insert order.
        columns: Vec<(String, String)>,
    },
    /// Move an auto-increment counter past the rows present in the table.
    ResetSequence {
        /// Table name.
        table: String,
        /// Auto-increment column.
        column: String,
    },
    /// Convert a table and columns to the default character set.
    TableCharset {
        /// Table name.
        table: String,
        /// Columns to convert.
        columns: Vec<Column>,
    },
    /// Raw SQL.
    RawSql(RawSql),
    /// Imperative code.
    Code(Arc<dyn CodeMigration>),
}

impl fmt::Debug for MigrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddTable(table) => f.debug_tuple("AddTable").field(&table.name).finish(),
            Self::DropTable(name) => f.debug_tuple("DropTable").field(name).finish(),
            Self::RenameTable { from, to } => f
                .debug_struct("RenameTable")
                .field("from", from)
                .field("to", to)
                .finish(),
            Self::AddColumn { table, column } => f
                .debug_struct("AddColumn")
                .field("table", table)
                .field("column", &column.name)
                .finish(),
            Self::DropColumn { table, column } => f
                .debug_struct("DropColumn")
                .field("table", table)
                .field("column", column)
                .finish(),
            Self::RenameColumn { table, from, to } => f
                .debug_struct("RenameColumn")
                .field("table", table)
                .field("from", from)
                .field("to", to)
                .finish(),
            Self::AddIndex { table, index } => f
                .debug_tuple("AddIndex")
                .field(&index.x_name(table))
                .finish(),
            Self::DropIndex { table, index } => f
                .debug_tuple("DropIndex")
                .field(&index.x_name(table))
                .finish(),
            Self::CopyTableData { target, source, .. } => f
                .debug_struct("CopyTableData")
                .field("target", target)
                .field("source", source)
                .finish(),
            Self::ResetSequence { table, column } => f
                .debug_struct("ResetSequence")
                .field("table", table)
                .field("column", column)
                .finish(),
            Self::TableCharset { table, .. } => {
                f.debug_tuple("TableCharset").field(table).finish()
            }
            Self::RawSql(raw) => f.debug_tuple("RawSql").field(raw).finish(),
            Self::Code(_) => f.write_str("Code"),
        }
    }
}

/// A named, ordered unit of schema or data change.
#[derive(Debug, Clone)]
pub struct Migration {
    /// Permanent identifier; the key in the migration log.
    pub id: String,
    /// What the migration does.
    pub kind: MigrationKind,
    /// Optional run condition.
    pub condition: Option<Condition>,
}

impl Migration {
    /// Creates a migration.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: MigrationKind) -> Self {
        Self {
            id: id.into(),
            kind,
            condition: None,
        }
    }

    /// Attaches a run condition.
    #[must_use]
    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Creates an `AddTable` migration.
    #[must_use]
    pub fn add_table(id: impl Into<String>, table: Table) -> Self {
        Self::new(id, MigrationKind::AddTable(table))
    }

    /// Creates a `DropTable` migration.
    #[must_use]
    pub fn drop_table(id: impl Into<String>, table: impl Into<String>) -> Self {
        Self::new(id, MigrationKind::DropTable(table.into()))
    }

    /// Creates a `RenameTable` migration.
    #[must_use]
    pub fn rename_table(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            MigrationKind::RenameTable {
                from: from.into(),
                to: to.into(),
            },
        )
    }

    /// Creates an `AddColumn` migration.
    #[must_use]
    pub fn add_column(id: impl Into<String>, table: &Table, column: Column) -> Self {
        Self::new(
            id,
            MigrationKind::AddColumn {
                table: table.name.clone(),
                column,
            },
        )
    }

    /// Creates a `DropColumn` migration.
    #[must_use]
    pub fn drop_column(id: impl Into<String>, table: &Table, column: impl Into<String>) -> Self {
        Self::new(
            id,
            MigrationKind::DropColumn {
                table: table.name.clone(),
                column: column.into(),
            },
        )
    }

    /// Creates a `RenameColumn` migration.
    #[must_use]
    pub fn rename_column(
        id: impl Into<String>,
        table: &Table,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            MigrationKind::RenameColumn {
                table: table.name.clone(),
                from: from.into(),
                to: to.into(),
            },
        )
    }

    /// Creates an `AddIndex` migration.
    #[must_use]
    pub fn add_index(id: impl Into<String>, table: &Table, index: Index) -> Self {
        Self::new(
            id,
            MigrationKind::AddIndex {
                table: table.name.clone(),
                index,
            },
        )
    }

    /// Creates a `DropIndex` migration.
    #[must_use]
    pub fn drop_index(id: impl Into<String>, table: &Table, index: Index) -> Self {
        Self::new(
            id,
            MigrationKind::DropIndex {
                table: table.name.clone(),
                index,
            },
        )
    }

    /// Creates a `CopyTableData` migration from `(target, source)` column pairs.
    #[must_use]
    pub fn copy_table_data<T: Into<String>, S: Into<String>>(
        id: impl Into<String>,
        target: impl Into<String>,
        source: impl Into<String>,
        columns: impl IntoIterator<Item = (T, S)>,
    ) -> Self {
        Self::new(
            id,
            MigrationKind::CopyTableData {
                target: target.into(),
                source: source.into(),
                columns: columns
                    .into_iter()
                    .map(|(t, s)| (t.into(), s.into()))
                    .collect(),
            },
        )
    }

    /// Creates a `ResetSequence` migration.
    #[must_use]
    pub fn reset_sequence(
        id: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            MigrationKind::ResetSequence {
                table: table.into(),
                column: column.into(),
            },
        )
    }

    /// Creates a `TableCharset` migration.
    #[must_use]
    pub fn table_charset(id: impl Into<String>, table: &Table, columns: Vec<Column>) -> Self {
        Self::new(
            id,
            MigrationKind::TableCharset {
                table: table.name.clone(),
                columns,
            },
        )
    }

    /// Creates a `RawSql` migration.
    #[must_use]
    pub fn raw_sql(id: impl Into<String>, sql: RawSql) -> Self {
        Self::new(id, MigrationKind::RawSql(sql))
    }

    /// Creates a code migration.
    #[must_use]
    pub fn code(id: impl Into<String>, code: impl CodeMigration + 'static) -> Self {
        Self::new(id, MigrationKind::Code(Arc::new(code)))
    }

    /// Returns the code hook for code migrations.
    #[must_use]
    pub fn code_hook(&self) -> Option<&dyn CodeMigration> {
        match &self.kind {
            MigrationKind::Code(code) => Some(code.as_ref()),
            _ => None,
        }
    }

    /// Whether the change is structural DDL, which some dialects cannot run
    /// inside a transaction.
    #[must_use]
    pub fn is_ddl(&self) -> bool {
        !matches!(
            self.kind,
            MigrationKind::CopyTableData { .. }
                | MigrationKind::ResetSequence { .. }
                | MigrationKind::RawSql(_)
                | MigrationKind::Code(_)
        )
    }

    /// Statements to execute on the dialect. Empty means nothing to run.
    #[must_use]
    pub fn sql(&self, dialect: &dyn Dialect) -> Vec<String> {
        match &self.kind {
            MigrationKind::AddTable(table) => vec![dialect.create_table_sql(table)],
            MigrationKind::DropTable(name) => vec![dialect.drop_table_sql(name)],
            MigrationKind::RenameTable { from, to } => vec![dialect.rename_table_sql(from, to)],
            MigrationKind::AddColumn { table, column } => {
                vec![dialect.add_column_sql(table, column)]
            }
            MigrationKind::DropColumn { table, column } => {
                vec![dialect.drop_column_sql(table, column)]
            }
            MigrationKind::RenameColumn { table, from, to } => {
                vec![dialect.rename_column_sql(table, from, to)]
            }
            MigrationKind::AddIndex { table, index } => {
                vec![dialect.create_index_sql(table, index)]
            }
            MigrationKind::DropIndex { table, index } => {
                vec![dialect.drop_index_sql(table, index)]
            }
            MigrationKind::CopyTableData {
                target,
                source,
                columns,
            } => {
                let (target_cols, source_cols): (Vec<String>, Vec<String>) =
                    columns.iter().cloned().unzip();
                vec![dialect.copy_table_data_sql(source, target, &source_cols, &target_cols)]
            }
            MigrationKind::ResetSequence { table, column } => {
                dialect.reset_sequence_sql(table, column)
            }
            MigrationKind::TableCharset { table, columns } => {
                dialect.update_table_charset_sql(table, columns)
            }
            MigrationKind::RawSql(raw) => raw
                .render(dialect.kind())
                .map(|sql| vec![sql.to_string()])
                .unwrap_or_default(),
            MigrationKind::Code(_) => Vec::new(),
        }
    }

    /// The text recorded in the migration log.
    #[must_use]
    pub fn rendered_sql(&self, dialect: &dyn Dialect) -> String {
        match &self.kind {
            MigrationKind::Code(code) => code.sql(dialect),
            _ => self.sql(dialect).join(";\n"),
        }
    }

    /// One `AddIndex` migration per index of `table`.
    #[must_use]
    pub fn add_table_indices(version: &str, table: &Table) -> Vec<Self> {
        table
            .indices
            .iter()
            .map(|index| {
                let id = format!("create index {} - {version}", index.x_name(&table.name));
                Self::add_index(id, table, index.clone())
            })
            .collect()
    }

    /// One `DropIndex` migration per index of `table`.
    #[must_use]
    pub fn drop_table_indices(version: &str, table: &Table) -> Vec<Self> {
        table
            .indices
            .iter()
            .map(|index| {
                let id = format!("drop index {} - {version}", index.x_name(&table.name));
                Self::drop_index(id, table, index.clone())
            })
            .collect()
    }

    /// Reshapes a table by recreating it: create `to` under a temporary name,
    /// copy rows from `from` using the `(target, source)` column mapping,
    /// move auto-increment counters past the copied ids, drop `from`, rename
    /// the temporary table to `to.name` and create the indices of `to`.
    #[must_use]
    pub fn replace_table<T: Into<String>, S: Into<String>>(
        from: &Table,
        to: &Table,
        version: u32,
        columns: impl IntoIterator<Item = (T, S)>,
    ) -> Vec<Self> {
        let from_v = format!("v{}", version.saturating_sub(1));
        let to_v = format!("v{version}");
        let tmp = to.renamed(format!("{}_tmp_qwerty", to.name));

        let mut migrations = vec![
            Self::add_table(format!("create {} table {to_v}", tmp.name), tmp.clone()),
            Self::copy_table_data(
                format!("copy {} {from_v} to {to_v}", from.name),
                tmp.name.clone(),
                from.name.clone(),
                columns,
            ),
        ];
        migrations.extend(tmp.columns.iter().filter(|c| c.is_auto_increment).map(|c| {
            Self::reset_sequence(
                format!("reset {} {} sequence {to_v}", tmp.name, c.name),
                tmp.name.clone(),
                c.name.clone(),
            )
        }));
        migrations.push(Self::drop_table(
            format!("drop {} table {from_v}", from.name),
            from.name.clone(),
        ));
        migrations.push(Self::rename_table(
            format!("rename table {} to {} - {to_v}", tmp.name, to.name),
            tmp.name.clone(),
            to.name.clone(),
        ));
        migrations.extend(Self::add_table_indices(&to_v, to));
        migrations
    }
}
