//! Portable schema description types.
//!
//! These values describe tables, columns and indices independently of any
//! database. They are plain data: a `Table` is a description handed to many
//! migrations, never a live handle. Builders consume `self`, so a column that
//! changes between schema revisions is always a new value.

use serde::{Deserialize, Serialize};

/// Semantic column types understood by every dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// 64-bit integer.
    BigInt,
    /// 32-bit integer.
    Int,
    /// 16-bit integer.
    SmallInt,
    /// Variable-length string; uses `Column::length`.
    Varchar,
    /// Variable-length unicode string; uses `Column::length`.
    NVarchar,
    /// Fixed-length string; uses `Column::length`.
    Char,
    /// Text.
    Text,
    /// Medium text (MySQL distinguishes text sizes).
    MediumText,
    /// Long text.
    LongText,
    /// Binary large object.
    Blob,
    /// Date and time.
    DateTime,
    /// Timestamp.
    Timestamp,
    /// Boolean.
    Bool,
    /// Single precision floating point.
    Float,
    /// Double precision floating point.
    Double,
    /// Decimal; precision in `Column::length`, scale in `Column::length2`.
    Decimal,
}

impl ColumnType {
    /// Returns true for integer types (the only ones that may auto-increment).
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(self, Self::BigInt | Self::Int | Self::SmallInt)
    }

    /// Returns true for types that carry a character length.
    #[must_use]
    pub const fn needs_length(self) -> bool {
        matches!(self, Self::Varchar | Self::NVarchar | Self::Char)
    }
}

/// Description of a single column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Semantic type.
    pub column_type: ColumnType,
    /// Length (string types) or precision (decimal).
    pub length: u32,
    /// Scale (decimal).
    pub length2: u32,
    /// Whether the column allows NULL.
    pub nullable: bool,
    /// Default value as a raw SQL expression.
    pub default: Option<String>,
    /// Whether this column is (part of) the primary key.
    pub is_primary_key: bool,
    /// Whether this column auto-increments.
    pub is_auto_increment: bool,
    /// Collation hint: store as latin1 on dialects that support it.
    pub is_latin: bool,
}

impl Column {
    /// Creates a nullable column with no default.
    #[must_use]
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            length: 0,
            length2: 0,
            nullable: true,
            default: None,
            is_primary_key: false,
            is_auto_increment: false,
            is_latin: false,
        }
    }

    /// Shorthand for a `Varchar` column of the given length.
    #[must_use]
    pub fn varchar(name: impl Into<String>, length: u32) -> Self {
        Self::new(name, ColumnType::Varchar).length(length)
    }

    /// Sets the length.
    #[must_use]
    pub fn length(mut self, length: u32) -> Self {
        self.length = length;
        self
    }

    /// Sets precision and scale.
    #[must_use]
    pub fn precision(mut self, precision: u32, scale: u32) -> Self {
        self.length = precision;
        self.length2 = scale;
        self
    }

    /// Sets the column as NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the column as nullable.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Sets the default value expression, e.g. `"0"` or `"''"`.
    #[must_use]
    pub fn default_value(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    /// Marks the column as primary key. Primary keys are always NOT NULL.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.nullable = false;
        self
    }

    /// Marks the column as auto-incrementing.
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.is_auto_increment = true;
        self
    }

    /// Marks the column as latin1 collated.
    #[must_use]
    pub fn latin(mut self) -> Self {
        self.is_latin = true;
        self
    }
}

/// Kind of index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IndexKind {
    /// Plain index.
    #[default]
    Index,
    /// Unique index.
    Unique,
}

/// Description of an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Index {
    /// Index name; may be empty, see [`Index::x_name`].
    pub name: String,
    /// Indexed columns, in key order.
    pub cols: Vec<String>,
    /// Index kind.
    pub kind: IndexKind,
}

impl Index {
    /// Creates a plain, unnamed index.
    #[must_use]
    pub fn new<S: Into<String>>(cols: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: String::new(),
            cols: cols.into_iter().map(Into::into).collect(),
            kind: IndexKind::Index,
        }
    }

    /// Creates a unique, unnamed index.
    #[must_use]
    pub fn unique<S: Into<String>>(cols: impl IntoIterator<Item = S>) -> Self {
        Self {
            kind: IndexKind::Unique,
            ..Self::new(cols)
        }
    }

    /// Sets an explicit name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Returns true for unique indices.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.kind == IndexKind::Unique
    }

    /// Returns the name the index gets in the database.
    ///
    /// Unnamed indices are named after their columns. Names not already
    /// carrying an `IDX_`/`UQE_` prefix are qualified with the kind and the
    /// table name, so the same index description yields the same name on
    /// every run.
    #[must_use]
    pub fn x_name(&self, table: &str) -> String {
        let base = if self.name.is_empty() {
            self.cols.join("_")
        } else {
            self.name.clone()
        };

        if base.starts_with("UQE_") || base.starts_with("IDX_") {
            return base;
        }

        match self.kind {
            IndexKind::Unique => format!("UQE_{table}_{base}"),
            IndexKind::Index => format!("IDX_{table}_{base}"),
        }
    }
}

/// Description of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Table name.
    pub name: String,
    /// Columns in DDL order.
    pub columns: Vec<Column>,
    /// Explicit primary key columns (composite keys).
    pub primary_keys: Vec<String>,
    /// Indices created alongside the table.
    pub indices: Vec<Index>,
}

impl Table {
    /// Creates an empty table description.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_keys: Vec::new(),
            indices: Vec::new(),
        }
    }

    /// Appends a column.
    #[must_use]
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Sets an explicit (composite) primary key.
    #[must_use]
    pub fn primary_keys<S: Into<String>>(mut self, cols: impl IntoIterator<Item = S>) -> Self {
        self.primary_keys = cols.into_iter().map(Into::into).collect();
        self
    }

    /// Appends an index.
    #[must_use]
    pub fn index(mut self, index: Index) -> Self {
        self.indices.push(index);
        self
    }

    /// Returns a copy of this description under another name.
    #[must_use]
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Gets a column by name.
    #[must_use]
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column names in DDL order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Returns the primary key columns: the explicit list when set,
    /// otherwise every column flagged as primary key, in column order.
    #[must_use]
    pub fn primary_key_columns(&self) -> Vec<String> {
        if !self.primary_keys.is_empty() {
            return self.primary_keys.clone();
        }
        self.columns
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.clone())
            .collect()
    }
}
