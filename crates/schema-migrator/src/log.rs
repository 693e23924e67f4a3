//! Migration log.
//!
//! The `migration_log` table is an append-only record of every migration
//! attempt. A migration id with a `success = true` row is never executed
//! again; failed rows are kept for diagnostics and do not block a retry.

use std::collections::HashSet;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::any::AnyRow;
use sqlx::{AnyConnection, AnyPool, Row};
use tracing::{debug, warn};

use crate::condition::object_exists;
use crate::dialect::Dialect;
use crate::error::{MigrateError, Result};
use crate::schema::{Column, ColumnType, Table};

/// Name of the log table.
pub const LOG_TABLE: &str = "migration_log";

/// Log id under which the log table's own creation is recorded.
pub const LOG_BOOTSTRAP_ID: &str = "create migration_log table";

/// Definition of the log table.
#[must_use]
pub fn log_table() -> Table {
    Table::new(LOG_TABLE)
        .column(
            Column::new("id", ColumnType::BigInt)
                .primary_key()
                .auto_increment(),
        )
        .column(Column::varchar("migration_id", 255).not_null())
        .column(Column::new("sql", ColumnType::Text).not_null())
        .column(Column::new("success", ColumnType::Bool).not_null())
        .column(Column::new("error", ColumnType::Text))
        .column(Column::varchar("timestamp", 40).not_null())
}

/// One row of the migration log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationLogEntry {
    /// Row id.
    pub id: i64,
    /// Migration identifier.
    pub migration_id: String,
    /// Rendered SQL, empty when a condition skipped the migration.
    pub sql: String,
    /// Whether the attempt succeeded.
    pub success: bool,
    /// Error text of a failed attempt.
    pub error: Option<String>,
    /// When the attempt finished.
    pub timestamp: DateTime<Utc>,
}

/// Access to the `migration_log` table.
#[derive(Clone)]
pub struct MigrationLog {
    pool: AnyPool,
    dialect: &'static dyn Dialect,
}

impl MigrationLog {
    /// Creates a log accessor.
    pub fn new(pool: AnyPool, dialect: &'static dyn Dialect) -> Self {
        Self { pool, dialect }
    }

    /// Whether the log table exists.
    pub async fn exists(&self) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        object_exists(&mut conn, &self.dialect.table_check_query(LOG_TABLE)).await
    }

    /// Creates the log table if it is missing and records its creation.
    /// Returns whether this call created it. Concurrent callers leave a
    /// single bootstrap row between them.
    pub async fn ensure_table(&self) -> Result<bool> {
        if self.exists().await? {
            return Ok(false);
        }

        let sql = self.dialect.create_table_sql(&log_table());
        let result = if self.dialect.supports_transactional_ddl() {
            let mut tx = self.pool.begin().await?;
            match self.bootstrap(&mut tx, &sql).await {
                Ok(created) => tx.commit().await.map(|()| created).map_err(MigrateError::from),
                Err(err) => {
                    if let Err(rollback) = tx.rollback().await {
                        warn!(error = %rollback, "rollback of log bootstrap failed");
                    }
                    Err(err)
                }
            }
        } else {
            let mut conn = self.pool.acquire().await?;
            self.bootstrap(&mut conn, &sql).await
        };

        match result {
            Err(MigrateError::Database(err)) if self.dialect.is_duplicate_object(&err) => {
                debug!(error = %err, "log table was created concurrently");
                if self.exists().await? {
                    Ok(false)
                } else {
                    Err(err.into())
                }
            }
            other => other,
        }
    }

    async fn bootstrap(&self, conn: &mut AnyConnection, sql: &str) -> Result<bool> {
        sqlx::raw_sql(sql).execute(&mut *conn).await?;
        self.record_once(conn, LOG_BOOTSTRAP_ID, sql).await
    }

    /// Ids of every migration with a successful row.
    pub async fn load(&self) -> Result<HashSet<String>> {
        if !self.exists().await? {
            return Ok(HashSet::new());
        }

        let sql = format!(
            "SELECT migration_id FROM {} WHERE success = {}",
            self.dialect.quote(LOG_TABLE),
            self.dialect.bool_str(true)
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("migration_id")
                    .map_err(MigrateError::from)
            })
            .collect()
    }

    /// Appends a row stamped with the current time. Runs on the given
    /// connection so it can share the migration's transaction.
    pub async fn record(
        &self,
        conn: &mut AnyConnection,
        migration_id: &str,
        sql: &str,
        success: bool,
        error: Option<&str>,
    ) -> Result<()> {
        let d = self.dialect;
        let insert = format!(
            "INSERT INTO {} ({}, {}, {}, {}, {}) VALUES ({})",
            d.quote(LOG_TABLE),
            d.quote("migration_id"),
            d.quote("sql"),
            d.quote("success"),
            d.quote("error"),
            d.quote("timestamp"),
            d.bind_vars(5)
        );
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        sqlx::query(&insert)
            .bind(migration_id)
            .bind(sql)
            .bind(success)
            .bind(error)
            .bind(timestamp)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Appends a success row unless the id already has one. Returns whether
    /// a row was written.
    pub async fn record_once(
        &self,
        conn: &mut AnyConnection,
        migration_id: &str,
        sql: &str,
    ) -> Result<bool> {
        let d = self.dialect;
        let insert = format!(
            "INSERT INTO {table} ({}, {}, {}, {}, {})\n\
             SELECT {}, {}, {yes}, NULL, {} FROM (SELECT 1 AS one) seed\n\
             WHERE NOT EXISTS (SELECT 1 FROM {table} WHERE {} = {} AND {} = {yes})",
            d.quote("migration_id"),
            d.quote("sql"),
            d.quote("success"),
            d.quote("error"),
            d.quote("timestamp"),
            d.bind_var(1),
            d.bind_var(2),
            d.bind_var(3),
            d.quote("migration_id"),
            d.bind_var(4),
            d.quote("success"),
            table = d.quote(LOG_TABLE),
            yes = d.bool_str(true),
        );
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        let result = sqlx::query(&insert)
            .bind(migration_id)
            .bind(sql)
            .bind(timestamp)
            .bind(migration_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Every row, oldest first.
    pub async fn entries(&self) -> Result<Vec<MigrationLogEntry>> {
        if !self.exists().await? {
            return Ok(Vec::new());
        }

        let sql = format!("{} ORDER BY {}", self.select_sql(), self.dialect.quote("id"));
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(decode_entry).collect()
    }

    /// Most recent failed row for a migration id.
    pub async fn last_failure(&self, migration_id: &str) -> Result<Option<MigrationLogEntry>> {
        if !self.exists().await? {
            return Ok(None);
        }

        let d = self.dialect;
        let sql = format!(
            "{} WHERE {} = {} AND {} = {} ORDER BY {} DESC LIMIT 1",
            self.select_sql(),
            d.quote("migration_id"),
            d.bind_var(1),
            d.quote("success"),
            d.bool_str(false),
            d.quote("id")
        );
        let row = sqlx::query(&sql)
            .bind(migration_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_entry).transpose()
    }

    fn select_sql(&self) -> String {
        let d = self.dialect;
        let cols: Vec<String> = ["id", "migration_id", "sql", "success", "error", "timestamp"]
            .iter()
            .map(|c| d.quote(c))
            .collect();
        format!("SELECT {} FROM {}", cols.join(", "), d.quote(LOG_TABLE))
    }
}

/// Reads a boolean stored as a native bool or as a small integer.
fn decode_flag(row: &AnyRow, col: &str) -> Result<bool> {
    if let Ok(v) = row.try_get::<bool, _>(col) {
        return Ok(v);
    }
    if let Ok(v) = row.try_get::<i64, _>(col) {
        return Ok(v != 0);
    }
    if let Ok(v) = row.try_get::<i32, _>(col) {
        return Ok(v != 0);
    }
    Ok(row.try_get::<i16, _>(col)? != 0)
}

fn decode_entry(row: &AnyRow) -> Result<MigrationLogEntry> {
    let raw: String = row.try_get("timestamp")?;
    let timestamp = DateTime::parse_from_rfc3339(&raw)
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?
        .with_timezone(&Utc);

    Ok(MigrationLogEntry {
        id: row.try_get("id")?,
        migration_id: row.try_get("migration_id")?,
        sql: row.try_get("sql")?,
        success: decode_flag(row, "success")?,
        error: row.try_get("error")?,
        timestamp,
    })
}
