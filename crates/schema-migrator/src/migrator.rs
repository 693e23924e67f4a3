//! Migration runner.
//!
//! The migrator takes the migration lock, creates the log table on first
//! use, and then runs every migration without a success row, in order. Each
//! migration commits together with its log row where the dialect allows;
//! the first failure stops the batch.

use std::collections::HashSet;

use serde::Serialize;
use sqlx::{AnyConnection, AnyPool};
use tracing::{debug, info, warn};

use crate::config::MigratorConfig;
use crate::dialect::{Dialect, DialectKind};
use crate::error::{MigrateError, Result};
use crate::lock::{LockHandle, MIGRATOR_OPERATION, MigrationLock};
use crate::log::MigrationLog;
use crate::operations::Migration;

/// Outcome of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Ids that were executed.
    pub applied: Vec<String>,
    /// Ids whose condition did not hold.
    pub skipped: Vec<String>,
    /// `(id, sql)` for each pending migration in dry-run mode.
    pub rendered: Vec<(String, String)>,
}

impl MigrationReport {
    /// Whether the run changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty() && self.skipped.is_empty()
    }
}

enum Outcome {
    Applied,
    Skipped,
}

/// Runs an ordered list of migrations against one database.
pub struct Migrator {
    pool: AnyPool,
    kind: DialectKind,
    migrations: Vec<Migration>,
    config: MigratorConfig,
    log: MigrationLog,
}

impl Migrator {
    /// Creates a migrator. Fails if two migrations share an id.
    pub fn new(
        pool: AnyPool,
        kind: DialectKind,
        migrations: Vec<Migration>,
        config: MigratorConfig,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        for migration in &migrations {
            if !seen.insert(migration.id.as_str()) {
                return Err(MigrateError::DuplicateMigration(migration.id.clone()));
            }
        }

        let log = MigrationLog::new(pool.clone(), kind.dialect());
        Ok(Self {
            pool,
            kind,
            migrations,
            config,
            log,
        })
    }

    /// Creates a migrator for the dialect of the pool's connections.
    pub async fn connect(
        pool: AnyPool,
        migrations: Vec<Migration>,
        config: MigratorConfig,
    ) -> Result<Self> {
        let kind = DialectKind::detect(&pool).await?;
        Self::new(pool, kind, migrations, config)
    }

    /// The dialect in use.
    #[must_use]
    pub const fn dialect_kind(&self) -> DialectKind {
        self.kind
    }

    /// The registered migrations, in order.
    #[must_use]
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// The migration log.
    #[must_use]
    pub const fn log(&self) -> &MigrationLog {
        &self.log
    }

    /// The lock guarding runs of this migrator.
    #[must_use]
    pub fn lock(&self) -> MigrationLock {
        MigrationLock::new(
            self.pool.clone(),
            self.dialect(),
            MIGRATOR_OPERATION,
            self.config.lock_lease_duration(),
            self.config.lock_poll_interval_duration(),
        )
    }

    /// Migrations without a success row, in order.
    pub async fn pending(&self) -> Result<Vec<&Migration>> {
        let done = self.log.load().await?;
        Ok(self
            .migrations
            .iter()
            .filter(|m| !done.contains(&m.id))
            .collect())
    }

    /// Runs all pending migrations.
    pub async fn start(&self) -> Result<MigrationReport> {
        if self.config.dry_run {
            return self.dry_run().await;
        }

        info!(
            dialect = %self.kind,
            migrations = self.migrations.len(),
            "starting migrations"
        );

        let lock = self.lock();
        lock.ensure_table().await?;
        let mut handle = if self.config.locking {
            Some(lock.acquire(self.config.lock_timeout_duration()).await?)
        } else {
            None
        };

        let result = self.run(handle.as_mut()).await;

        if let Some(handle) = handle {
            if let Err(err) = handle.release().await {
                if result.is_ok() {
                    return Err(err);
                }
                warn!(error = %err, "failed to release migration lock");
            }
        }

        if let Ok(report) = &result {
            info!(
                applied = report.applied.len(),
                skipped = report.skipped.len(),
                "migrations finished"
            );
        }
        result
    }

    fn dialect(&self) -> &'static dyn Dialect {
        self.kind.dialect()
    }

    async fn dry_run(&self) -> Result<MigrationReport> {
        let dialect = self.dialect();
        let mut report = MigrationReport::default();
        for migration in self.pending().await? {
            let sql = migration.rendered_sql(dialect);
            info!(id = %migration.id, sql = %sql, "dry run");
            report.rendered.push((migration.id.clone(), sql));
        }
        Ok(report)
    }

    async fn run(&self, mut handle: Option<&mut LockHandle>) -> Result<MigrationReport> {
        if self.log.ensure_table().await? {
            info!("created migration log table");
        }

        let done = self.log.load().await?;
        let mut report = MigrationReport::default();

        for migration in &self.migrations {
            if done.contains(&migration.id) {
                continue;
            }
            if let Some(handle) = handle.as_mut() {
                handle.renew().await?;
            }

            match self.execute(migration).await {
                Ok(Outcome::Applied) => {
                    info!(id = %migration.id, "migration applied");
                    report.applied.push(migration.id.clone());
                }
                Ok(Outcome::Skipped) => report.skipped.push(migration.id.clone()),
                Err(err) => {
                    warn!(id = %migration.id, error = %err, "migration failed");
                    self.record_failure(migration, &err).await;
                    return Err(MigrateError::MigrationFailed {
                        id: migration.id.clone(),
                        source: Box::new(err),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Runs one migration in a transaction, or directly on a pooled
    /// connection for DDL the dialect cannot roll back.
    async fn execute(&self, migration: &Migration) -> Result<Outcome> {
        if migration.is_ddl() && !self.dialect().supports_transactional_ddl() {
            let mut conn = self.pool.acquire().await?;
            return self.apply(&mut conn, migration).await;
        }

        let mut tx = self.pool.begin().await?;
        match self.apply(&mut tx, migration).await {
            Ok(outcome) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(id = %migration.id, error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn apply(&self, conn: &mut AnyConnection, migration: &Migration) -> Result<Outcome> {
        let dialect = self.dialect();

        if let Some(condition) = &migration.condition {
            if !condition.is_fulfilled(conn, dialect).await? {
                warn!(id = %migration.id, ?condition, "condition not met, skipping migration");
                self.log.record(conn, &migration.id, "", true, None).await?;
                return Ok(Outcome::Skipped);
            }
        }

        if let Some(code) = migration.code_hook() {
            debug!(id = %migration.id, "running code migration");
            code.exec(&mut *conn, dialect).await?;
        } else {
            for statement in migration.sql(dialect) {
                debug!(id = %migration.id, sql = %statement, "executing");
                sqlx::raw_sql(&statement).execute(&mut *conn).await?;
            }
        }

        let sql = migration.rendered_sql(dialect);
        self.log.record(conn, &migration.id, &sql, true, None).await?;
        Ok(Outcome::Applied)
    }

    async fn record_failure(&self, migration: &Migration, err: &MigrateError) {
        let sql = migration.rendered_sql(self.dialect());
        let message = err.to_string();
        let recorded = match self.pool.acquire().await {
            Ok(mut conn) => {
                self.log
                    .record(&mut conn, &migration.id, &sql, false, Some(&message))
                    .await
            }
            Err(e) => Err(e.into()),
        };
        if let Err(e) = recorded {
            warn!(id = %migration.id, error = %e, "could not record migration failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::future::BoxFuture;
    use sqlx::any::AnyPoolOptions;

    use super::*;
    use crate::condition::Condition;
    use crate::operations::{CodeMigration, RawSql};
    use crate::schema::{Column, ColumnType, Index, Table};

    async fn create_test_pool() -> AnyPool {
        sqlx::any::install_default_drivers();
        AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool")
    }

    fn test_config() -> MigratorConfig {
        MigratorConfig::new()
            .lock_timeout(Duration::from_secs(10))
            .lock_poll_interval(Duration::from_millis(10))
    }

    fn create_migrator(pool: &AnyPool, migrations: Vec<Migration>) -> Migrator {
        Migrator::new(pool.clone(), DialectKind::Sqlite, migrations, test_config()).unwrap()
    }

    fn t_table() -> Table {
        Table::new("t")
            .column(
                Column::new("id", ColumnType::BigInt)
                    .primary_key()
                    .auto_increment(),
            )
            .column(Column::varchar("a", 50).not_null())
            .index(Index::new(["a"]))
    }

    fn raw(id: &str, sql: &str) -> Migration {
        Migration::raw_sql(id, RawSql::new().default_sql(sql))
    }

    async fn migration_ids(migrator: &Migrator) -> Vec<(String, bool)> {
        migrator
            .log()
            .entries()
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.migration_id, e.success))
            .collect()
    }

    async fn count_rows(pool: &AnyPool, table: &str) -> i64 {
        let row: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM \"{table}\""))
            .fetch_one(pool)
            .await
            .unwrap();
        row.0
    }

    #[tokio::test]
    async fn test_scenario_create_index_then_drop() {
        let pool = create_test_pool().await;
        let table = t_table();
        let mut migrations = vec![Migration::add_table("create_t", table.clone())];
        migrations.push(Migration::add_index("add_idx", &table, table.indices[0].clone()));

        let report = create_migrator(&pool, migrations.clone()).start().await.unwrap();
        assert_eq!(report.applied, vec!["create_t", "add_idx"]);

        let report = create_migrator(&pool, migrations.clone()).start().await.unwrap();
        assert!(report.is_empty());

        migrations.push(Migration::drop_index("drop_idx", &table, table.indices[0].clone()));
        let migrator = create_migrator(&pool, migrations);
        let report = migrator.start().await.unwrap();
        assert_eq!(report.applied, vec!["drop_idx"]);

        let ids: Vec<String> = migration_ids(&migrator)
            .await
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(
            ids,
            vec!["create migration_log table", "create_t", "add_idx", "drop_idx"]
        );

        let mut conn = pool.acquire().await.unwrap();
        let idx = Condition::index_exists(&table, &table.indices[0]);
        assert!(!idx.is_fulfilled(&mut conn, DialectKind::Sqlite.dialect()).await.unwrap());
    }

    #[tokio::test]
    async fn test_rerun_executes_nothing() {
        let pool = create_test_pool().await;
        let migrations = vec![
            Migration::add_table("create_t", t_table()),
            raw("seed", "INSERT INTO \"t\" (\"a\") VALUES ('x')"),
        ];

        create_migrator(&pool, migrations.clone()).start().await.unwrap();
        let migrator = create_migrator(&pool, migrations);
        assert!(migrator.pending().await.unwrap().is_empty());
        migrator.start().await.unwrap();

        assert_eq!(count_rows(&pool, "t").await, 1);
        assert_eq!(migration_ids(&migrator).await.len(), 3);
    }

    #[tokio::test]
    async fn test_false_condition_is_logged_as_success() {
        let pool = create_test_pool().await;
        let migrations = vec![
            raw("drop legacy", "DROP TABLE \"legacy\"").when(Condition::table_exists("legacy")),
        ];

        let migrator = create_migrator(&pool, migrations.clone());
        let report = migrator.start().await.unwrap();
        assert_eq!(report.skipped, vec!["drop legacy"]);
        assert!(report.applied.is_empty());

        let entries = migrator.log().entries().await.unwrap();
        let entry = entries.last().unwrap();
        assert_eq!(entry.migration_id, "drop legacy");
        assert!(entry.success);
        assert_eq!(entry.sql, "");

        let report = create_migrator(&pool, migrations).start().await.unwrap();
        assert!(report.is_empty());
        assert_eq!(migrator.log().entries().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_stops_batch_and_retry_resumes() {
        let pool = create_test_pool().await;
        let a = Migration::add_table("A", t_table());
        let c = raw("C", "INSERT INTO \"t\" (\"a\") VALUES ('c')");

        let broken = vec![
            a.clone(),
            raw("B", "INSERT INTO \"missing\" (\"a\") VALUES ('b')"),
            c.clone(),
        ];
        let err = create_migrator(&pool, broken).start().await.unwrap_err();
        assert_eq!(err.migration_id(), Some("B"));

        let migrator = create_migrator(&pool, vec![a.clone()]);
        let log = migrator.log();
        let rows = migration_ids(&migrator).await;
        assert_eq!(
            rows[1..],
            [("A".to_string(), true), ("B".to_string(), false)]
        );
        assert!(log.last_failure("B").await.unwrap().is_some());

        let fixed = vec![a, raw("B", "INSERT INTO \"t\" (\"a\") VALUES ('b')"), c];
        let report = create_migrator(&pool, fixed).start().await.unwrap();
        assert_eq!(report.applied, vec!["B", "C"]);
        assert_eq!(count_rows(&pool, "t").await, 2);

        // The lock was released on the failing run.
        let status = migrator.lock().status().await.unwrap().unwrap();
        assert!(!status.held);
    }

    #[tokio::test]
    async fn test_failed_migration_rolls_back() {
        let pool = create_test_pool().await;
        let migrations = vec![
            Migration::add_table("create_t", t_table()),
            raw(
                "half",
                "INSERT INTO \"t\" (\"a\") VALUES ('x'); INSERT INTO \"nope\" VALUES (1)",
            ),
        ];

        let err = create_migrator(&pool, migrations).start().await.unwrap_err();
        assert!(matches!(err, MigrateError::MigrationFailed { .. }));
        assert_eq!(count_rows(&pool, "t").await, 0);
    }

    struct Backfill {
        calls: Arc<AtomicUsize>,
    }

    impl CodeMigration for Backfill {
        fn exec<'a>(
            &'a self,
            conn: &'a mut AnyConnection,
            dialect: &'a dyn Dialect,
        ) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let sql = format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    dialect.quote("t"),
                    dialect.quote("a"),
                    dialect.bind_var(1)
                );
                sqlx::query(&sql).bind("backfilled").execute(&mut *conn).await?;
                Ok(())
            })
        }
    }

    struct Refuse;

    impl CodeMigration for Refuse {
        fn exec<'a>(
            &'a self,
            _conn: &'a mut AnyConnection,
            _dialect: &'a dyn Dialect,
        ) -> BoxFuture<'a, Result<()>> {
            Box::pin(async { Err(MigrateError::Code("bad data".to_string())) })
        }
    }

    #[tokio::test]
    async fn test_code_migration_runs_once() {
        let pool = create_test_pool().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let migrations = vec![
            Migration::add_table("create_t", t_table()),
            Migration::code(
                "backfill t",
                Backfill {
                    calls: Arc::clone(&calls),
                },
            ),
        ];

        let migrator = create_migrator(&pool, migrations.clone());
        migrator.start().await.unwrap();
        create_migrator(&pool, migrations).start().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(count_rows(&pool, "t").await, 1);
        let entries = migrator.log().entries().await.unwrap();
        assert_eq!(entries.last().unwrap().sql, "code migration");
    }

    #[tokio::test]
    async fn test_code_migration_error_is_wrapped() {
        let pool = create_test_pool().await;
        let err = create_migrator(&pool, vec![Migration::code("refuse", Refuse)])
            .start()
            .await
            .unwrap_err();

        match err {
            MigrateError::MigrationFailed { id, source } => {
                assert_eq!(id, "refuse");
                assert!(matches!(*source, MigrateError::Code(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let pool = create_test_pool().await;
        let migrator = Migrator::new(
            pool.clone(),
            DialectKind::Sqlite,
            vec![Migration::add_table("create_t", t_table())],
            test_config().dry_run(true),
        )
        .unwrap();

        let report = migrator.start().await.unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(report.rendered.len(), 1);
        assert_eq!(report.rendered[0].0, "create_t");
        assert!(report.rendered[0].1.starts_with("CREATE TABLE IF NOT EXISTS \"t\""));

        assert!(!migrator.log().exists().await.unwrap());
        assert_eq!(migrator.pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected() {
        let pool = create_test_pool().await;
        let result = Migrator::new(
            pool,
            DialectKind::Sqlite,
            vec![raw("same", "SELECT 1"), raw("same", "SELECT 2")],
            test_config(),
        );
        assert!(matches!(
            result,
            Err(MigrateError::DuplicateMigration(id)) if id == "same"
        ));
    }

    #[tokio::test]
    async fn test_connect_detects_dialect() {
        let pool = create_test_pool().await;
        let migrator = Migrator::connect(pool, Vec::new(), test_config())
            .await
            .unwrap();
        assert_eq!(migrator.dialect_kind(), DialectKind::Sqlite);
    }

    #[tokio::test]
    async fn test_concurrent_runs_apply_once() {
        let pool = create_test_pool().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let migrations = vec![
            Migration::add_table("create_t", t_table()),
            Migration::code(
                "backfill t",
                Backfill {
                    calls: Arc::clone(&calls),
                },
            ),
        ];

        let first = create_migrator(&pool, migrations.clone());
        let second = create_migrator(&pool, migrations);
        let (a, b) = tokio::join!(first.start(), second.start());
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.applied.len() + b.applied.len(), 2);
        assert!(a.is_empty() || b.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unlocked_runs_bootstrap_log_once() {
        let pool = create_test_pool().await;
        let first = Migrator::new(
            pool.clone(),
            DialectKind::Sqlite,
            Vec::new(),
            test_config().locking(false),
        )
        .unwrap();
        let second = Migrator::new(
            pool.clone(),
            DialectKind::Sqlite,
            Vec::new(),
            test_config().locking(false),
        )
        .unwrap();

        let (a, b) = tokio::join!(first.start(), second.start());
        a.unwrap();
        b.unwrap();

        let ids: Vec<String> = migration_ids(&first)
            .await
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["create migration_log table"]);
    }

    #[tokio::test]
    async fn test_held_lock_times_out_without_changes() {
        let pool = create_test_pool().await;
        let migrator = Migrator::new(
            pool.clone(),
            DialectKind::Sqlite,
            vec![Migration::add_table("create_t", t_table())],
            test_config().lock_timeout(Duration::from_secs(0)),
        )
        .unwrap();

        let lock = migrator.lock();
        lock.ensure_table().await.unwrap();
        let _held = lock.try_acquire().await.unwrap().unwrap();

        let err = migrator.start().await.unwrap_err();
        assert!(matches!(err, MigrateError::LockTimeout { .. }));
        assert!(!migrator.log().exists().await.unwrap());
    }
}
