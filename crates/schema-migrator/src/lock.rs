//! Database-backed migration lock.
//!
//! Instances coordinate through one row per operation in `migration_lock`.
//! Ownership is a lease: the holder stamps `last_execution` on acquire and on
//! every heartbeat, and a row whose stamp is older than the lease is
//! considered abandoned and may be taken over. Every transition is an
//! optimistic update guarded by `version`, so at most one instance wins.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{AnyPool, Row};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::condition::object_exists;
use crate::dialect::Dialect;
use crate::error::{MigrateError, Result};
use crate::schema::{Column, ColumnType, Table};

/// Name of the lock table.
pub const LOCK_TABLE: &str = "migration_lock";

/// Operation id used by the migrator.
pub const MIGRATOR_OPERATION: &str = "database-migrator";

const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Stamps have one-second resolution, so shorter leases are rounded up.
const MIN_LEASE: Duration = Duration::from_secs(1);

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Definition of the lock table.
#[must_use]
pub fn lock_table() -> Table {
    Table::new(LOCK_TABLE)
        .column(Column::varchar("operation_uid", 100).primary_key())
        .column(Column::new("version", ColumnType::BigInt).not_null())
        .column(Column::new("last_execution", ColumnType::BigInt).not_null())
}

/// Snapshot of a lock row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockStatus {
    /// Operation id.
    pub operation_uid: String,
    /// Optimistic concurrency counter.
    pub version: i64,
    /// Last acquire or heartbeat, `None` when released.
    pub last_execution: Option<DateTime<Utc>>,
    /// Whether the lease is currently held.
    pub held: bool,
}

/// A named lease in the lock table.
#[derive(Clone)]
pub struct MigrationLock {
    pool: AnyPool,
    dialect: &'static dyn Dialect,
    operation_uid: String,
    lease: Duration,
    poll_interval: Duration,
}

impl MigrationLock {
    /// Creates a lock for `operation_uid`. The lease is at least one second
    /// and the poll interval at least one millisecond.
    pub fn new(
        pool: AnyPool,
        dialect: &'static dyn Dialect,
        operation_uid: impl Into<String>,
        lease: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            pool,
            dialect,
            operation_uid: operation_uid.into(),
            lease: lease.max(MIN_LEASE),
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
        }
    }

    /// The operation id this lock guards.
    #[must_use]
    pub fn operation_uid(&self) -> &str {
        &self.operation_uid
    }

    /// Creates the lock table if it is missing. Safe to call from several
    /// instances at once.
    pub async fn ensure_table(&self) -> Result<()> {
        let d = self.dialect;
        if self.table_exists().await? {
            return Ok(());
        }

        let sql = d.create_table_sql(&lock_table());
        match sqlx::raw_sql(&sql).execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(err) if d.is_duplicate_object(&err) => {
                debug!(error = %err, "lock table was created concurrently");
                if self.table_exists().await? {
                    Ok(())
                } else {
                    Err(err.into())
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Polls until the lock is acquired or `timeout` elapses.
    pub async fn acquire(&self, timeout: Duration) -> Result<LockHandle> {
        let deadline = Instant::now() + timeout;
        let mut delay = self.poll_interval;

        loop {
            if let Some(handle) = self.try_acquire().await? {
                info!(operation = %self.operation_uid, "acquired migration lock");
                return Ok(handle);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(MigrateError::LockTimeout {
                    operation: self.operation_uid.clone(),
                    timeout,
                });
            }

            debug!(
                operation = %self.operation_uid,
                retry_in = ?delay,
                "migration lock is held elsewhere"
            );
            sleep(delay.min(deadline - now)).await;
            delay = (delay * 2).min(MAX_BACKOFF);
        }
    }

    /// Makes one attempt to take the lock.
    pub async fn try_acquire(&self) -> Result<Option<LockHandle>> {
        let now = Utc::now().timestamp();

        let Some((version, last_execution)) = self.read_row().await? else {
            return self.insert_row(now).await;
        };

        if self.is_fresh(last_execution, now) {
            return Ok(None);
        }
        if last_execution != 0 {
            warn!(
                operation = %self.operation_uid,
                last_execution,
                "taking over stale migration lock"
            );
        }

        if self.bump(version, now).await? {
            Ok(Some(self.handle(version + 1)))
        } else {
            Ok(None)
        }
    }

    /// Reads the lock row, `None` if it was never taken.
    pub async fn status(&self) -> Result<Option<LockStatus>> {
        let now = Utc::now().timestamp();
        Ok(self
            .read_row()
            .await?
            .map(|(version, last_execution)| LockStatus {
                operation_uid: self.operation_uid.clone(),
                version,
                last_execution: (last_execution != 0)
                    .then(|| DateTime::from_timestamp(last_execution, 0))
                    .flatten(),
                held: self.is_fresh(last_execution, now),
            }))
    }

    /// Releases the lock regardless of owner. Returns whether a row existed.
    pub async fn force_release(&self) -> Result<bool> {
        let d = self.dialect;
        let sql = format!(
            "UPDATE {} SET version = version + 1, last_execution = 0 WHERE operation_uid = {}",
            d.quote(LOCK_TABLE),
            d.bind_var(1)
        );
        let result = sqlx::query(&sql)
            .bind(self.operation_uid.as_str())
            .execute(&self.pool)
            .await?;
        warn!(operation = %self.operation_uid, "migration lock force-released");
        Ok(result.rows_affected() > 0)
    }

    /// Whether a stamp is within the lease. Both stamps are truncated to
    /// seconds, so the lease is rounded up and a row stays held through the
    /// boundary second.
    fn is_fresh(&self, last_execution: i64, now: i64) -> bool {
        let mut lease = self.lease.as_secs();
        if self.lease.subsec_nanos() > 0 {
            lease = lease.saturating_add(1);
        }
        let lease = i64::try_from(lease).unwrap_or(i64::MAX);
        last_execution != 0 && now.saturating_sub(last_execution) <= lease
    }

    async fn table_exists(&self) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        object_exists(&mut conn, &self.dialect.table_check_query(LOCK_TABLE)).await
    }

    fn handle(&self, version: i64) -> LockHandle {
        LockHandle {
            lock: self.clone(),
            version,
        }
    }

    async fn read_row(&self) -> Result<Option<(i64, i64)>> {
        let d = self.dialect;
        let sql = format!(
            "SELECT version, last_execution FROM {} WHERE operation_uid = {}",
            d.quote(LOCK_TABLE),
            d.bind_var(1)
        );
        let row = sqlx::query(&sql)
            .bind(self.operation_uid.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some((row.try_get(0)?, row.try_get(1)?))),
            None => Ok(None),
        }
    }

    async fn insert_row(&self, now: i64) -> Result<Option<LockHandle>> {
        let d = self.dialect;
        let sql = format!(
            "INSERT INTO {} (operation_uid, version, last_execution) VALUES ({})",
            d.quote(LOCK_TABLE),
            d.bind_vars(3)
        );
        let result = sqlx::query(&sql)
            .bind(self.operation_uid.as_str())
            .bind(1_i64)
            .bind(now)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(Some(self.handle(1))),
            Err(err) if d.is_unique_violation(&err) => {
                debug!(operation = %self.operation_uid, "lost lock row insert race");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Moves the row from `version` to `version + 1`, stamping
    /// `last_execution`. False if someone else changed the row first.
    async fn bump(&self, version: i64, last_execution: i64) -> Result<bool> {
        let d = self.dialect;
        let sql = format!(
            "UPDATE {} SET version = {}, last_execution = {} \
             WHERE operation_uid = {} AND version = {}",
            d.quote(LOCK_TABLE),
            d.bind_var(1),
            d.bind_var(2),
            d.bind_var(3),
            d.bind_var(4)
        );
        let result = sqlx::query(&sql)
            .bind(version + 1)
            .bind(last_execution)
            .bind(self.operation_uid.as_str())
            .bind(version)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

/// Proof of lock ownership at a given row version.
pub struct LockHandle {
    lock: MigrationLock,
    version: i64,
}

impl LockHandle {
    /// Row version owned by this handle.
    #[must_use]
    pub const fn version(&self) -> i64 {
        self.version
    }

    /// Extends the lease. Fails with `LockLost` if another instance took
    /// the lock over.
    pub async fn renew(&mut self) -> Result<()> {
        let now = Utc::now().timestamp();
        if !self.lock.bump(self.version, now).await? {
            return Err(MigrateError::LockLost(self.lock.operation_uid.clone()));
        }
        self.version += 1;
        debug!(operation = %self.lock.operation_uid, version = self.version, "renewed migration lock");
        Ok(())
    }

    /// Releases the lock. Returns false if the row was no longer ours.
    pub async fn release(self) -> Result<bool> {
        let released = self.lock.bump(self.version, 0).await?;
        if released {
            info!(operation = %self.lock.operation_uid, "released migration lock");
        } else {
            warn!(
                operation = %self.lock.operation_uid,
                "migration lock was taken over before release"
            );
        }
        Ok(released)
    }
}
