#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use schema_migrator::prelude::*;
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;

pub async fn connect(url: &str) -> AnyPool {
    sqlx::any::install_default_drivers();
    AnyPoolOptions::new()
        .max_connections(1)
        .connect(url)
        .await
        .unwrap_or_else(|e| panic!("Failed to connect to {url}: {e}"))
}

/// A pool over a SQLite file, one per simulated process.
pub async fn connect_file(path: &Path) -> AnyPool {
    connect(&format!("sqlite://{}?mode=rwc", path.display())).await
}

pub async fn create_postgres_schema(url: &str, schema: &str) {
    let admin = connect(url).await;
    sqlx::raw_sql(&format!("CREATE SCHEMA {schema}"))
        .execute(&admin)
        .await
        .unwrap();
    admin.close().await;
}

/// A pool whose connections resolve unqualified names in `schema` of the
/// PostgreSQL database at `url`.
pub async fn connect_postgres_schema(url: &str, schema: &str, max_connections: u32) -> AnyPool {
    sqlx::any::install_default_drivers();
    let search_path = format!("SET search_path TO {schema}");
    AnyPoolOptions::new()
        .max_connections(max_connections)
        .after_connect(move |conn, _meta| {
            let sql = search_path.clone();
            Box::pin(async move {
                sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(&sql)).await?;
                Ok(())
            })
        })
        .connect(url)
        .await
        .unwrap_or_else(|e| panic!("Failed to connect to {url}: {e}"))
}

pub async fn drop_postgres_schema(url: &str, schema: &str) {
    let admin = connect(url).await;
    sqlx::raw_sql(&format!("DROP SCHEMA {schema} CASCADE"))
        .execute(&admin)
        .await
        .unwrap();
    admin.close().await;
}

/// SQLite in memory, plus any server databases configured in the
/// environment.
pub async fn available_pools() -> Vec<AnyPool> {
    let mut pools = vec![connect("sqlite::memory:").await];
    for var in ["MIGRATOR_POSTGRES_URL", "MIGRATOR_MYSQL_URL"] {
        if let Ok(url) = std::env::var(var) {
            pools.push(connect(&url).await);
        }
    }
    pools
}

pub fn config() -> MigratorConfig {
    MigratorConfig::new()
        .lock_timeout(Duration::from_secs(10))
        .lock_poll_interval(Duration::from_millis(10))
}

pub async fn applied_ids(pool: &AnyPool) -> Vec<String> {
    let kind = DialectKind::detect(pool).await.unwrap();
    MigrationLog::new(pool.clone(), kind.dialect())
        .entries()
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.success)
        .map(|e| e.migration_id)
        .collect()
}

/// Suffix keeping server-backed runs apart.
pub fn unique_suffix() -> String {
    format!("{}", chrono::Utc::now().timestamp_micros())
}
