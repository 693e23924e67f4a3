//! Several instances starting at once against a fresh database.
//!
//! The PostgreSQL cases run when `MIGRATOR_POSTGRES_URL` points at a scratch
//! database; each uses its own schema.

mod common;

use futures::future::join_all;
use schema_migrator::prelude::*;
use sqlx::AnyPool;
use tempfile::TempDir;

const INSTANCES: usize = 6;

fn widget() -> Table {
    Table::new("widget")
        .column(
            Column::new("id", ColumnType::BigInt)
                .primary_key()
                .auto_increment(),
        )
        .column(Column::varchar("name", 100).not_null())
        .index(Index::unique(["name"]))
}

fn migrations() -> Vec<Migration> {
    let table = widget();
    let mut migrations = vec![Migration::add_table("create widget table", table.clone())];
    migrations.extend(Migration::add_table_indices("v1", &table));
    migrations
}

/// Starts one migrator per pool at the same time and checks that every
/// migration ran exactly once between them.
async fn start_all(pools: &[AnyPool]) {
    let runs = pools.iter().map(|pool| async move {
        Migrator::connect(pool.clone(), migrations(), common::config())
            .await?
            .start()
            .await
    });

    let mut applied = Vec::new();
    for result in join_all(runs).await {
        match result {
            Ok(report) => applied.extend(report.applied),
            Err(err) => panic!("instance failed: {err}"),
        }
    }
    applied.sort();
    let mut expected: Vec<String> = migrations().into_iter().map(|m| m.id).collect();
    expected.sort();
    assert_eq!(applied, expected);

    let ids = common::applied_ids(&pools[0]).await;
    let bootstraps = ids
        .iter()
        .filter(|id| id.as_str() == "create migration_log table")
        .count();
    assert_eq!(bootstraps, 1);
    assert_eq!(ids.len(), expected.len() + 1);
}

#[tokio::test]
async fn test_simultaneous_start_on_sqlite_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("race.db");

    let mut pools = Vec::new();
    for _ in 0..INSTANCES {
        pools.push(common::connect_file(&path).await);
    }
    start_all(&pools).await;
}

#[tokio::test]
async fn test_simultaneous_start_on_postgres() {
    let Ok(url) = std::env::var("MIGRATOR_POSTGRES_URL") else {
        return;
    };
    let schema = format!("migrator_race_{}", common::unique_suffix());
    common::create_postgres_schema(&url, &schema).await;

    let mut pools = Vec::new();
    for _ in 0..INSTANCES {
        pools.push(common::connect_postgres_schema(&url, &schema, 1).await);
    }
    start_all(&pools).await;

    for pool in pools {
        pool.close().await;
    }
    common::drop_postgres_schema(&url, &schema).await;
}

#[tokio::test]
async fn test_replaced_table_accepts_new_rows_on_postgres() {
    let Ok(url) = std::env::var("MIGRATOR_POSTGRES_URL") else {
        return;
    };
    let schema = format!("migrator_reshape_{}", common::unique_suffix());
    common::create_postgres_schema(&url, &schema).await;
    let pool = common::connect_postgres_schema(&url, &schema, 1).await;

    let v1 = widget();
    let v2 = Table::new("widget")
        .column(
            Column::new("id", ColumnType::BigInt)
                .primary_key()
                .auto_increment(),
        )
        .column(Column::varchar("label", 100).not_null())
        .index(Index::unique(["label"]));

    let mut all = migrations();
    all.push(Migration::raw_sql(
        "seed widgets",
        RawSql::new().default_sql("INSERT INTO \"widget\" (\"name\") VALUES ('a'), ('b')"),
    ));
    all.extend(Migration::replace_table(
        &v1,
        &v2,
        2,
        [("id", "id"), ("label", "name")],
    ));

    Migrator::connect(pool.clone(), all, common::config())
        .await
        .unwrap()
        .start()
        .await
        .unwrap();

    let (id,): (i64,) =
        sqlx::query_as("INSERT INTO \"widget\" (\"label\") VALUES ('c') RETURNING \"id\"")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(id, 3);

    pool.close().await;
    common::drop_postgres_schema(&url, &schema).await;
}
