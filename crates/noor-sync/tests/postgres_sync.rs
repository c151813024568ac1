//! Full SQLite to PostgreSQL runs against a live database.
//!
//! Each test copies into a throwaway schema and drops it afterwards.
//! Run with: DATABASE_URL=postgres://... cargo test -p noor-sync --test postgres_sync -- --ignored

use std::time::Duration;

use noor_storage::PgReviewStore;
use noor_sync::{PostgresSync, SyncConfig, SyncError, SyncRunSummary, TableOutcome};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

struct Destination {
    admin: PgPool,
    schema: String,
    pool: PgPool,
    url: String,
}

impl Destination {
    async fn open() -> Option<Self> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL is not set; skipping");
            return None;
        };
        let admin = PgPool::connect(&url).await.expect("connect");
        let schema = format!("noor_sync_{}", Uuid::new_v4().simple());
        sqlx::query(&format!("CREATE SCHEMA {schema}"))
            .execute(&admin)
            .await
            .expect("create schema");
        let options = url
            .parse::<PgConnectOptions>()
            .expect("parse DATABASE_URL")
            .options([("search_path", schema.as_str())]);
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .expect("connect to test schema");
        Some(Self { admin, schema, pool, url })
    }

    async fn migrate(&self) {
        PgReviewStore::new(self.pool.clone())
            .migrate()
            .await
            .expect("migrate");
    }

    async fn column_type(&self, table: &str, column: &str) -> String {
        sqlx::query_scalar(
            r#"
            SELECT data_type::text
              FROM information_schema.columns
             WHERE table_schema = current_schema()
               AND table_name = $1
               AND column_name = $2
            "#,
        )
        .bind(table)
        .bind(column)
        .fetch_one(&self.pool)
        .await
        .expect("column type")
    }

    async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{table}\""))
            .fetch_one(&self.pool)
            .await
            .expect("count")
    }

    async fn close(self) {
        self.pool.close().await;
        sqlx::query(&format!("DROP SCHEMA {} CASCADE", self.schema))
            .execute(&self.admin)
            .await
            .expect("drop schema");
    }
}

async fn legacy_source(dir: &tempfile::TempDir) -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(dir.path().join("quran.db"))
                .create_if_missing(true),
        )
        .await
        .expect("open sqlite");

    for statement in [
        "CREATE TABLE ayah_meta (id INTEGER PRIMARY KEY, juz INTEGER, page INTEGER NOT NULL)",
        "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 1500) \
         INSERT INTO ayah_meta (id, juz, page) \
         SELECT i, CASE WHEN i = 3 THEN '7a' ELSE i % 30 END, i FROM n",
        "CREATE TABLE word_index (id INTEGER PRIMARY KEY, indexed_at INTEGER, word TEXT)",
        "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 12000) \
         INSERT INTO word_index (id, indexed_at, word) SELECT i, 1700000000000 + i, 'w' || i FROM n",
        "CREATE TABLE tafsir_refs (id INTEGER PRIMARY KEY, verse INTEGER)",
        "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 20) \
         INSERT INTO tafsir_refs (id, verse) SELECT i, CASE WHEN i = 15 THEN 'oops' ELSE i END FROM n",
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)",
        "INSERT INTO users (id, name) VALUES (1, 'legacy')",
    ] {
        sqlx::query(statement).execute(&pool).await.expect(statement);
    }
    pool
}

fn config(dest: &Destination, dir: &tempfile::TempDir) -> SyncConfig {
    SyncConfig {
        database_url: dest.url.clone(),
        sqlite_source: dir.path().join("quran.db"),
        batch_size: 1000,
        large_table_threshold: 10_000,
        sample_rows: 5,
        max_connections: 5,
        statement_timeout: Duration::from_secs(300),
    }
}

fn outcome<'a>(summary: &'a SyncRunSummary, table: &str) -> &'a TableOutcome {
    &summary
        .tables
        .iter()
        .find(|t| t.table == table)
        .unwrap_or_else(|| panic!("no report for {table}"))
        .outcome
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn full_run_copies_retypes_and_isolates_failures() {
    let Some(dest) = Destination::open().await else { return };
    dest.migrate().await;
    let dir = tempfile::tempdir().unwrap();
    let source = legacy_source(&dir).await;

    let sync = PostgresSync::new(source, dest.pool.clone(), config(&dest, &dir));
    let summary = sync.run().await.expect("sync run");

    let names: Vec<&str> = summary.tables.iter().map(|t| t.table.as_str()).collect();
    assert_eq!(names, vec!["ayah_meta", "tafsir_refs", "users", "word_index"]);

    assert!(matches!(
        outcome(&summary, "ayah_meta"),
        TableOutcome::Copied { rows: 1500, batches: 2 }
    ));
    assert_eq!(dest.count("ayah_meta").await, 1500);
    assert_eq!(dest.column_type("ayah_meta", "juz").await, "text");
    assert_eq!(dest.column_type("ayah_meta", "page").await, "integer");
    let juz: Option<String> = sqlx::query_scalar("SELECT juz FROM ayah_meta WHERE id = 3")
        .fetch_one(&dest.pool)
        .await
        .unwrap();
    assert_eq!(juz.as_deref(), Some("7a"));
    let juz: Option<String> = sqlx::query_scalar("SELECT juz FROM ayah_meta WHERE id = 4")
        .fetch_one(&dest.pool)
        .await
        .unwrap();
    assert_eq!(juz.as_deref(), Some("4"));

    assert!(matches!(
        outcome(&summary, "word_index"),
        TableOutcome::Copied { rows: 12_000, .. }
    ));
    assert_eq!(dest.column_type("word_index", "indexed_at").await, "bigint");
    assert_eq!(dest.count("word_index").await, 12_000);

    assert!(matches!(outcome(&summary, "users"), TableOutcome::Skipped { .. }));
    assert_eq!(dest.count("users").await, 0);

    match outcome(&summary, "tafsir_refs") {
        TableOutcome::Failed { error } => assert!(error.contains("verse"), "{error}"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(dest.count("tafsir_refs").await, 0);

    assert_eq!(summary.failed_tables(), 1);
    assert_eq!(summary.copied_rows(), 13_500);

    dest.close().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn rerun_replaces_rather_than_appends() {
    let Some(dest) = Destination::open().await else { return };
    dest.migrate().await;
    let dir = tempfile::tempdir().unwrap();
    let source = legacy_source(&dir).await;

    let sync = PostgresSync::new(source, dest.pool.clone(), config(&dest, &dir));
    sync.run().await.expect("first run");
    let summary = sync.run().await.expect("second run");

    assert!(matches!(
        outcome(&summary, "ayah_meta"),
        TableOutcome::Copied { rows: 1500, .. }
    ));
    assert_eq!(dest.count("ayah_meta").await, 1500);

    dest.close().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn missing_application_schema_aborts_before_copying() {
    let Some(dest) = Destination::open().await else { return };
    let dir = tempfile::tempdir().unwrap();
    let source = legacy_source(&dir).await;

    let sync = PostgresSync::new(source, dest.pool.clone(), config(&dest, &dir));
    match sync.run().await {
        Err(SyncError::Preflight(message)) => {
            assert!(message.contains("users"), "{message}");
            assert!(message.contains("flagged_translations"), "{message}");
        }
        other => panic!("expected pre-flight failure, got {other:?}"),
    }

    let created: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = current_schema()",
    )
    .fetch_one(&dest.pool)
    .await
    .unwrap();
    assert_eq!(created, 0);

    dest.close().await;
}
