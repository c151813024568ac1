//! Copy the IndoPak script column from a source ayah database into the main one.

use std::path::PathBuf;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{info, warn};

use crate::schema::{quote_ident, table_info};
use crate::SyncError;

#[derive(Debug, Clone)]
pub struct IndopakConfig {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub table: String,
    pub column: String,
    /// Rows between progress log lines.
    pub progress_every: usize,
}

impl Default for IndopakConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("./data/indopak.db"),
            dest: PathBuf::from("./data/quran.db"),
            table: "ayahs".to_string(),
            column: "text_indopak".to_string(),
            progress_every: 1000,
        }
    }
}

impl IndopakConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            source: std::env::var("NOOR_INDOPAK_SOURCE")
                .map(PathBuf::from)
                .unwrap_or(defaults.source),
            dest: std::env::var("NOOR_INDOPAK_DEST")
                .map(PathBuf::from)
                .unwrap_or(defaults.dest),
            table: std::env::var("NOOR_INDOPAK_TABLE").unwrap_or(defaults.table),
            column: std::env::var("NOOR_INDOPAK_COLUMN").unwrap_or(defaults.column),
            progress_every: defaults.progress_every,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub source_rows: u64,
    pub cleared: u64,
    pub updated: u64,
    /// Source ids with no matching destination row, or whose update failed.
    pub not_found: Vec<i64>,
    pub column_added: bool,
}

async fn open(path: &PathBuf, read_only: bool) -> Result<SqlitePool, SyncError> {
    if !path.exists() {
        return Err(SyncError::SourceMissing(path.clone()));
    }
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(SqliteConnectOptions::new().filename(path).read_only(read_only))
        .await?;
    Ok(pool)
}

pub async fn merge_indopak(config: &IndopakConfig) -> Result<MergeSummary, SyncError> {
    let source = open(&config.source, true).await?;
    let dest = open(&config.dest, false).await?;
    let summary = merge_between(&source, &dest, config).await;
    source.close().await;
    dest.close().await;
    summary
}

/// Overwrite the destination column with every non-empty source value, matched by `id`.
pub async fn merge_between(
    source: &SqlitePool,
    dest: &SqlitePool,
    config: &IndopakConfig,
) -> Result<MergeSummary, SyncError> {
    let table = quote_ident(&config.table);
    let column = quote_ident(&config.column);
    let mut summary = MergeSummary::default();

    let dest_columns = table_info(dest, &config.table).await?;
    if !dest_columns.iter().any(|c| c.name == config.column) {
        sqlx::query(&format!("ALTER TABLE {table} ADD COLUMN {column} TEXT"))
            .execute(dest)
            .await?;
        summary.column_added = true;
        info!(table = %config.table, column = %config.column, "added missing destination column");
    }

    let rows = sqlx::query(&format!(
        "SELECT id, {column} AS value FROM {table} \
         WHERE {column} IS NOT NULL AND {column} != '' ORDER BY id"
    ))
    .fetch_all(source)
    .await?;
    summary.source_rows = rows.len() as u64;
    info!(rows = summary.source_rows, "read source rows");

    let mut tx = dest.begin().await?;
    summary.cleared = sqlx::query(&format!(
        "UPDATE {table} SET {column} = NULL WHERE {column} IS NOT NULL AND {column} != ''"
    ))
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let update = format!("UPDATE {table} SET {column} = ? WHERE id = ?");
    let progress_every = config.progress_every.max(1);
    for (idx, row) in rows.iter().enumerate() {
        let id: i64 = row.try_get("id")?;
        let value: String = row.try_get("value")?;
        match sqlx::query(&update).bind(value).bind(id).execute(&mut *tx).await {
            Ok(done) if done.rows_affected() > 0 => summary.updated += 1,
            Ok(_) => {
                warn!(id, "no destination row for source id");
                summary.not_found.push(id);
            }
            Err(err) => {
                warn!(id, error = %err, "update failed");
                summary.not_found.push(id);
            }
        }
        if (idx + 1) % progress_every == 0 {
            info!(processed = idx + 1, total = rows.len(), "merge progress");
        }
    }
    tx.commit().await?;

    info!(
        updated = summary.updated,
        cleared = summary.cleared,
        not_found = summary.not_found.len(),
        "indopak merge finished"
    );
    Ok(summary)
}
