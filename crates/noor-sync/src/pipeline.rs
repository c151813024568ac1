//! SQLite to PostgreSQL table copy.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt, TryStreamExt};
use serde::Serialize;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Postgres, QueryBuilder, Transaction};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::schema::{self, quote_ident, TablePlan};
use crate::value::{self, Batcher, PgValue, SqlValue};
use crate::{SyncConfig, SyncError};

/// Tables created concurrently.
const CREATE_CONCURRENCY: usize = 5;
/// Small tables copied concurrently.
const SMALL_TABLE_CONCURRENCY: usize = 3;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableOutcome {
    Copied { rows: u64, batches: u64 },
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub table: String,
    pub outcome: TableOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tables: Vec<TableReport>,
}

impl SyncRunSummary {
    pub fn copied_rows(&self) -> u64 {
        self.tables
            .iter()
            .map(|t| match t.outcome {
                TableOutcome::Copied { rows, .. } => rows,
                _ => 0,
            })
            .sum()
    }

    pub fn failed_tables(&self) -> usize {
        self.tables
            .iter()
            .filter(|t| matches!(t.outcome, TableOutcome::Failed { .. }))
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopyStats {
    pub rows: u64,
    pub batches: u64,
}

/// Destination for converted row batches.
#[async_trait]
pub trait BatchWriter: Send {
    async fn write_batch(&mut self, plan: &TablePlan, rows: Vec<Vec<PgValue>>) -> Result<(), SyncError>;
}

/// Writes batches as multi-row `INSERT`s inside one open transaction.
pub struct PgBatchWriter {
    tx: Transaction<'static, Postgres>,
}

impl PgBatchWriter {
    pub async fn begin(pool: &PgPool) -> Result<Self, SyncError> {
        Ok(Self { tx: pool.begin().await? })
    }

    pub async fn truncate(&mut self, table: &str) -> Result<(), SyncError> {
        sqlx::query(&format!("TRUNCATE TABLE {}", quote_ident(table)))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    pub async fn commit(self) -> Result<(), SyncError> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), SyncError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl BatchWriter for PgBatchWriter {
    async fn write_batch(&mut self, plan: &TablePlan, rows: Vec<Vec<PgValue>>) -> Result<(), SyncError> {
        insert_statement(plan, rows).build().execute(&mut *self.tx).await?;
        Ok(())
    }
}

/// Build one multi-row parameterized INSERT for the batch.
pub fn insert_statement(plan: &TablePlan, rows: Vec<Vec<PgValue>>) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) ",
        quote_ident(&plan.name),
        plan.column_list()
    ));
    builder.push_values(rows, |mut tuple, row| {
        for value in row {
            value::push_value(&mut tuple, value);
        }
    });
    builder
}

/// Stream every row of the source table through the writer in batches.
pub async fn pump_rows<W: BatchWriter>(
    source: &SqlitePool,
    plan: &TablePlan,
    batch_size: usize,
    writer: &mut W,
) -> Result<CopyStats, SyncError> {
    let select = format!("SELECT {} FROM {}", plan.column_list(), quote_ident(&plan.name));
    let mut rows = sqlx::query(&select).fetch(source);
    let mut batcher = Batcher::new(value::effective_batch_size(batch_size, plan.columns.len()));
    let mut stats = CopyStats::default();

    while let Some(row) = rows.try_next().await? {
        let raw = SqlValue::row(&row, plan.columns.len())?;
        let mut converted = Vec::with_capacity(raw.len());
        for (value, column) in raw.into_iter().zip(&plan.columns) {
            converted.push(value::coerce(value, column.pg_type, &column.name)?);
        }
        if let Some(batch) = batcher.push(converted) {
            stats.rows += batch.len() as u64;
            stats.batches += 1;
            writer.write_batch(plan, batch).await?;
        }
    }
    if let Some(batch) = batcher.finish() {
        stats.rows += batch.len() as u64;
        stats.batches += 1;
        writer.write_batch(plan, batch).await?;
    }
    Ok(stats)
}

pub struct PostgresSync {
    source: SqlitePool,
    dest: PgPool,
    config: SyncConfig,
}

impl PostgresSync {
    pub fn new(source: SqlitePool, dest: PgPool, config: SyncConfig) -> Self {
        Self { source, dest, config }
    }

    pub async fn connect(config: SyncConfig) -> Result<Self, SyncError> {
        if !config.sqlite_source.exists() {
            return Err(SyncError::SourceMissing(config.sqlite_source.clone()));
        }
        let source = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(&config.sqlite_source)
                    .read_only(true),
            )
            .await?;

        let statement_timeout_ms = config.statement_timeout.as_millis().to_string();
        let dest_options: PgConnectOptions = config
            .database_url
            .parse::<PgConnectOptions>()?
            .options([("statement_timeout", statement_timeout_ms.as_str())]);
        let dest = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(dest_options)
            .await?;

        Ok(Self::new(source, dest, config))
    }

    /// Destination must answer and already carry the application-managed schema.
    pub async fn preflight(&self) -> Result<(), SyncError> {
        sqlx::query("SELECT 1").execute(&self.dest).await?;

        let expected: Vec<String> = noor_storage::MANAGED_TABLES.iter().map(|t| t.to_string()).collect();
        let present: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT table_name::text
            FROM information_schema.tables
            WHERE table_schema = current_schema()
              AND table_name = ANY($1)
            "#,
        )
        .bind(&expected)
        .fetch_all(&self.dest)
        .await?;

        let missing: Vec<String> = expected.into_iter().filter(|t| !present.contains(t)).collect();
        if !missing.is_empty() {
            return Err(SyncError::Preflight(format!(
                "application tables missing from destination: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    pub async fn run(&self) -> Result<SyncRunSummary, SyncError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, source = %self.config.sqlite_source.display(), "postgres sync starting");

        self.preflight().await?;

        let mut reports = Vec::new();
        let mut plans = Vec::new();
        for table in schema::list_tables(&self.source).await? {
            if is_skipped(&table) {
                reports.push(TableReport {
                    table,
                    outcome: TableOutcome::Skipped {
                        reason: "managed by application migrations".to_string(),
                    },
                });
                continue;
            }
            match self.plan_table(&table).await {
                Ok(plan) => plans.push(plan),
                Err(err) => {
                    error!(%table, error = %err, "failed to read source schema");
                    reports.push(failed(table, err));
                }
            }
        }

        let created: Vec<(TablePlan, Result<(), SyncError>)> = stream::iter(plans)
            .map(|plan| async move {
                let result = self.recreate_table(&plan).await;
                (plan, result)
            })
            .buffer_unordered(CREATE_CONCURRENCY)
            .collect()
            .await;

        let mut large = Vec::new();
        let mut small = Vec::new();
        for (plan, result) in created {
            match result {
                Ok(()) if plan.row_count > self.config.large_table_threshold => large.push(plan),
                Ok(()) => small.push(plan),
                Err(err) => {
                    error!(table = %plan.name, error = %err, "failed to create destination table");
                    reports.push(failed(plan.name, err));
                }
            }
        }

        for plan in &large {
            reports.push(self.copy_reported(plan).await);
        }

        let small_reports: Vec<TableReport> = stream::iter(&small)
            .map(|plan| self.copy_reported(plan))
            .buffer_unordered(SMALL_TABLE_CONCURRENCY)
            .collect()
            .await;
        reports.extend(small_reports);
        reports.sort_by(|a, b| a.table.cmp(&b.table));

        let summary = SyncRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            tables: reports,
        };
        info!(
            %run_id,
            tables = summary.tables.len(),
            rows = summary.copied_rows(),
            failed = summary.failed_tables(),
            "postgres sync finished"
        );
        Ok(summary)
    }

    pub async fn plan_table(&self, table: &str) -> Result<TablePlan, SyncError> {
        let columns = schema::table_info(&self.source, table).await?;
        let sample_sql = format!(
            "SELECT {} FROM {} LIMIT ?",
            columns
                .iter()
                .map(|c| quote_ident(&c.name))
                .collect::<Vec<_>>()
                .join(", "),
            quote_ident(table)
        );
        let sample_rows = sqlx::query(&sample_sql)
            .bind(self.config.sample_rows)
            .fetch_all(&self.source)
            .await?;
        let samples = sample_rows
            .iter()
            .map(|row| SqlValue::row(row, columns.len()))
            .collect::<Result<Vec<_>, _>>()?;

        let plan = TablePlan {
            name: table.to_string(),
            columns: schema::plan_columns(&columns, &samples),
            row_count: schema::row_count(&self.source, table).await?,
        };
        for (declared, planned) in columns.iter().zip(&plan.columns) {
            let mapped = schema::PgColumnType::from_declared(&declared.declared_type);
            if mapped != planned.pg_type {
                warn!(
                    %table,
                    column = %planned.name,
                    declared = %declared.declared_type,
                    using = %planned.pg_type,
                    "sampled data overrides declared column type"
                );
            }
        }
        Ok(plan)
    }

    async fn recreate_table(&self, plan: &TablePlan) -> Result<(), SyncError> {
        let mut tx = self.dest.begin().await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {} CASCADE", quote_ident(&plan.name)))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&plan.create_table_sql()).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Truncate and refill one table in a single transaction.
    pub async fn copy_table(&self, plan: &TablePlan) -> Result<CopyStats, SyncError> {
        let mut writer = PgBatchWriter::begin(&self.dest).await?;
        writer.truncate(&plan.name).await?;
        match pump_rows(&self.source, plan, self.config.batch_size, &mut writer).await {
            Ok(stats) => {
                writer.commit().await?;
                Ok(stats)
            }
            Err(err) => {
                if let Err(rollback_err) = writer.rollback().await {
                    warn!(table = %plan.name, error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn copy_reported(&self, plan: &TablePlan) -> TableReport {
        let span = info_span!("sync_table", table = %plan.name, rows = plan.row_count);
        async {
            let started = Instant::now();
            match self.copy_table(plan).await {
                Ok(stats) => {
                    info!(
                        copied = stats.rows,
                        batches = stats.batches,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "table copied"
                    );
                    TableReport {
                        table: plan.name.clone(),
                        outcome: TableOutcome::Copied {
                            rows: stats.rows,
                            batches: stats.batches,
                        },
                    }
                }
                Err(err) => {
                    error!(error = %err, "table copy rolled back");
                    failed(plan.name.clone(), err)
                }
            }
        }
        .instrument(span)
        .await
    }
}

fn is_skipped(table: &str) -> bool {
    table.starts_with("_sqlx") || noor_storage::MANAGED_TABLES.contains(&table)
}

fn failed(table: String, err: SyncError) -> TableReport {
    TableReport {
        table,
        outcome: TableOutcome::Failed {
            error: err.to_string(),
        },
    }
}
