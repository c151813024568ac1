use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use noor_review::ReviewService;
use noor_storage::{PgConfig, PgReviewStore};
use noor_sync::{IndopakConfig, PostgresSync, SyncConfig, TableOutcome};
use noor_web::{AppState, WebConfig};
use tracing::{info, warn};

mod scheduler;
mod telemetry;

#[derive(Debug, Parser)]
#[command(name = "noor-cli")]
#[command(about = "Noor translation review platform command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the JSON API (and the metrics scheduler when enabled).
    Serve,
    /// Apply pending schema migrations.
    Migrate,
    /// Copy every legacy SQLite table into PostgreSQL.
    SyncPostgres {
        /// Overrides NOOR_SQLITE_SOURCE.
        #[arg(long)]
        source: Option<PathBuf>,
        /// Overrides NOOR_SYNC_BATCH_SIZE.
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Copy the IndoPak text column into the main ayah database.
    MergeIndopak {
        #[arg(long)]
        source: Option<PathBuf>,
        #[arg(long)]
        dest: Option<PathBuf>,
        #[arg(long)]
        table: Option<String>,
        #[arg(long)]
        column: Option<String>,
    },
    /// Compute and store review metrics for one UTC day (default today).
    SnapshotMetrics {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

async fn review_service() -> Result<(PgReviewStore, Arc<ReviewService>)> {
    let store = PgReviewStore::connect(&PgConfig::from_env())
        .await
        .context("connecting to review database")?;
    let service = Arc::new(ReviewService::new(Arc::new(store.clone())));
    Ok((store, service))
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let (_, service) = review_service().await?;
            let _scheduler =
                scheduler::maybe_start(&scheduler::SchedulerConfig::from_env(), service.clone()).await?;
            noor_web::serve(AppState::new(service), WebConfig::from_env()).await?;
        }
        Commands::Migrate => {
            let (store, _) = review_service().await?;
            store.migrate().await.context("applying migrations")?;
            println!("migrations applied");
        }
        Commands::SyncPostgres { source, batch_size } => {
            let mut config = SyncConfig::from_env();
            if let Some(source) = source {
                config.sqlite_source = source;
            }
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size;
            }
            let sync = PostgresSync::connect(config)
                .await
                .context("connecting sync endpoints")?;
            let summary = sync.run().await.context("postgres sync aborted")?;

            for report in &summary.tables {
                match &report.outcome {
                    TableOutcome::Copied { rows, batches } => {
                        println!("{:<32} copied {rows} rows in {batches} batches", report.table)
                    }
                    TableOutcome::Skipped { reason } => println!("{:<32} skipped ({reason})", report.table),
                    TableOutcome::Failed { error } => println!("{:<32} FAILED: {error}", report.table),
                }
            }
            println!(
                "sync complete: run_id={} tables={} rows={} failed={}",
                summary.run_id,
                summary.tables.len(),
                summary.copied_rows(),
                summary.failed_tables()
            );
            if summary.failed_tables() > 0 {
                warn!(failed = summary.failed_tables(), "some tables failed to sync");
            }
        }
        Commands::MergeIndopak {
            source,
            dest,
            table,
            column,
        } => {
            let mut config = IndopakConfig::from_env();
            if let Some(source) = source {
                config.source = source;
            }
            if let Some(dest) = dest {
                config.dest = dest;
            }
            if let Some(table) = table {
                config.table = table;
            }
            if let Some(column) = column {
                config.column = column;
            }
            let summary = noor_sync::merge_indopak(&config)
                .await
                .context("indopak merge failed")?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::SnapshotMetrics { date } => {
            let (_, service) = review_service().await?;
            let date = date.unwrap_or_else(|| service.today());
            let metrics = service
                .snapshot_daily_metrics(date)
                .await
                .with_context(|| format!("snapshotting metrics for {date}"))?;
            info!(%date, "metrics snapshot stored");
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
    }

    Ok(())
}
