use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;
use noor_review::ReviewService;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Six-field cron expression (seconds first), evaluated in UTC.
    pub metrics_cron: String,
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: std::env::var("NOOR_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            metrics_cron: std::env::var("NOOR_METRICS_CRON")
                .unwrap_or_else(|_| "0 5 * * * *".to_string()),
        }
    }
}

/// Build and start the metrics snapshot job when enabled. The returned scheduler
/// must be kept alive for the job to keep firing.
pub async fn maybe_start(
    config: &SchedulerConfig,
    service: Arc<ReviewService>,
) -> Result<Option<JobScheduler>> {
    if !config.enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(config.metrics_cron.as_str(), move |_uuid, _l| {
        let service = Arc::clone(&service);
        Box::pin(async move {
            let today = service.today();
            // Yesterday is re-snapshotted so the first run after midnight closes it out.
            for date in [today - Duration::days(1), today] {
                match service.snapshot_daily_metrics(date).await {
                    Ok(metrics) => info!(%date, total = metrics.total_reviews, "scheduled metrics snapshot"),
                    Err(err) => error!(%date, error = %err, "scheduled metrics snapshot failed"),
                }
            }
        })
    })
    .with_context(|| format!("creating metrics job for cron {}", config.metrics_cron))?;
    sched.add(job).await.context("adding metrics job")?;
    sched.start().await.context("starting scheduler")?;
    info!(cron = %config.metrics_cron, "metrics scheduler started");
    Ok(Some(sched))
}
