/// Scheduler Service
/// Runs the history retention purge on a schedule using cron expressions
/// Reads the retention window from the settings store on every run
use crate::error::{AppError, Result};
use crate::services::{HistoryStore, SettingsStore};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// Scheduler service for the history cleanup
pub struct HistoryCleanupScheduler {
    scheduler: Arc<RwLock<JobScheduler>>,
    history: Arc<HistoryStore>,
    settings: Arc<SettingsStore>,
    current_job_id: Arc<RwLock<Option<Uuid>>>,
}

impl HistoryCleanupScheduler {
    /// Create new scheduler service
    pub async fn new(history: HistoryStore, settings: SettingsStore) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to create scheduler: {}", e)))?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            history: Arc::new(history),
            settings: Arc::new(settings),
            current_job_id: Arc::new(RwLock::new(None)),
        })
    }

    /// Start the scheduler
    pub async fn start(&self) -> Result<()> {
        let scheduler = self.scheduler.read().await;
        scheduler
            .start()
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to start scheduler: {}", e)))?;
        tracing::info!("History cleanup scheduler started");
        Ok(())
    }

    /// Purge history now with the current retention setting
    pub async fn run_now(&self) -> Result<u64> {
        purge_expired(&self.history, &self.settings).await
    }

    /// Schedule the recurring purge, replacing any previous schedule
    pub async fn schedule_daily(&self, cron_expr: &str) -> Result<()> {
        // Remove existing job if any
        self.cancel().await?;

        let history = Arc::clone(&self.history);
        let settings = Arc::clone(&self.settings);

        let job = Job::new_async(cron_expr, move |_uuid, _l| {
            let history = Arc::clone(&history);
            let settings = Arc::clone(&settings);
            Box::pin(async move {
                tracing::info!("Running scheduled history cleanup");

                if let Err(e) = purge_expired(&history, &settings).await {
                    tracing::error!("Scheduled history cleanup failed: {}", e);
                }
            })
        })
        .map_err(|e| AppError::Scheduler(format!("Failed to create cleanup job: {}", e)))?;

        let job_id = job.guid();

        // Add job to scheduler
        let scheduler = self.scheduler.write().await;
        scheduler
            .add(job)
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to schedule job: {}", e)))?;

        // Store job ID
        let mut current_job = self.current_job_id.write().await;
        *current_job = Some(job_id);

        tracing::info!("History cleanup scheduled ({})", cron_expr);
        Ok(())
    }

    /// Cancel the scheduled purge
    pub async fn cancel(&self) -> Result<()> {
        let mut current_job = self.current_job_id.write().await;

        if let Some(job_id) = *current_job {
            let scheduler = self.scheduler.write().await;
            scheduler
                .remove(&job_id)
                .await
                .map_err(|e| AppError::Scheduler(format!("Failed to remove job: {}", e)))?;

            *current_job = None;
            tracing::info!("History cleanup schedule cancelled");
        }

        Ok(())
    }

    /// Whether a recurring purge is scheduled
    pub async fn is_scheduled(&self) -> bool {
        self.current_job_id.read().await.is_some()
    }

    /// Shutdown scheduler gracefully
    pub async fn shutdown(&self) -> Result<()> {
        let mut scheduler = self.scheduler.write().await;
        scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to shutdown scheduler: {}", e)))?;
        tracing::info!("History cleanup scheduler shutdown");
        Ok(())
    }
}

async fn purge_expired(history: &HistoryStore, settings: &SettingsStore) -> Result<u64> {
    let days = settings.history_retention_days().await?;
    let purged = history.purge_older_than(days).await?;
    tracing::debug!("History cleanup removed {} entries ({} day window)", purged, days);
    Ok(purged)
}
