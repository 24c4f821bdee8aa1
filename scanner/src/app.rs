//! Application state and initialization
//!
//! This module manages the central application state and lifecycle.
//! All services are initialized here and made available through AppState.

use crate::config::{DATABASE_FILE_NAME, HISTORY_CLEANUP_CRON};
use crate::database::{create_pool, Repository};
use crate::error::Result;
use crate::services::{HistoryCleanupScheduler, HistoryStore, SettingsStore};
use crate::session::{CameraControl, ScanFeedback, ScanSessionController};
use crate::storage::ImageStorage;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Central application state holding all services
#[derive(Clone)]
pub struct AppState {
    pub app_data_dir: PathBuf,
    pub history: HistoryStore,
    pub settings: SettingsStore,
    pub images: ImageStorage,
    pub scheduler: Arc<HistoryCleanupScheduler>,
}

impl AppState {
    /// Open the database and build every service under `app_data_dir`
    pub async fn initialize(app_data_dir: &Path) -> Result<Self> {
        tracing::info!("Initializing application");
        tracing::info!("App data directory: {:?}", app_data_dir);

        // Create necessary directories
        tokio::fs::create_dir_all(app_data_dir).await?;

        let pool = create_pool(&app_data_dir.join(DATABASE_FILE_NAME)).await?;
        let repo = Repository::new(pool);

        let images = ImageStorage::new(app_data_dir);
        images.initialize().await?;

        let history = HistoryStore::new(repo.clone(), images.clone());
        let settings = SettingsStore::new(repo);
        let scheduler = HistoryCleanupScheduler::new(history.clone(), settings.clone()).await?;

        tracing::info!("Application initialized successfully");

        Ok(Self {
            app_data_dir: app_data_dir.to_path_buf(),
            history,
            settings,
            images,
            scheduler: Arc::new(scheduler),
        })
    }

    /// Purge expired history now, then keep purging daily in the background
    pub async fn start_history_cleanup(&self) -> Result<u64> {
        let purged = self.scheduler.run_now().await?;
        self.scheduler.schedule_daily(HISTORY_CLEANUP_CRON).await?;
        self.scheduler.start().await?;
        Ok(purged)
    }

    /// Scan session wired to this state's stores
    pub fn scan_session(
        &self,
        camera: Arc<dyn CameraControl>,
        feedback: Arc<dyn ScanFeedback>,
    ) -> Result<ScanSessionController> {
        ScanSessionController::new(
            self.history.clone(),
            self.settings.clone(),
            self.images.clone(),
            camera,
            feedback,
        )
    }

    /// Stop background services
    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler.shutdown().await
    }
}
