//! History service
//!
//! Scan history on top of the repository. Storage failures come back as the
//! typed `DatabaseError` kinds and are logged here; deleting or purging a
//! row also removes the scan image it referenced.

use crate::config::{HISTORY_DATE_FORMAT, SECONDS_PER_DAY};
use crate::database::{HistoryEntry, NewHistoryEntry, Repository};
use crate::error::{AppError, DatabaseError, Result};
use crate::storage::ImageStorage;
use chrono::{DateTime, Local, NaiveTime, TimeZone};
use std::path::{Path, PathBuf};

/// Service for the scan history
#[derive(Clone)]
pub struct HistoryStore {
    repo: Repository,
    images: ImageStorage,
}

impl HistoryStore {
    pub fn new(repo: Repository, images: ImageStorage) -> Self {
        Self { repo, images }
    }

    /// Record a scan taken now.
    ///
    /// Returns `Ok(None)` without writing anything when the payload or the
    /// format name is empty.
    pub async fn insert(
        &self,
        payload: &str,
        format_name: &str,
        format_code: i32,
        image_path: Option<&Path>,
    ) -> Result<Option<HistoryEntry>> {
        self.insert_at(payload, format_name, format_code, image_path, Local::now())
            .await
    }

    /// Record a scan taken at `at`
    pub async fn insert_at(
        &self,
        payload: &str,
        format_name: &str,
        format_code: i32,
        image_path: Option<&Path>,
        at: DateTime<Local>,
    ) -> Result<Option<HistoryEntry>> {
        if payload.is_empty() || format_name.is_empty() {
            tracing::debug!("Skipping history insert: empty payload or format");
            return Ok(None);
        }

        let req = NewHistoryEntry {
            date: at.format(HISTORY_DATE_FORMAT).to_string(),
            time: at.timestamp(),
            code_type: format_code,
            code_value: payload.to_string(),
            image_path: image_path.map(|p| p.to_string_lossy().into_owned()),
        };

        let entry = self.repo.insert_history(req).await.map_err(|e| {
            tracing::error!("Failed to save history entry: {}", e);
            AppError::from(DatabaseError::SaveFailed)
        })?;

        tracing::info!("Saved {} scan to history: {}", format_name, entry.id);

        Ok(Some(entry))
    }

    /// All entries, newest first
    pub async fn list_all(&self) -> Result<Vec<HistoryEntry>> {
        self.repo.list_history().await.map_err(|e| {
            tracing::error!("Failed to load history: {}", e);
            DatabaseError::LoadFailed.into()
        })
    }

    /// Get an entry by ID
    pub async fn get(&self, id: i64) -> Result<Option<HistoryEntry>> {
        self.repo.get_history(id).await.map_err(|e| {
            tracing::error!("Failed to load history entry {}: {}", id, e);
            DatabaseError::LoadFailed.into()
        })
    }

    /// Delete an entry and its image. Returns false for an unknown id.
    pub async fn delete_by_id(&self, id: i64) -> Result<bool> {
        let delete_failed = |e: AppError| -> AppError {
            tracing::error!("Failed to delete history entry {}: {}", id, e);
            DatabaseError::DeleteFailed.into()
        };

        let Some(entry) = self.repo.get_history(id).await.map_err(delete_failed)? else {
            tracing::debug!("History entry not found: {}", id);
            return Ok(false);
        };

        let rows = self.repo.delete_history(id).await.map_err(delete_failed)?;
        if rows == 0 {
            return Ok(false);
        }

        if let Some(path) = entry.image_path.as_deref().filter(|p| !p.is_empty()) {
            self.images.delete(Some(Path::new(path))).await;
        }

        tracing::info!("Deleted history entry: {}", id);

        Ok(true)
    }

    /// Delete every entry and every referenced image
    pub async fn delete_all(&self) -> Result<()> {
        let image_paths = self.repo.clear_history().await.map_err(|e| {
            tracing::error!("Failed to clear history: {}", e);
            AppError::from(DatabaseError::DeleteFailed)
        })?;

        let removed = self.delete_images(&image_paths).await;
        tracing::info!("Cleared history ({} images removed)", removed);

        Ok(())
    }

    /// Delete entries older than the retention window, images included.
    ///
    /// Returns the number of rows removed.
    pub async fn purge_older_than(&self, days: u32) -> Result<u64> {
        self.purge_older_than_at(days, Local::now()).await
    }

    /// `purge_older_than` with an explicit "now"
    pub async fn purge_older_than_at(&self, days: u32, now: DateTime<Local>) -> Result<u64> {
        let (rows, image_paths) = self.purge_with_images(days, now).await?;
        let removed = self.delete_images(&image_paths).await;

        if rows > 0 {
            tracing::info!(
                "Purged {} history entries older than {} days ({} images removed)",
                rows,
                days,
                removed
            );
        }

        Ok(rows)
    }

    /// Delete entries older than the retention window and hand back the
    /// image paths they referenced, leaving the files in place
    pub async fn purge_with_images(
        &self,
        days: u32,
        now: DateTime<Local>,
    ) -> Result<(u64, Vec<String>)> {
        let cutoff = retention_cutoff(now, days);

        self.repo.purge_history_before(cutoff).await.map_err(|e| {
            tracing::error!("Failed to clean old history: {}", e);
            DatabaseError::CleanupFailed.into()
        })
    }

    /// Image of an entry, if it is still on disk
    pub async fn preview_path(&self, entry: &HistoryEntry) -> Option<PathBuf> {
        self.images.resolve(entry.image_path.as_deref()).await
    }

    async fn delete_images(&self, paths: &[String]) -> usize {
        let mut removed = 0;
        for path in paths.iter().filter(|p| !p.is_empty()) {
            if self.images.delete(Some(Path::new(path))).await {
                removed += 1;
            }
        }
        removed
    }
}

/// Oldest timestamp kept by a retention window of `days`: the local start
/// of today minus `days` whole days. Rows strictly older are purged.
pub fn retention_cutoff(now: DateTime<Local>, days: u32) -> i64 {
    let midnight = now.date_naive().and_time(NaiveTime::MIN);
    let start_of_day = Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| now.timestamp());

    start_of_day - i64::from(days) * SECONDS_PER_DAY
}
