//! Scan image storage
//!
//! Processed scan images are written as JPEG files into a flat directory
//! under the app data directory. File names carry the capture time down to
//! the millisecond; a collision gets a numeric suffix rather than
//! overwriting the earlier file.
//!
//! Example: "barcode_images/barcode_20261017_142501_337.jpg"

use crate::config::{IMAGE_DIRECTORY, IMAGE_FILE_EXTENSION, IMAGE_FILE_PREFIX, IMAGE_JPEG_QUALITY};
use crate::error::{AppError, Result};
use crate::vision::ProcessedImage;
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Give up looking for a free file name after this many suffixes
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// JPEG file store for processed scan images
#[derive(Debug, Clone)]
pub struct ImageStorage {
    root: PathBuf,
}

impl ImageStorage {
    /// Image store in the standard directory under `app_data_dir`
    pub fn new(app_data_dir: &Path) -> Self {
        Self::with_root(app_data_dir.join(IMAGE_DIRECTORY))
    }

    /// Image store rooted directly at `root`
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    /// Create the image directory if needed
    pub async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        tracing::info!("Image store initialized at: {:?}", self.root);
        Ok(())
    }

    /// Encode `image` as JPEG and write it to a fresh file.
    ///
    /// Returns the absolute path of the written file. The file only appears
    /// under its final name once it is completely written.
    pub async fn save(&self, image: &ProcessedImage) -> Result<PathBuf> {
        fs::create_dir_all(&self.root).await?;

        let rgb = image.to_rgb();
        let data = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let mut buffer = Vec::new();
            let encoder = JpegEncoder::new_with_quality(&mut buffer, IMAGE_JPEG_QUALITY);
            rgb.write_with_encoder(encoder)?;
            Ok(buffer)
        })
        .await
        .map_err(|e| AppError::Image(format!("JPEG encoding task failed: {}", e)))??;

        let path = self.reserve_path(Local::now()).await?;

        // Write to temp file first, then move over the reserved name
        let temp_path = path.with_extension("tmp");
        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            let _ = fs::remove_file(&path).await;
            tracing::error!("Failed to write scan image {:?}: {}", path, e);
            return Err(e.into());
        }

        tracing::debug!("Wrote scan image: {:?} ({} bytes)", path, data.len());

        Ok(path)
    }

    /// Whether a stored image exists. An absent path never exists.
    pub async fn exists(&self, path: Option<&Path>) -> bool {
        match path {
            Some(path) => fs::metadata(path)
                .await
                .map(|meta| meta.is_file())
                .unwrap_or(false),
            None => false,
        }
    }

    /// Delete a stored image.
    ///
    /// Returns true only if a file was actually removed; absent paths and
    /// missing files yield false.
    pub async fn delete(&self, path: Option<&Path>) -> bool {
        let Some(path) = path else {
            return false;
        };

        match fs::remove_file(path).await {
            Ok(()) => {
                tracing::debug!("Deleted scan image: {:?}", path);
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                tracing::warn!("Failed to delete scan image {:?}: {}", path, e);
                false
            }
        }
    }

    /// Resolve a stored image path for preview, if the file is still there
    pub async fn resolve(&self, path: Option<&str>) -> Option<PathBuf> {
        let path = PathBuf::from(path.filter(|p| !p.is_empty())?);
        self.exists(Some(&path)).await.then_some(path)
    }

    /// Image directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Claim a free file name by creating it exclusively
    async fn reserve_path(&self, now: DateTime<Local>) -> Result<PathBuf> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let path = self.root.join(generate_file_name(now, attempt));

            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => return Ok(path),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::Storage(format!(
            "No free image file name in {:?}",
            self.root
        )))
    }
}

/// File name for an image captured at `now`; `attempt` > 0 adds a suffix
pub fn generate_file_name(now: DateTime<Local>, attempt: u32) -> String {
    let stamp = now.format("%Y%m%d_%H%M%S_%3f");
    if attempt == 0 {
        format!("{}{}.{}", IMAGE_FILE_PREFIX, stamp, IMAGE_FILE_EXTENSION)
    } else {
        format!(
            "{}{}_{}.{}",
            IMAGE_FILE_PREFIX, stamp, attempt, IMAGE_FILE_EXTENSION
        )
    }
}
