//! Error types for the barscan pipeline
//!
//! All errors use thiserror for structured error handling.
//! Every fallible collaborator call returns one of these kinds instead of
//! panicking across component boundaries. `AppError` is `Clone` so the
//! session controller can keep the last one in its state snapshots.

use thiserror::Error;

/// Failures of the history database
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DatabaseError {
    #[error("Failed to save barcode")]
    SaveFailed,

    #[error("Failed to load history")]
    LoadFailed,

    #[error("Failed to delete history item")]
    DeleteFailed,

    #[error("Failed to clean old history")]
    CleanupFailed,

    #[error("Database error: {0}")]
    Unknown(String),
}

/// Failures reported by the camera collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("Camera permission denied")]
    PermissionDenied,

    #[error("Camera unavailable")]
    Unavailable,

    #[error("Camera initialization failed")]
    InitFailed,

    #[error("Camera error: {0}")]
    Unknown(String),
}

/// Failures of the decode step
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BarcodeError {
    #[error("Invalid barcode")]
    Invalid,

    #[error("Barcode scan failed")]
    ScanFailed,

    #[error("Barcode error: {0}")]
    Unknown(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error(transparent)]
    Barcode(#[from] BarcodeError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("{0}")]
    Unknown(String),
}

impl AppError {
    /// Short message suitable for a transient notice
    pub fn user_message(&self) -> &str {
        match self {
            AppError::Database(e) => match e {
                DatabaseError::SaveFailed => "Failed to save barcode. Please try again.",
                DatabaseError::LoadFailed => "Failed to load history. Please try again.",
                DatabaseError::DeleteFailed => "Failed to delete item. Please try again.",
                DatabaseError::CleanupFailed => "Failed to clean old history.",
                DatabaseError::Unknown(_) => "Database error occurred.",
            },
            AppError::Camera(e) => match e {
                CameraError::PermissionDenied => "Camera permission is required to scan barcodes.",
                CameraError::Unavailable => "Camera is not available.",
                CameraError::InitFailed => "Failed to initialize camera.",
                CameraError::Unknown(_) => "Camera error occurred.",
            },
            AppError::Barcode(e) => match e {
                BarcodeError::Invalid => "Invalid barcode format.",
                BarcodeError::ScanFailed => "Failed to scan barcode. Please try again.",
                BarcodeError::Unknown(_) => "Barcode scanning error occurred.",
            },
            AppError::Storage(_) => "Failed to save image.",
            AppError::Image(_) => "Failed to process image.",
            AppError::Scheduler(_) => "Failed to schedule history cleanup.",
            AppError::Unknown(_) => "An unexpected error occurred. Please try again.",
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Database(DatabaseError::Unknown(e.to_string()))
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Storage(e.to_string())
    }
}

impl From<image::ImageError> for AppError {
    fn from(e: image::ImageError) -> Self {
        AppError::Image(e.to_string())
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages() {
        let err = AppError::from(DatabaseError::SaveFailed);
        assert_eq!(err.user_message(), "Failed to save barcode. Please try again.");

        let err = AppError::from(CameraError::PermissionDenied);
        assert_eq!(
            err.user_message(),
            "Camera permission is required to scan barcodes."
        );

        let err = AppError::Unknown("boom".to_string());
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_io_error_maps_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: AppError = io.into();
        assert!(matches!(err, AppError::Storage(_)));
    }

    #[test]
    fn test_serializes_as_display_string() {
        let err = AppError::from(BarcodeError::Invalid);
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"Invalid barcode\"");
    }
}
