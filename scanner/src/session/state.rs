//! Session state snapshots
//!
//! The controller publishes a new immutable `ScanSessionState` on every
//! change. Subscribers render whatever the latest snapshot says.

use crate::error::AppError;
use crate::vision::{DecodedBarcode, ProcessedImage};
use serde::Serialize;
use std::sync::Arc;

/// Where the session is in its scan cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    /// Not started
    Idle,
    /// Camera running, waiting for a barcode
    Scanning,
    /// A barcode was found; the camera is stopped until reset
    Found,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanSessionState {
    pub phase: ScanPhase,
    pub current_barcode: Option<DecodedBarcode>,
    pub format_name: String,
    pub is_scanned: bool,
    pub show_controls: bool,
    /// Annotated image of the current scan, once processed
    #[serde(skip)]
    pub preview: Option<Arc<ProcessedImage>>,
    pub last_error: Option<AppError>,
}

impl Default for ScanSessionState {
    fn default() -> Self {
        Self {
            phase: ScanPhase::Idle,
            current_barcode: None,
            format_name: String::new(),
            is_scanned: false,
            show_controls: false,
            preview: None,
            last_error: None,
        }
    }
}

impl ScanSessionState {
    /// State showing a found barcode
    pub fn found(barcode: DecodedBarcode, format_name: impl Into<String>) -> Self {
        Self {
            phase: ScanPhase::Found,
            current_barcode: Some(barcode),
            format_name: format_name.into(),
            is_scanned: true,
            show_controls: true,
            preview: None,
            last_error: None,
        }
    }

    /// State of a running camera with nothing found yet
    pub fn scanning() -> Self {
        Self {
            phase: ScanPhase::Scanning,
            ..Self::default()
        }
    }

    pub fn has_preview(&self) -> bool {
        self.preview.is_some()
    }
}
