//! Core types for decode results
//!
//! These types describe what the decode capability reports for a frame and
//! are shared by the analyzer, the image processor and the session
//! controller.

use serde::{Deserialize, Serialize};

/// Barcode symbology, numbered with the decode library's format codes.
///
/// The numeric code is what the history table stores in `codeType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BarcodeFormat {
    Unknown,
    Code128,
    Code39,
    Code93,
    Codabar,
    DataMatrix,
    Ean13,
    Ean8,
    Itf,
    QrCode,
    UpcA,
    UpcE,
    Pdf417,
    Aztec,
}

impl BarcodeFormat {
    pub const ALL: [BarcodeFormat; 14] = [
        BarcodeFormat::Unknown,
        BarcodeFormat::Code128,
        BarcodeFormat::Code39,
        BarcodeFormat::Code93,
        BarcodeFormat::Codabar,
        BarcodeFormat::DataMatrix,
        BarcodeFormat::Ean13,
        BarcodeFormat::Ean8,
        BarcodeFormat::Itf,
        BarcodeFormat::QrCode,
        BarcodeFormat::UpcA,
        BarcodeFormat::UpcE,
        BarcodeFormat::Pdf417,
        BarcodeFormat::Aztec,
    ];

    /// Format code as reported by the decoder
    pub fn code(self) -> i32 {
        match self {
            BarcodeFormat::Unknown => -1,
            BarcodeFormat::Code128 => 1,
            BarcodeFormat::Code39 => 2,
            BarcodeFormat::Code93 => 4,
            BarcodeFormat::Codabar => 8,
            BarcodeFormat::DataMatrix => 16,
            BarcodeFormat::Ean13 => 32,
            BarcodeFormat::Ean8 => 64,
            BarcodeFormat::Itf => 128,
            BarcodeFormat::QrCode => 256,
            BarcodeFormat::UpcA => 512,
            BarcodeFormat::UpcE => 1024,
            BarcodeFormat::Pdf417 => 2048,
            BarcodeFormat::Aztec => 4096,
        }
    }

    /// Map a decoder format code back to a format
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => BarcodeFormat::Code128,
            2 => BarcodeFormat::Code39,
            4 => BarcodeFormat::Code93,
            8 => BarcodeFormat::Codabar,
            16 => BarcodeFormat::DataMatrix,
            32 => BarcodeFormat::Ean13,
            64 => BarcodeFormat::Ean8,
            128 => BarcodeFormat::Itf,
            256 => BarcodeFormat::QrCode,
            512 => BarcodeFormat::UpcA,
            1024 => BarcodeFormat::UpcE,
            2048 => BarcodeFormat::Pdf417,
            4096 => BarcodeFormat::Aztec,
            _ => BarcodeFormat::Unknown,
        }
    }

    /// Human-readable name, stored alongside the scan
    pub fn display_name(self) -> &'static str {
        match self {
            BarcodeFormat::Unknown => "?",
            BarcodeFormat::Code128 => "Code128",
            BarcodeFormat::Code39 => "Code39",
            BarcodeFormat::Code93 => "Code93",
            BarcodeFormat::Codabar => "Codabar",
            BarcodeFormat::DataMatrix => "Data Matrix",
            BarcodeFormat::Ean13 => "EAN13",
            BarcodeFormat::Ean8 => "EAN8",
            BarcodeFormat::Itf => "ITF",
            BarcodeFormat::QrCode => "QR code",
            BarcodeFormat::UpcA => "UPC A",
            BarcodeFormat::UpcE => "UPC E",
            BarcodeFormat::Pdf417 => "PDF417",
            BarcodeFormat::Aztec => "Aztec",
        }
    }

    /// Reverse of `display_name`
    pub fn from_display_name(name: &str) -> Self {
        BarcodeFormat::ALL
            .into_iter()
            .find(|format| format.display_name() == name)
            .unwrap_or(BarcodeFormat::Unknown)
    }
}

/// Axis-aligned rectangle in the decoder's image coordinates.
///
/// `right` and `bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl BoundingBox {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Smallest box containing all the given corner points
    pub fn enclosing(points: &[(i32, i32)]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut bbox = Self::new(first.0, first.1, first.0, first.1);
        for &(x, y) in rest {
            bbox.left = bbox.left.min(x);
            bbox.top = bbox.top.min(y);
            bbox.right = bbox.right.max(x);
            bbox.bottom = bbox.bottom.max(y);
        }
        Some(bbox)
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// One barcode reported by the decode capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedBarcode {
    /// Raw payload text, empty when the decoder could not read one
    pub payload: String,
    pub format_code: i32,
    pub bounding_box: Option<BoundingBox>,
}

impl DecodedBarcode {
    pub fn new(
        payload: impl Into<String>,
        format: BarcodeFormat,
        bounding_box: Option<BoundingBox>,
    ) -> Self {
        Self {
            payload: payload.into(),
            format_code: format.code(),
            bounding_box,
        }
    }

    pub fn format(&self) -> BarcodeFormat {
        BarcodeFormat::from_code(self.format_code)
    }

    pub fn format_name(&self) -> &'static str {
        self.format().display_name()
    }
}
