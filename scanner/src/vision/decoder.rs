//! Decode capability
//!
//! The pipeline treats barcode recognition as a black box behind
//! `BarcodeDecoder`. `QrDecoder` is the bundled implementation, backed by
//! rqrr; it only recognises QR codes.

use super::frame::InputImage;
use super::types::{BarcodeFormat, BoundingBox, DecodedBarcode};
use crate::error::BarcodeError;
use tracing::{debug, trace};

/// Something that finds barcodes in a frame.
///
/// Implementations are called from the blocking pool and may take as long
/// as they need. Bounding boxes must be reported in the coordinate space of
/// `InputImage::upright`.
pub trait BarcodeDecoder: Send + Sync {
    fn decode(&self, image: &InputImage) -> Result<Vec<DecodedBarcode>, BarcodeError>;
}

/// QR decoder backed by rqrr
#[derive(Debug, Default, Clone, Copy)]
pub struct QrDecoder;

impl QrDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl BarcodeDecoder for QrDecoder {
    fn decode(&self, image: &InputImage) -> Result<Vec<DecodedBarcode>, BarcodeError> {
        let start = std::time::Instant::now();

        let upright = image.upright().ok_or(BarcodeError::Invalid)?;
        let (width, height) = (upright.width() as usize, upright.height() as usize);

        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(width, height, |x, y| {
            upright.get_pixel(x as u32, y as u32).0[0]
        });
        let grids = prepared.detect_grids();

        trace!(
            grids = grids.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "QR grid detection complete"
        );

        let mut barcodes = Vec::with_capacity(grids.len());
        let mut last_error = None;

        for grid in grids {
            let corners: Vec<(i32, i32)> = grid.bounds.iter().map(|p| (p.x, p.y)).collect();

            match grid.decode() {
                Ok((_meta, content)) => {
                    let bounding_box = BoundingBox::enclosing(&corners);
                    debug!(content = %content, ?bounding_box, "Decoded QR code");
                    barcodes.push(DecodedBarcode::new(
                        content,
                        BarcodeFormat::QrCode,
                        bounding_box,
                    ));
                }
                Err(e) => {
                    debug!(error = ?e, "Failed to decode QR grid");
                    last_error = Some(format!("{:?}", e));
                }
            }
        }

        // A grid was found but none could be read
        if barcodes.is_empty() {
            if let Some(message) = last_error {
                return Err(BarcodeError::Unknown(message));
            }
        }

        Ok(barcodes)
    }
}
