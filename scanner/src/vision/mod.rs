//! Frame analysis and image processing
//!
//! Frames come in from the camera, the decoder looks for a barcode in them,
//! and the processor turns a frame with a found barcode into an annotated
//! RGBA preview.

pub mod analyzer;
pub mod decoder;
pub mod frame;
pub mod processor;
pub mod types;

pub use analyzer::{AnalysisOutcome, AnalysisWorker, BarcodeFoundListener, FrameAnalyzer, FrameSender};
pub use decoder::{BarcodeDecoder, QrDecoder};
pub use frame::{Frame, InputImage, Plane, YuvImage, YuvPlanes};
pub use processor::{ImageProcessor, PixelFormat, ProcessedImage};
pub use types::{BarcodeFormat, BoundingBox, DecodedBarcode};
