//! Scan session
//!
//! The controller that ties the analyzer, processor, image storage, history
//! and settings together, plus the device seams it drives.

pub mod controller;
pub mod device;
pub mod state;

pub use controller::ScanSessionController;
pub use device::{CameraControl, NoopCamera, ScanFeedback, TerminalFeedback};
pub use state::{ScanPhase, ScanSessionState};
