//! Device seams
//!
//! The camera and the user feedback hardware live outside this crate. The
//! session drives them through these traits.

use crate::error::CameraError;
use std::io::Write;

/// Camera preview and analysis stream control
pub trait CameraControl: Send + Sync {
    /// Start (or resume) delivering frames for analysis
    fn start(&self) -> Result<(), CameraError>;

    /// Stop delivering frames
    fn stop(&self) -> Result<(), CameraError>;

    /// Switch the torch on or off
    fn set_torch(&self, enabled: bool) -> Result<(), CameraError>;
}

/// Tone and vibration played when a barcode is found
pub trait ScanFeedback: Send + Sync {
    fn play_tone(&self);
    fn vibrate(&self);
}

/// Camera stand-in for pipelines fed with still images
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCamera;

impl CameraControl for NoopCamera {
    fn start(&self) -> Result<(), CameraError> {
        Ok(())
    }

    fn stop(&self) -> Result<(), CameraError> {
        Ok(())
    }

    fn set_torch(&self, _enabled: bool) -> Result<(), CameraError> {
        Ok(())
    }
}

/// Feedback for a terminal: the bell for the tone, a log line for vibration
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalFeedback;

impl ScanFeedback for TerminalFeedback {
    fn play_tone(&self) {
        let mut stderr = std::io::stderr();
        if let Err(e) = stderr.write_all(b"\x07").and_then(|_| stderr.flush()) {
            tracing::debug!("Failed to ring terminal bell: {}", e);
        }
    }

    fn vibrate(&self) {
        tracing::debug!("Vibration requested, no vibrator on this device");
    }
}
