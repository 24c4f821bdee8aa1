//! Frame analysis
//!
//! `FrameAnalyzer` runs the decode capability on one frame and reports the
//! outcome to its listener. Every frame is released exactly once whatever
//! happens: the frame is owned by `analyze` and released at the end of it,
//! and dropping the future early drops (and so releases) the frame too.
//!
//! `AnalysisWorker` is the single analysis executor in front of it. Frames
//! queue in a one-slot channel; a frame offered while the slot is taken is
//! dropped on the spot, so the camera never waits on the decoder.

use super::decoder::BarcodeDecoder;
use super::frame::Frame;
use super::types::DecodedBarcode;
use crate::error::CameraError;
use crate::session::CameraControl;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Receives the result of every analyzed frame
pub trait BarcodeFoundListener: Send + Sync {
    /// First barcode found in `frame`. The frame is released right after
    /// this returns, so copy out anything needed later.
    fn on_barcode_found(&self, barcode: DecodedBarcode, frame: &Frame);

    /// No barcode in the frame, with the decoder's failure message if the
    /// decode call itself failed.
    fn on_code_not_found(&self, error: Option<String>);
}

/// What `FrameAnalyzer::analyze` reported for a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisOutcome {
    Found(DecodedBarcode),
    NotFound(Option<String>),
}

/// Runs the decoder on frames and notifies a listener
#[derive(Clone)]
pub struct FrameAnalyzer {
    decoder: Arc<dyn BarcodeDecoder>,
    listener: Arc<dyn BarcodeFoundListener>,
}

impl FrameAnalyzer {
    pub fn new(decoder: Arc<dyn BarcodeDecoder>, listener: Arc<dyn BarcodeFoundListener>) -> Self {
        Self { decoder, listener }
    }

    /// Analyze one frame.
    ///
    /// Emits exactly one listener call and releases the frame before
    /// returning. Only the first decoded barcode is forwarded.
    pub async fn analyze(&self, frame: Frame) -> AnalysisOutcome {
        let outcome = match frame.input_image() {
            None => AnalysisOutcome::NotFound(Some("frame carries no image buffer".to_string())),
            Some(input) => {
                let decoder = Arc::clone(&self.decoder);

                // Decoding is CPU-bound, keep it off the async workers
                match tokio::task::spawn_blocking(move || decoder.decode(&input)).await {
                    Ok(Ok(barcodes)) => match barcodes.into_iter().next() {
                        Some(barcode) => AnalysisOutcome::Found(barcode),
                        None => AnalysisOutcome::NotFound(None),
                    },
                    Ok(Err(e)) => AnalysisOutcome::NotFound(Some(e.to_string())),
                    Err(e) => {
                        warn!(error = %e, "Decode task failed");
                        AnalysisOutcome::NotFound(Some(e.to_string()))
                    }
                }
            }
        };

        match &outcome {
            AnalysisOutcome::Found(barcode) => {
                debug!(format = barcode.format_name(), "Barcode found in frame");
                self.listener.on_barcode_found(barcode.clone(), &frame);
            }
            AnalysisOutcome::NotFound(error) => {
                trace!(?error, "No barcode in frame");
                self.listener.on_code_not_found(error.clone());
            }
        }

        frame.release();
        outcome
    }
}

/// Single-task frame analysis executor
pub struct AnalysisWorker {
    rx: mpsc::Receiver<Frame>,
}

impl AnalysisWorker {
    /// Open the frame stream without starting analysis yet.
    ///
    /// The sender exists before the analyzer, so it can be handed to the
    /// analyzer's listener as its camera. A listener holding a sender keeps
    /// the worker alive; abort the handle from `run` to stop it.
    pub fn channel() -> (FrameSender, AnalysisWorker) {
        let (tx, rx) = mpsc::channel::<Frame>(1);

        let sender = FrameSender {
            tx,
            accepting: Arc::new(AtomicBool::new(true)),
        };

        (sender, AnalysisWorker { rx })
    }

    /// Start analyzing. The task stops once every `FrameSender` is dropped.
    pub fn run(mut self, analyzer: FrameAnalyzer) -> JoinHandle<()> {
        tokio::spawn(async move {
            debug!("Frame analysis worker started");
            while let Some(frame) = self.rx.recv().await {
                analyzer.analyze(frame).await;
            }
            debug!("Frame analysis worker stopped");
        })
    }

    /// `channel` and `run` in one go
    pub fn spawn(analyzer: FrameAnalyzer) -> (FrameSender, JoinHandle<()>) {
        let (sender, worker) = Self::channel();
        (sender, worker.run(analyzer))
    }
}

/// Feeds frames to an `AnalysisWorker`
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<Frame>,
    accepting: Arc<AtomicBool>,
}

impl FrameSender {
    /// Queue a frame for analysis.
    ///
    /// Returns false, releasing the frame immediately, when the stream is
    /// paused, the worker is busy with a queued frame, or the worker is gone.
    pub fn offer(&self, frame: Frame) -> bool {
        if !self.is_accepting() {
            trace!("Frame dropped, stream paused");
            return false;
        }

        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(frame)) => {
                trace!("Frame dropped, analyzer busy");
                frame.release();
                false
            }
            Err(TrySendError::Closed(frame)) => {
                debug!("Frame dropped, analyzer stopped");
                frame.release();
                false
            }
        }
    }

    /// Stop accepting frames
    pub fn pause(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    /// Accept frames again
    pub fn resume(&self) {
        self.accepting.store(true, Ordering::SeqCst);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }
}

/// A frame stream gated by the session: stopping the camera stops the
/// stream from reaching the decoder.
impl CameraControl for FrameSender {
    fn start(&self) -> Result<(), CameraError> {
        if self.tx.is_closed() {
            return Err(CameraError::Unavailable);
        }
        self.resume();
        Ok(())
    }

    fn stop(&self) -> Result<(), CameraError> {
        self.pause();
        Ok(())
    }

    fn set_torch(&self, enabled: bool) -> Result<(), CameraError> {
        debug!(enabled, "Frame stream has no torch, ignoring");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BarcodeError;
    use crate::vision::frame::InputImage;
    use crate::vision::types::{BarcodeFormat, BoundingBox};
    use image::RgbaImage;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Decoder returning a canned answer
    struct FixedDecoder(std::result::Result<Vec<DecodedBarcode>, BarcodeError>);

    impl BarcodeDecoder for FixedDecoder {
        fn decode(&self, _image: &InputImage) -> std::result::Result<Vec<DecodedBarcode>, BarcodeError> {
            self.0.clone()
        }
    }

    struct PanickingDecoder;

    impl BarcodeDecoder for PanickingDecoder {
        fn decode(&self, _image: &InputImage) -> std::result::Result<Vec<DecodedBarcode>, BarcodeError> {
            panic!("decoder crashed");
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        found: Mutex<Vec<DecodedBarcode>>,
        not_found: Mutex<Vec<Option<String>>>,
    }

    impl BarcodeFoundListener for RecordingListener {
        fn on_barcode_found(&self, barcode: DecodedBarcode, _frame: &Frame) {
            self.found.lock().unwrap().push(barcode);
        }

        fn on_code_not_found(&self, error: Option<String>) {
            self.not_found.lock().unwrap().push(error);
        }
    }

    fn counted_frame(releases: &Arc<AtomicUsize>) -> Frame {
        let releases = Arc::clone(releases);
        Frame::from_rgba(&RgbaImage::new(8, 8), 0).with_release_hook(move || {
            releases.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn barcode(payload: &str) -> DecodedBarcode {
        DecodedBarcode::new(payload, BarcodeFormat::Ean13, Some(BoundingBox::new(0, 0, 4, 4)))
    }

    fn analyzer(
        decoder: impl BarcodeDecoder + 'static,
    ) -> (FrameAnalyzer, Arc<RecordingListener>) {
        let listener = Arc::new(RecordingListener::default());
        let analyzer = FrameAnalyzer::new(Arc::new(decoder), listener.clone());
        (analyzer, listener)
    }

    #[tokio::test]
    async fn test_no_barcode_emits_not_found_and_releases_once() {
        let (analyzer, listener) = analyzer(FixedDecoder(Ok(vec![])));
        let releases = Arc::new(AtomicUsize::new(0));

        let outcome = analyzer.analyze(counted_frame(&releases)).await;

        assert_eq!(outcome, AnalysisOutcome::NotFound(None));
        assert_eq!(listener.not_found.lock().unwrap().len(), 1);
        assert!(listener.found.lock().unwrap().is_empty());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_only_first_barcode_is_forwarded() {
        let (analyzer, listener) =
            analyzer(FixedDecoder(Ok(vec![barcode("first"), barcode("second")])));
        let releases = Arc::new(AtomicUsize::new(0));

        let outcome = analyzer.analyze(counted_frame(&releases)).await;

        assert_eq!(outcome, AnalysisOutcome::Found(barcode("first")));
        let found = listener.found.lock().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].payload, "first");
        assert!(listener.not_found.lock().unwrap().is_empty());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_decode_failure_reports_message() {
        let (analyzer, listener) = analyzer(FixedDecoder(Err(BarcodeError::Unknown(
            "model not loaded".to_string(),
        ))));
        let releases = Arc::new(AtomicUsize::new(0));

        let outcome = analyzer.analyze(counted_frame(&releases)).await;

        assert_eq!(
            outcome,
            AnalysisOutcome::NotFound(Some("Barcode error: model not loaded".to_string()))
        );
        assert_eq!(listener.not_found.lock().unwrap().len(), 1);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_decoder_panic_still_releases() {
        let (analyzer, listener) = analyzer(PanickingDecoder);
        let releases = Arc::new(AtomicUsize::new(0));

        let outcome = analyzer.analyze(counted_frame(&releases)).await;

        assert!(matches!(outcome, AnalysisOutcome::NotFound(Some(_))));
        assert_eq!(listener.not_found.lock().unwrap().len(), 1);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_frame_without_buffer() {
        let (analyzer, listener) = analyzer(FixedDecoder(Ok(vec![barcode("never")])));
        let releases = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&releases);
        let frame = Frame::new(8, 8, 0, None).with_release_hook(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let outcome = analyzer.analyze(frame).await;

        assert!(matches!(outcome, AnalysisOutcome::NotFound(Some(_))));
        assert!(listener.found.lock().unwrap().is_empty());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_worker_analyzes_offered_frames() {
        let (analyzer, listener) = analyzer(FixedDecoder(Ok(vec![barcode("queued")])));
        let (sender, handle) = AnalysisWorker::spawn(analyzer);
        let releases = Arc::new(AtomicUsize::new(0));

        assert!(sender.offer(counted_frame(&releases)));
        drop(sender);
        handle.await.unwrap();

        assert_eq!(listener.found.lock().unwrap().len(), 1);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_paused_stream_drops_frames() {
        let (analyzer, listener) = analyzer(FixedDecoder(Ok(vec![barcode("x")])));
        let (sender, handle) = AnalysisWorker::spawn(analyzer);
        let releases = Arc::new(AtomicUsize::new(0));

        sender.stop().unwrap();
        assert!(!sender.offer(counted_frame(&releases)));
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        sender.start().unwrap();
        assert!(sender.is_accepting());

        drop(sender);
        handle.await.unwrap();
        assert!(listener.found.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_full_slot_drops_frame() {
        let (analyzer, _listener) = analyzer(FixedDecoder(Ok(vec![])));
        let (sender, handle) = AnalysisWorker::spawn(analyzer);
        let releases = Arc::new(AtomicUsize::new(0));

        // The worker has not run yet on this single-threaded runtime, so the
        // first frame takes the slot and the second finds it full.
        assert!(sender.offer(counted_frame(&releases)));
        assert!(!sender.offer(counted_frame(&releases)));
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        drop(sender);
        handle.await.unwrap();
        assert_eq!(releases.load(Ordering::SeqCst), 2);
    }
}
