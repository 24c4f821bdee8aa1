//! Scan session controller
//!
//! State machine: Idle -> Scanning (`start`) -> Found (barcode decoded)
//! -> Scanning (`reset`). A decode stops the camera and publishes the Found
//! state right away; image processing and persistence follow in a
//! background task tied to the session generation that produced it.
//!
//! Barcodes arriving while a scan is already Found are dropped.
//!
//! Each reset starts a new generation. Background work from an older
//! generation may still finish, but it never publishes into the new
//! session and never writes history; an image it already wrote is deleted.
//! Within one generation at most one history row is written.

use super::device::{CameraControl, ScanFeedback};
use super::state::{ScanPhase, ScanSessionState};
use crate::error::{AppError, BarcodeError, Result};
use crate::services::{HistoryStore, SettingKey, SettingValue, Settings, SettingsStore};
use crate::storage::ImageStorage;
use crate::vision::{
    BarcodeFormat, BarcodeFoundListener, DecodedBarcode, Frame, ImageProcessor, ProcessedImage,
    YuvImage,
};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug)]
struct SessionInfo {
    generation: u64,
    id: Uuid,
    /// A history row was written (or is being written) this generation
    saved: bool,
}

struct Inner {
    history: HistoryStore,
    settings: SettingsStore,
    images: ImageStorage,
    processor: ImageProcessor,
    camera: Arc<dyn CameraControl>,
    feedback: Arc<dyn ScanFeedback>,
    state: watch::Sender<ScanSessionState>,
    session: Mutex<SessionInfo>,
    /// One image processing run at a time
    process_lock: tokio::sync::Mutex<()>,
    /// Orders writes of the remembered scan against the clear in `reset`
    last_scan_lock: tokio::sync::Mutex<()>,
    pending: Mutex<Vec<JoinHandle<()>>>,
    flash_watcher: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
}

/// Coordinates one scanning screen
#[derive(Clone)]
pub struct ScanSessionController {
    inner: Arc<Inner>,
}

impl ScanSessionController {
    /// Must be called from within a tokio runtime; background work is
    /// spawned onto it.
    pub fn new(
        history: HistoryStore,
        settings: SettingsStore,
        images: ImageStorage,
        camera: Arc<dyn CameraControl>,
        feedback: Arc<dyn ScanFeedback>,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| AppError::Unknown(format!("No async runtime for scan session: {}", e)))?;
        let (state, _) = watch::channel(ScanSessionState::default());

        Ok(Self {
            inner: Arc::new(Inner {
                history,
                settings,
                images,
                processor: ImageProcessor::new(),
                camera,
                feedback,
                state,
                session: Mutex::new(SessionInfo {
                    generation: 0,
                    id: Uuid::new_v4(),
                    saved: false,
                }),
                process_lock: tokio::sync::Mutex::new(()),
                last_scan_lock: tokio::sync::Mutex::new(()),
                pending: Mutex::new(Vec::new()),
                flash_watcher: Mutex::new(None),
                runtime,
            }),
        })
    }

    /// Leave Idle.
    ///
    /// A scan remembered from an interrupted session is restored as Found
    /// with the camera left stopped; otherwise the camera starts scanning.
    pub async fn start(&self) {
        let inner = &self.inner;
        if inner.state.borrow().phase != ScanPhase::Idle {
            debug!("Scan session already started");
            return;
        }

        let (generation, id) = {
            let session = inner.session();
            (session.generation, session.id)
        };

        let restored = match inner.settings.last_scan().await {
            Ok(scan) => scan,
            Err(e) => {
                warn!("Failed to read remembered scan: {}", e);
                None
            }
        };

        match restored {
            Some((payload, format_name)) => {
                info!(session = %id, "Restoring scan from previous session");
                let format = BarcodeFormat::from_display_name(&format_name);
                let barcode = DecodedBarcode::new(payload, format, None);
                {
                    let mut session = inner.session();
                    // The remembered scan went through auto-save already
                    session.saved = true;
                    inner
                        .state
                        .send_replace(ScanSessionState::found(barcode, format_name));
                }
            }
            None => {
                info!(session = %id, "Starting scan session");
                inner.state.send_replace(ScanSessionState::scanning());
                if let Err(e) = inner.camera.start() {
                    inner.set_error(generation, e.into());
                }
            }
        }

        match inner.settings.camera_flash_enabled().await {
            Ok(enabled) => inner.apply_torch(enabled),
            Err(e) => warn!("Failed to read flash setting: {}", e),
        }

        self.spawn_flash_watcher();
    }

    /// Handle a decoded barcode.
    ///
    /// `frame` is the copy of the frame the barcode came from; without it
    /// the scan is still recorded, just without an image.
    pub fn accept_barcode(&self, barcode: DecodedBarcode, frame: Option<YuvImage>) {
        let inner = &self.inner;

        match inner.state.borrow().phase {
            ScanPhase::Idle => {
                debug!("Ignoring barcode, session not started");
                return;
            }
            // Frames already in flight when the camera stopped
            ScanPhase::Found => {
                debug!("Ignoring barcode, scan already found");
                return;
            }
            ScanPhase::Scanning => {}
        }

        let generation = inner.session().generation;

        if barcode.payload.is_empty() {
            inner.set_error(generation, BarcodeError::Invalid.into());
            return;
        }

        if let Err(e) = inner.camera.stop() {
            inner.set_error(generation, e.into());
        }

        let format_name = barcode.format_name().to_string();
        info!(format = %format_name, "Barcode accepted");

        {
            let session = inner.session();
            if session.generation != generation {
                debug!("Session reset while accepting barcode");
                return;
            }
            if inner.state.borrow().phase != ScanPhase::Scanning {
                debug!("Another barcode was accepted first");
                return;
            }
            inner.state.send_modify(|state| {
                state.phase = ScanPhase::Found;
                state.current_barcode = Some(barcode.clone());
                state.format_name = format_name.clone();
                state.is_scanned = true;
                state.show_controls = true;
                state.preview = None;
            });
        }

        let task = inner.runtime.spawn(Arc::clone(inner).run_pipeline(
            generation,
            barcode,
            format_name,
            frame,
        ));
        inner.track(task);
    }

    /// Start a new scan: forget the current barcode and restart the camera.
    ///
    /// Background work of the previous scan keeps running but can no
    /// longer publish or save anything.
    pub async fn reset(&self) {
        let inner = &self.inner;

        let (generation, id) = {
            let mut session = inner.session();
            session.generation += 1;
            session.id = Uuid::new_v4();
            session.saved = false;
            inner.state.send_replace(ScanSessionState::scanning());
            (session.generation, session.id)
        };

        // The generation moved first, so a pipeline waiting on this lock
        // sees itself stale and writes nothing after the clear
        {
            let _guard = inner.last_scan_lock.lock().await;
            if let Err(e) = inner.settings.clear_last_scan().await {
                warn!("Failed to clear remembered scan: {}", e);
            }
        }

        if let Err(e) = inner.camera.start() {
            inner.set_error(generation, e.into());
        }

        info!(session = %id, "Scan session reset");
    }

    /// Return the pending error and clear it. Each error is returned once.
    pub fn take_error(&self) -> Option<AppError> {
        let mut taken = None;
        self.inner.state.send_if_modified(|state| {
            taken = state.last_error.take();
            taken.is_some()
        });
        taken
    }

    /// Receive every state snapshot from now on
    pub fn subscribe(&self) -> watch::Receiver<ScanSessionState> {
        self.inner.state.subscribe()
    }

    /// Current state snapshot
    pub fn state(&self) -> ScanSessionState {
        self.inner.state.borrow().clone()
    }

    pub fn session_id(&self) -> Uuid {
        self.inner.session().id
    }

    /// Wait for all background scan work started so far
    pub async fn flush(&self) {
        loop {
            let handles = std::mem::take(&mut *lock(&self.inner.pending));
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!("Scan pipeline task failed: {}", e);
                }
            }
        }
    }

    /// Clean shutdown: finish background work, stop the camera and forget
    /// the remembered scan
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(watcher) = lock(&self.inner.flash_watcher).take() {
            watcher.abort();
        }

        self.flush().await;

        if let Err(e) = self.inner.camera.stop() {
            warn!("Failed to stop camera: {}", e);
        }

        self.inner.settings.clear_last_scan().await?;
        self.inner.state.send_replace(ScanSessionState::default());

        info!("Scan session shut down");
        Ok(())
    }

    /// Forward flash setting changes to the torch for as long as the
    /// controller lives
    fn spawn_flash_watcher(&self) {
        let mut changes = self.inner.settings.subscribe();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        let watcher = self.inner.runtime.spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        if change.key != SettingKey::CameraFlashEnabled {
                            continue;
                        }
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        if let SettingValue::Bool(enabled) = change.value {
                            inner.apply_torch(enabled);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Flash watcher skipped {} setting changes", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        if let Some(previous) = lock(&self.inner.flash_watcher).replace(watcher) {
            previous.abort();
        }
    }
}

impl Inner {
    fn session(&self) -> MutexGuard<'_, SessionInfo> {
        lock(&self.session)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.session().generation == generation
    }

    /// Take the one save of this generation
    fn claim_save(&self, generation: u64) -> bool {
        let mut session = self.session();
        if session.generation != generation || session.saved {
            return false;
        }
        session.saved = true;
        true
    }

    fn release_claim(&self, generation: u64) {
        let mut session = self.session();
        if session.generation == generation {
            session.saved = false;
        }
    }

    /// Record an error for the UI, unless the session has moved on
    fn set_error(&self, generation: u64, err: AppError) {
        error!("Scan session error: {}", err);
        let session = self.session();
        if session.generation == generation {
            self.state
                .send_modify(|state| state.last_error = Some(err));
        }
    }

    fn apply_torch(&self, enabled: bool) {
        if let Err(e) = self.camera.set_torch(enabled) {
            let generation = self.session().generation;
            self.set_error(generation, e.into());
        }
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut pending = lock(&self.pending);
        pending.retain(|handle| !handle.is_finished());
        pending.push(task);
    }

    async fn run_pipeline(
        self: Arc<Self>,
        generation: u64,
        barcode: DecodedBarcode,
        format_name: String,
        frame: Option<YuvImage>,
    ) {
        let settings = match self.settings.load().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to load settings, using defaults: {}", e);
                Settings::default()
            }
        };

        if settings.sound_enabled {
            self.feedback.play_tone();
        }
        if settings.vibration_enabled {
            self.feedback.vibrate();
        }

        {
            let _guard = self.last_scan_lock.lock().await;
            if self.is_current(generation) {
                if let Err(e) = self
                    .settings
                    .remember_last_scan(&barcode.payload, &format_name)
                    .await
                {
                    warn!("Failed to remember scan: {}", e);
                }
            }
        }

        let processed = match frame {
            Some(frame) => {
                self.process(frame, &barcode, &settings, generation)
                    .await
            }
            None => None,
        };

        // Publish the preview, unless a reset got here first
        {
            let session = self.session();
            if session.generation != generation {
                debug!("Discarding stale scan result");
                return;
            }
            if let Some(preview) = &processed {
                self.state
                    .send_modify(|state| state.preview = Some(Arc::clone(preview)));
            }
        }

        if !settings.auto_save {
            debug!("Auto-save disabled, scan not recorded");
            return;
        }

        if !self.claim_save(generation) {
            debug!("Scan already recorded for this session");
            return;
        }

        let image_path = match &processed {
            Some(image) => match self.images.save(image).await {
                Ok(path) => Some(path),
                Err(e) => {
                    self.release_claim(generation);
                    self.set_error(generation, e);
                    return;
                }
            },
            None => None,
        };

        // A reset while the image was being written makes it an orphan
        if !self.is_current(generation) {
            debug!("Session reset during save, discarding image");
            self.images.delete(image_path.as_deref()).await;
            return;
        }

        match self
            .history
            .insert(
                &barcode.payload,
                &format_name,
                barcode.format_code,
                image_path.as_deref(),
            )
            .await
        {
            Ok(Some(entry)) => {
                info!(id = entry.id, "Scan recorded in history");
            }
            Ok(None) => {
                self.release_claim(generation);
                self.images.delete(image_path.as_deref()).await;
            }
            Err(e) => {
                self.release_claim(generation);
                self.images.delete(image_path.as_deref()).await;
                self.set_error(generation, e);
            }
        }
    }

    async fn process(
        &self,
        frame: YuvImage,
        barcode: &DecodedBarcode,
        settings: &Settings,
        generation: u64,
    ) -> Option<Arc<ProcessedImage>> {
        let _guard = self.process_lock.lock().await;

        let processor = self.processor.clone();
        let barcode = barcode.clone();
        let (brightness, contrast) = (settings.image_brightness, settings.image_contrast);

        let result = tokio::task::spawn_blocking(move || {
            processor.process(&frame, &barcode, brightness, contrast)
        })
        .await;

        match result {
            Ok(Some(image)) => Some(Arc::new(image)),
            Ok(None) => {
                self.set_error(
                    generation,
                    AppError::Image("scan image could not be processed".to_string()),
                );
                None
            }
            Err(e) => {
                self.set_error(generation, AppError::Image(e.to_string()));
                None
            }
        }
    }
}

impl BarcodeFoundListener for ScanSessionController {
    fn on_barcode_found(&self, barcode: DecodedBarcode, frame: &Frame) {
        self.accept_barcode(barcode, frame.to_yuv_image());
    }

    fn on_code_not_found(&self, error: Option<String>) {
        if let Some(message) = error {
            debug!("Frame analysis failed: {}", message);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
