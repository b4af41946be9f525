//! Session controller: the state machine that owns the camera, the pose
//! detector and the user's overlay selection.
//!
//! All asynchronous work (capture thread, detector worker, sprite decoding)
//! reports back through channels. [`SessionController::pump`] drains them on
//! the owning thread, and every message carries a generation or request id so
//! results from torn-down resources are dropped without touching state.

mod state;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, unbounded};

pub use self::state::{SessionState, SessionView, SpriteStatus};
use crate::{
    config::{AppConfig, clamp_sprite_size},
    designs::{self, DesignId, OverlayDesign, Sprite},
    error::SessionError,
    geometry::{self, GeometryConfig},
    pipeline::{
        camera::{CameraDevice, CaptureBackend, CaptureSession, DeviceSelector, next_camera_index},
        compositor::{self, CompositedFrame, CompositorOptions},
        detector::{
            DetectorEvent, DetectorOptions, LandmarkServiceFactory, PoseDetector, SubmitOutcome,
        },
        skeleton,
    },
    types::{DetectionBatch, Frame},
};

type SpriteResult = (u64, Result<Arc<Sprite>, SessionError>);

pub struct SessionController {
    config: AppConfig,
    geometry: GeometryConfig,
    compositor: CompositorOptions,
    detector_options: DetectorOptions,

    capture: CaptureSession,
    factory: Arc<dyn LandmarkServiceFactory>,
    detector: Option<PoseDetector>,
    /// Stopped detectors whose workers may still be finishing a call.
    retired: Vec<PoseDetector>,
    detector_generation: u64,
    detector_tx: Sender<DetectorEvent>,
    detector_rx: Receiver<DetectorEvent>,
    feeding: bool,

    state: SessionState,
    camera_index: usize,

    designs: Vec<OverlayDesign>,
    selected_design: DesignId,
    sprite: Option<Arc<Sprite>>,
    sprite_status: SpriteStatus,
    sprite_request: u64,
    sprite_tx: Sender<SpriteResult>,
    sprite_rx: Receiver<SpriteResult>,
    sprite_size: f32,

    output: Option<CompositedFrame>,
    frame_number: u64,
}

impl SessionController {
    pub fn new(
        config: AppConfig,
        backend: Box<dyn CaptureBackend>,
        factory: Arc<dyn LandmarkServiceFactory>,
    ) -> Self {
        let (detector_tx, detector_rx) = unbounded();
        let (sprite_tx, sprite_rx) = unbounded();

        let designs = designs::catalog(&config.designs);
        let initial = designs::find_by_name(&designs, &config.overlay.default_design)
            .or_else(|| {
                log::warn!(
                    "unknown design {:?}, falling back to the first one",
                    config.overlay.default_design
                );
                designs.first()
            })
            .map(|design| design.id)
            .unwrap_or(DesignId(1));

        let mut controller = Self {
            geometry: config.overlay.geometry(),
            compositor: config.overlay.compositor(),
            detector_options: DetectorOptions::default(),
            capture: CaptureSession::new(backend),
            factory,
            detector: None,
            retired: Vec::new(),
            detector_generation: 0,
            detector_tx,
            detector_rx,
            feeding: false,
            state: SessionState::Idle,
            camera_index: 0,
            designs,
            selected_design: initial,
            sprite: None,
            sprite_status: SpriteStatus::Loading,
            sprite_request: 0,
            sprite_tx,
            sprite_rx,
            sprite_size: clamp_sprite_size(config.overlay.sprite_size),
            output: None,
            frame_number: 0,
            config,
        };
        controller.request_sprite();
        controller
    }

    /// Camera to open on start, by enumeration index.
    pub fn with_camera_index(mut self, index: usize) -> Self {
        self.camera_index = index;
        self
    }

    /// Begin the startup sequence. Only valid from `Idle`.
    pub fn start(&mut self) {
        if self.state != SessionState::Idle {
            log::debug!("start ignored in state {}", self.state.label());
            return;
        }
        self.begin(SessionState::Initializing);
    }

    /// Rerun startup from scratch after an error.
    pub fn retry(&mut self) {
        if !matches!(self.state, SessionState::Error(_) | SessionState::Idle) {
            log::debug!("retry ignored in state {}", self.state.label());
            return;
        }
        log::info!("retrying session startup");
        self.begin(SessionState::Initializing);
    }

    /// Switch to the next camera. Returns false when nothing happened.
    pub fn cycle_camera(&mut self) -> bool {
        if self.state != SessionState::Active {
            return false;
        }
        let devices = match self.capture.enumerate() {
            Ok(devices) => devices,
            Err(err) => {
                log::warn!("failed to list cameras: {err}");
                return false;
            }
        };
        let Some(next) = next_camera_index(self.camera_index, devices.len()) else {
            log::info!("no cameras to switch between");
            return false;
        };

        log::info!("switching camera {} -> {next}", self.camera_index);
        self.camera_index = next;
        self.begin(SessionState::Switching);
        true
    }

    /// Release camera, detector and feed loop. Safe to call at any point and
    /// any number of times.
    pub fn teardown(&mut self) {
        self.release();
        self.state = SessionState::Idle;
    }

    /// Process pending events. Returns true when a new output frame was drawn.
    pub fn pump(&mut self) -> bool {
        self.drain_sprite_loads();
        self.retired
            .retain_mut(|detector| !detector.join_timeout(Duration::ZERO));

        if !matches!(
            self.state,
            SessionState::Initializing | SessionState::Switching | SessionState::Active
        ) {
            while self.detector_rx.try_recv().is_ok() {}
            return false;
        }

        if let Some(reason) = self.capture.take_failure() {
            self.fail(SessionError::DeviceUnavailable(reason));
            return false;
        }

        let mut drew = false;
        while let Ok(event) = self.detector_rx.try_recv() {
            if event.generation() != self.detector_generation {
                log::debug!("dropping event from detector {}", event.generation());
                continue;
            }
            match event {
                DetectorEvent::Ready { generation } => self.on_detector_ready(generation),
                DetectorEvent::Failed { reason, .. } => {
                    self.fail(SessionError::DetectorInitFailure(reason));
                    return false;
                }
                DetectorEvent::Detection {
                    generation,
                    seq,
                    frame,
                    result,
                } => drew |= self.on_detection(generation, seq, frame, result),
            }
        }

        if self.state.is_starting() {
            let timeout = self.config.detector.init_timeout();
            if self.detector.as_ref().is_some_and(|d| d.elapsed() > timeout) {
                self.fail(SessionError::DetectorInitFailure(format!(
                    "not ready after {timeout:?}"
                )));
                return false;
            }
        }

        self.feed();
        drew
    }

    pub fn select_design(&mut self, id: DesignId) -> bool {
        if !self.designs.iter().any(|design| design.id == id) {
            log::warn!("unknown design {id:?}");
            return false;
        }
        // Reselecting a failed design retries the load.
        if id == self.selected_design && !matches!(self.sprite_status, SpriteStatus::Failed(_)) {
            return true;
        }
        self.selected_design = id;
        self.request_sprite();
        true
    }

    /// Set the sprite base size, returning the clamped value in effect.
    pub fn set_sprite_size(&mut self, size: f32) -> f32 {
        self.sprite_size = clamp_sprite_size(size);
        self.sprite_size
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn view(&self) -> SessionView<'_> {
        SessionView::from(&self.state)
    }

    pub fn output(&self) -> Option<&CompositedFrame> {
        self.output.as_ref()
    }

    pub fn is_camera_ready(&self) -> bool {
        self.state == SessionState::Active
            && self.capture.source().is_some_and(|source| source.is_ready())
    }

    pub fn sprite_status(&self) -> &SpriteStatus {
        &self.sprite_status
    }

    pub fn sprite_size(&self) -> f32 {
        self.sprite_size
    }

    pub fn designs(&self) -> &[OverlayDesign] {
        &self.designs
    }

    pub fn selected_design(&self) -> DesignId {
        self.selected_design
    }

    pub fn camera_index(&self) -> usize {
        self.camera_index
    }

    pub fn active_camera(&self) -> Option<&CameraDevice> {
        self.capture.source().map(|source| &source.device)
    }

    pub fn cameras(&self) -> &[CameraDevice] {
        self.capture.devices()
    }

    fn begin(&mut self, next: SessionState) {
        self.release();
        self.state = next;
        if let Err(err) = self.acquire() {
            self.fail(err);
        }
    }

    /// Camera first, then the detector. The feed loop starts once the
    /// detector reports ready.
    fn acquire(&mut self) -> Result<(), SessionError> {
        self.await_retired()?;

        let selector = DeviceSelector::Index(self.camera_index);
        let source = self.capture.open(&selector, &self.config.capture)?;
        self.camera_index = source.device_index;

        self.detector_generation += 1;
        let detector = PoseDetector::start(
            self.factory.clone(),
            self.detector_options,
            self.config.detector.quiescence(),
            self.detector_tx.clone(),
            self.detector_generation,
        )?;
        self.detector = Some(detector);
        Ok(())
    }

    /// Never blocks: a detector busy in a service call is stopped and left
    /// to finish on its own.
    fn release(&mut self) {
        self.feeding = false;
        if let Some(mut detector) = self.detector.take() {
            detector.stop();
            self.retired.push(detector);
        }
        self.capture.close();
    }

    /// Give stopped detectors a bounded time to exit so no two service
    /// instances are ever alive at once.
    fn await_retired(&mut self) -> Result<(), SessionError> {
        let deadline = Instant::now() + self.config.detector.shutdown_wait();
        self.retired.retain_mut(|detector| {
            !detector.join_timeout(deadline.saturating_duration_since(Instant::now()))
        });
        if self.retired.is_empty() {
            return Ok(());
        }
        Err(SessionError::DetectorInitFailure(format!(
            "previous hand detector still busy after {:?}",
            self.config.detector.shutdown_wait()
        )))
    }

    fn fail(&mut self, err: SessionError) {
        log::error!("session failed: {err}");
        self.release();
        self.state = SessionState::Error(err);
    }

    fn on_detector_ready(&mut self, generation: u64) {
        let Some(detector) = self.detector.as_mut() else {
            return;
        };
        if !detector.mark_ready(generation) || !self.state.is_starting() {
            return;
        }
        self.feeding = true;
        self.state = SessionState::Active;
        log::info!("session active on camera {}", self.camera_index);
    }

    fn on_detection(
        &mut self,
        generation: u64,
        seq: u64,
        frame: Frame,
        result: Result<DetectionBatch, String>,
    ) -> bool {
        let accepted = self
            .detector
            .as_mut()
            .is_some_and(|detector| detector.accept_result(generation, seq));
        if !accepted || self.state != SessionState::Active {
            return false;
        }

        let batch = match result {
            Ok(batch) => batch,
            Err(reason) => {
                let err = SessionError::FrameSubmissionFailure(reason);
                log::warn!("{err}");
                DetectionBatch::empty()
            }
        };
        self.render(&frame, &batch)
    }

    fn render(&mut self, frame: &Frame, batch: &DetectionBatch) -> bool {
        let transforms = geometry::compute_batch_transforms(
            batch,
            frame.width,
            frame.height,
            self.sprite_size,
            &self.geometry,
        );
        let sprite = match self.sprite_status {
            SpriteStatus::Ready => self.sprite.as_deref(),
            _ => None,
        };

        let output = self.output.get_or_insert_with(CompositedFrame::default);
        let stats = compositor::render(frame, &transforms, sprite, output, &self.compositor);
        if stats.skipped {
            return false;
        }
        if self.compositor.show_skeleton {
            skeleton::draw_hands(&mut output.rgba, output.width, output.height, batch);
        }
        self.frame_number += 1;
        output.frame_number = self.frame_number;
        true
    }

    fn feed(&mut self) {
        if !self.feeding || self.state != SessionState::Active {
            return;
        }
        let Some(frame) = self.capture.latest_frame() else {
            return;
        };
        if let Some(source) = self.capture.source_mut() {
            if !source.is_ready() {
                source.mark_ready(frame.width, frame.height);
            }
        }
        let Some(detector) = self.detector.as_mut() else {
            return;
        };
        match detector.submit_frame(frame) {
            SubmitOutcome::Submitted(seq) => log::trace!("submitted frame {seq}"),
            SubmitOutcome::DroppedBusy | SubmitOutcome::DroppedNotReady => {}
            SubmitOutcome::Stopped => self.feeding = false,
        }
    }

    fn request_sprite(&mut self) {
        let Some(design) = self
            .designs
            .iter()
            .find(|design| design.id == self.selected_design)
            .cloned()
        else {
            return;
        };

        self.sprite_request += 1;
        self.sprite = None;
        self.sprite_status = SpriteStatus::Loading;

        let request = self.sprite_request;
        let tx = self.sprite_tx.clone();
        designs::spawn_sprite_load(design, move |result| {
            let _ = tx.send((request, result));
        });
    }

    fn drain_sprite_loads(&mut self) {
        while let Ok((request, result)) = self.sprite_rx.try_recv() {
            if request != self.sprite_request {
                continue;
            }
            match result {
                Ok(sprite) => {
                    self.sprite = Some(sprite);
                    self.sprite_status = SpriteStatus::Ready;
                }
                Err(err) => {
                    self.sprite = None;
                    self.sprite_status = SpriteStatus::Failed(err);
                }
            }
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.release();
    }
}
