use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, Sender, unbounded};
use nail_tryon::{
    AppConfig, CaptureError, SessionController, SessionError, SessionState, SpriteStatus,
    config::{CaptureConstraints, CustomDesign},
    designs::DesignId,
    pipeline::{
        camera::{CameraDevice, CaptureBackend, FrameSink, MediaStream},
        detector::{DetectorOptions, LandmarkService, LandmarkServiceFactory},
    },
    types::{DetectionBatch, Frame, HandLandmarkSet, Handedness, LandmarkPoint, NUM_LANDMARKS},
};

const WAIT: Duration = Duration::from_secs(5);
const FRAME_SIZE: u32 = 64;

type Journal = Arc<Mutex<Vec<String>>>;

fn note(journal: &Journal, entry: impl Into<String>) {
    journal.lock().expect("journal").push(entry.into());
}

fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().expect("journal").clone()
}

#[derive(Default)]
struct CameraLedger {
    live: usize,
    max_live: usize,
    sinks: Vec<FrameSink>,
}

struct FakeStream {
    device: String,
    ledger: Arc<Mutex<CameraLedger>>,
    journal: Journal,
    stopped: bool,
}

impl MediaStream for FakeStream {
    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.ledger.lock().expect("ledger").live -= 1;
        note(&self.journal, format!("camera-stop {}", self.device));
    }

    fn resolution(&self) -> Option<(u32, u32)> {
        Some((640, 480))
    }
}

struct FakeCamera {
    devices: Vec<CameraDevice>,
    stable_ids: bool,
    deny: Arc<AtomicBool>,
    ledger: Arc<Mutex<CameraLedger>>,
    journal: Journal,
}

impl CaptureBackend for FakeCamera {
    fn request_permission(&mut self) -> Result<(), CaptureError> {
        note(&self.journal, "camera-permission");
        if self.deny.load(Ordering::SeqCst) {
            Err(CaptureError::PermissionDenied)
        } else {
            Ok(())
        }
    }

    fn enumerate_devices(&mut self) -> Result<Vec<CameraDevice>, CaptureError> {
        Ok(self.devices.clone())
    }

    fn open_stream(
        &mut self,
        device: &CameraDevice,
        _constraints: &CaptureConstraints,
        sink: FrameSink,
    ) -> Result<Box<dyn MediaStream>, CaptureError> {
        let mut ledger = self.ledger.lock().expect("ledger");
        ledger.live += 1;
        ledger.max_live = ledger.max_live.max(ledger.live);
        ledger.sinks.push(sink);
        note(&self.journal, format!("camera-open {}", device.id));
        Ok(Box::new(FakeStream {
            device: device.id.clone(),
            ledger: self.ledger.clone(),
            journal: self.journal.clone(),
            stopped: false,
        }))
    }

    fn has_stable_device_ids(&self) -> bool {
        self.stable_ids
    }
}

#[derive(Default)]
struct DetectorLedger {
    live: AtomicUsize,
    max_live: AtomicUsize,
    detected: AtomicUsize,
}

struct FakeService {
    ledger: Arc<DetectorLedger>,
    journal: Journal,
    hands: DetectionBatch,
    gate: Option<Receiver<()>>,
    init_delay: Duration,
    detect_fails: bool,
}

impl LandmarkService for FakeService {
    fn configure(&mut self, _options: &DetectorOptions) -> Result<()> {
        Ok(())
    }

    fn initialize(&mut self) -> Result<()> {
        thread::sleep(self.init_delay);
        Ok(())
    }

    fn detect(&mut self, _frame: &Frame) -> Result<DetectionBatch> {
        self.ledger.detected.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _ = gate.recv_timeout(WAIT);
        }
        if self.detect_fails {
            return Err(anyhow!("inference backend crashed"));
        }
        Ok(self.hands.clone())
    }
}

impl Drop for FakeService {
    fn drop(&mut self) {
        self.ledger.live.fetch_sub(1, Ordering::SeqCst);
        note(&self.journal, "detector-dispose");
    }
}

struct FakeFactory {
    ledger: Arc<DetectorLedger>,
    journal: Journal,
    hands: DetectionBatch,
    gate: Option<Receiver<()>>,
    init_delay: Duration,
    detect_fails: bool,
    fail: bool,
}

impl LandmarkServiceFactory for FakeFactory {
    fn create(&self) -> Result<Box<dyn LandmarkService>> {
        if self.fail {
            return Err(anyhow!("no inference runtime"));
        }
        let live = self.ledger.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.ledger.max_live.fetch_max(live, Ordering::SeqCst);
        note(&self.journal, "detector-create");
        Ok(Box::new(FakeService {
            ledger: self.ledger.clone(),
            journal: self.journal.clone(),
            hands: self.hands.clone(),
            gate: self.gate.clone(),
            init_delay: self.init_delay,
            detect_fails: self.detect_fails,
        }))
    }
}

struct Rig {
    cameras: usize,
    stable_ids: bool,
    hands: DetectionBatch,
    gated: bool,
    init_delay: Duration,
    detect_fails: bool,
    factory_fails: bool,
    config: AppConfig,
}

impl Rig {
    fn new(cameras: usize) -> Self {
        let mut config = AppConfig::default();
        config.detector.quiescence_ms = 0;
        Self {
            cameras,
            stable_ids: true,
            hands: DetectionBatch::empty(),
            gated: false,
            init_delay: Duration::ZERO,
            detect_fails: false,
            factory_fails: false,
            config,
        }
    }

    fn build(self) -> Harness {
        let journal: Journal = Arc::default();
        let camera_ledger = Arc::new(Mutex::new(CameraLedger::default()));
        let detector_ledger = Arc::new(DetectorLedger::default());
        let deny = Arc::new(AtomicBool::new(false));
        let (gate_tx, gate_rx) = unbounded();

        let backend = FakeCamera {
            devices: (0..self.cameras)
                .map(|i| CameraDevice {
                    id: format!("cam-{i}"),
                    label: format!("Camera {i}"),
                })
                .collect(),
            stable_ids: self.stable_ids,
            deny: deny.clone(),
            ledger: camera_ledger.clone(),
            journal: journal.clone(),
        };
        let factory = FakeFactory {
            ledger: detector_ledger.clone(),
            journal: journal.clone(),
            hands: self.hands,
            gate: self.gated.then_some(gate_rx),
            init_delay: self.init_delay,
            detect_fails: self.detect_fails,
            fail: self.factory_fails,
        };

        Harness {
            gate: gate_tx,
            controller: SessionController::new(self.config, Box::new(backend), Arc::new(factory)),
            journal,
            cameras: camera_ledger,
            detectors: detector_ledger,
            deny,
        }
    }
}

// `gate` is declared first so it drops before the controller joins workers.
struct Harness {
    gate: Sender<()>,
    controller: SessionController,
    journal: Journal,
    cameras: Arc<Mutex<CameraLedger>>,
    detectors: Arc<DetectorLedger>,
    deny: Arc<AtomicBool>,
}

impl Harness {
    fn pump_until(&mut self, mut done: impl FnMut(&SessionController) -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            self.controller.pump();
            if done(&self.controller) {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn start_active(&mut self) {
        self.controller.start();
        assert!(
            self.pump_until(|c| *c.state() == SessionState::Active),
            "session never became active: {:?}",
            self.controller.state()
        );
    }

    /// Push a frame through the newest stream. `marker` lands in the red
    /// channel of every pixel so outputs can be traced back to their source.
    fn push_frame(&self, marker: u8) -> bool {
        let ledger = self.cameras.lock().expect("ledger");
        let sink = ledger.sinks.last().expect("no stream opened");
        sink.push(solid_frame(marker))
    }

    fn push_frame_to(&self, stream: usize, marker: u8) -> bool {
        let ledger = self.cameras.lock().expect("ledger");
        ledger.sinks[stream].push(solid_frame(marker))
    }

    fn live_detectors(&self) -> usize {
        self.detectors.live.load(Ordering::SeqCst)
    }

    /// Detector workers exit on their own after a stop.
    fn wait_for_detectors_released(&self) -> bool {
        let deadline = Instant::now() + WAIT;
        while self.live_detectors() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }
        true
    }

    fn live_cameras(&self) -> usize {
        self.cameras.lock().expect("ledger").live
    }

    fn max_live_cameras(&self) -> usize {
        self.cameras.lock().expect("ledger").max_live
    }

    fn output_number(&self) -> u64 {
        self.controller.output().map_or(0, |out| out.frame_number)
    }

    /// Feed frames until an output newer than `after` appears.
    fn render_next(&mut self, marker: u8, after: u64) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            self.push_frame(marker);
            self.controller.pump();
            if self.output_number() > after {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }
}

fn solid_frame(marker: u8) -> Frame {
    let pixels = (FRAME_SIZE * FRAME_SIZE) as usize;
    let rgba = [marker, 0, 0, 255].repeat(pixels);
    Frame::new(rgba, FRAME_SIZE, FRAME_SIZE)
}

fn open_hand() -> HandLandmarkSet {
    let mut points = vec![LandmarkPoint::new(0.5, 0.9, 0.0); NUM_LANDMARKS];
    for (tip, x, y) in [
        (4, 0.2, 0.4),
        (8, 0.35, 0.3),
        (12, 0.5, 0.25),
        (16, 0.65, 0.3),
        (20, 0.8, 0.4),
    ] {
        points[tip] = LandmarkPoint::new(x, y, 0.0);
        points[tip - 1] = LandmarkPoint::new(x, y + 0.1, 0.0);
    }
    HandLandmarkSet::new(points, Handedness::Right)
}

#[test]
fn startup_opens_camera_before_creating_detector() {
    let mut h = Rig::new(1).build();
    assert_eq!(*h.controller.state(), SessionState::Idle);

    h.start_active();

    let log = entries(&h.journal);
    let open = log.iter().position(|e| e == "camera-open cam-0");
    let create = log.iter().position(|e| e == "detector-create");
    assert!(open.is_some() && create.is_some(), "{log:?}");
    assert!(open < create, "{log:?}");
    assert_eq!(h.controller.camera_index(), 0);
    assert_eq!(
        h.controller.active_camera().map(|d| d.id.as_str()),
        Some("cam-0")
    );
}

#[test]
fn camera_becomes_ready_with_the_first_frame() {
    let mut h = Rig::new(1).build();
    h.start_active();
    assert!(!h.controller.is_camera_ready());

    assert!(h.render_next(10, 0));
    assert!(h.controller.is_camera_ready());
}

#[test]
fn output_frame_numbers_strictly_increase() {
    let mut h = Rig::new(1).build();
    h.start_active();

    let mut seen = Vec::new();
    for marker in 1..=5u8 {
        let after = h.output_number();
        assert!(h.render_next(marker, after));
        seen.push(h.output_number());
    }
    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]), "{seen:?}");
}

#[test]
fn frames_are_dropped_while_a_detection_is_in_flight() {
    let mut rig = Rig::new(1);
    rig.gated = true;
    let mut h = rig.build();
    h.start_active();

    let deadline = Instant::now() + WAIT;
    while h.detectors.detected.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        h.push_frame(1);
        h.controller.pump();
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(h.detectors.detected.load(Ordering::SeqCst), 1);

    for marker in 2..10u8 {
        h.push_frame(marker);
        h.controller.pump();
    }
    assert_eq!(h.detectors.detected.load(Ordering::SeqCst), 1);
    assert_eq!(h.output_number(), 0);

    h.gate.send(()).expect("gate");
    assert!(h.pump_until(|c| c.output().is_some_and(|out| out.frame_number == 1)));
}

#[test]
fn switching_releases_everything_before_reopening() {
    let mut h = Rig::new(2).build();
    h.start_active();

    assert!(h.controller.cycle_camera());
    assert_eq!(*h.controller.state(), SessionState::Switching);
    assert!(h.pump_until(|c| *c.state() == SessionState::Active));

    let log = entries(&h.journal);
    let stop_old = log.iter().position(|e| e == "camera-stop cam-0");
    let dispose_old = log.iter().position(|e| e == "detector-dispose");
    let open_new = log.iter().position(|e| e == "camera-open cam-1");
    assert!(stop_old.is_some() && dispose_old.is_some() && open_new.is_some());
    assert!(dispose_old < open_new, "{log:?}");
    assert!(stop_old < open_new, "{log:?}");

    assert_eq!(h.max_live_cameras(), 1);
    assert_eq!(h.detectors.max_live.load(Ordering::SeqCst), 1);
    assert_eq!(h.controller.camera_index(), 1);
}

#[test]
fn cycling_through_every_camera_returns_to_the_first() {
    let mut h = Rig::new(3).build();
    h.start_active();

    for expected in [1, 2, 0] {
        assert!(h.controller.cycle_camera());
        assert!(h.pump_until(|c| *c.state() == SessionState::Active));
        assert_eq!(h.controller.camera_index(), expected);
    }
    assert_eq!(h.max_live_cameras(), 1);
    assert_eq!(h.live_cameras(), 1);
}

#[test]
fn cycling_outside_active_does_nothing() {
    let mut h = Rig::new(2).build();
    assert!(!h.controller.cycle_camera());
    assert_eq!(*h.controller.state(), SessionState::Idle);
    assert_eq!(h.controller.camera_index(), 0);
    assert!(entries(&h.journal).is_empty());
}

#[test]
fn frames_from_a_replaced_camera_never_reach_the_output() {
    let mut h = Rig::new(2).build();
    h.start_active();
    assert!(h.render_next(1, 0));

    assert!(h.controller.cycle_camera());
    assert!(h.pump_until(|c| *c.state() == SessionState::Active));

    for _ in 0..20 {
        h.push_frame_to(0, 1);
        h.controller.pump();
    }
    let before = h.output_number();
    assert!(h.render_next(2, before));

    let out = h.controller.output().expect("output");
    assert_eq!(out.rgba[0], 2);
}

#[test]
fn stopped_detector_results_are_discarded() {
    let mut rig = Rig::new(2);
    rig.gated = true;
    let mut h = rig.build();
    h.start_active();

    let deadline = Instant::now() + WAIT;
    while h.detectors.detected.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        h.push_frame(1);
        h.controller.pump();
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(h.detectors.detected.load(Ordering::SeqCst), 1);

    // Unblock the pending detection while the switch tears the detector down.
    let gate = h.gate.clone();
    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        let _ = gate.send(());
    });
    assert!(h.controller.cycle_camera());
    releaser.join().expect("releaser");

    for _ in 0..20 {
        h.controller.pump();
    }
    assert_eq!(h.output_number(), 0);
}

#[test]
fn denied_permission_fails_and_retry_recovers() {
    let mut rig = Rig::new(1);
    rig.stable_ids = false;
    let mut h = rig.build();
    h.deny.store(true, Ordering::SeqCst);

    h.controller.start();
    assert_eq!(
        *h.controller.state(),
        SessionState::Error(SessionError::PermissionDenied)
    );
    assert_eq!(
        h.controller.state().error().map(SessionError::user_message),
        Some("Please grant camera permissions and try again")
    );
    assert_eq!(h.live_cameras(), 0);

    h.deny.store(false, Ordering::SeqCst);
    h.controller.retry();
    assert!(h.pump_until(|c| *c.state() == SessionState::Active));
    let permission_requests = entries(&h.journal)
        .iter()
        .filter(|e| *e == "camera-permission")
        .count();
    assert_eq!(permission_requests, 2);
}

#[test]
fn no_camera_is_a_device_error() {
    let mut h = Rig::new(0).build();
    h.controller.start();
    assert!(matches!(
        h.controller.state(),
        SessionState::Error(SessionError::DeviceUnavailable(_))
    ));
    assert_eq!(h.detectors.live.load(Ordering::SeqCst), 0);
}

#[test]
fn detector_init_failure_releases_the_camera() {
    let mut rig = Rig::new(1);
    rig.factory_fails = true;
    let mut h = rig.build();

    h.controller.start();
    assert!(h.pump_until(|c| matches!(c.state(), SessionState::Error(_))));
    assert!(matches!(
        h.controller.state(),
        SessionState::Error(SessionError::DetectorInitFailure(_))
    ));
    assert_eq!(h.live_cameras(), 0);
}

#[test]
fn stuck_detector_startup_times_out_without_blocking_pump() {
    let mut rig = Rig::new(1);
    rig.init_delay = Duration::from_secs(2);
    rig.config.detector.init_timeout_ms = 50;
    rig.config.detector.shutdown_wait_ms = 10;
    let mut h = rig.build();

    h.controller.start();
    let started = Instant::now();
    let mut longest_pump = Duration::ZERO;
    while !matches!(h.controller.state(), SessionState::Error(_)) && started.elapsed() < WAIT {
        let pump_start = Instant::now();
        h.controller.pump();
        longest_pump = longest_pump.max(pump_start.elapsed());
        thread::sleep(Duration::from_millis(2));
    }

    assert!(
        matches!(
            h.controller.state(),
            SessionState::Error(SessionError::DetectorInitFailure(_))
        ),
        "{:?}",
        h.controller.state()
    );
    assert!(longest_pump < Duration::from_millis(500), "pump took {longest_pump:?}");
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(h.live_cameras(), 0);

    // The stuck instance has not exited yet, so a retry must not add another.
    h.controller.retry();
    assert!(matches!(
        h.controller.state(),
        SessionState::Error(SessionError::DetectorInitFailure(_))
    ));
    assert!(h.detectors.max_live.load(Ordering::SeqCst) <= 1);
    assert_eq!(h.live_cameras(), 0);
}

#[test]
fn capture_failure_after_start_ends_the_session() {
    let mut h = Rig::new(1).build();
    h.start_active();

    h.cameras
        .lock()
        .expect("ledger")
        .sinks
        .last()
        .expect("sink")
        .report_failure("camera unplugged");

    assert!(h.pump_until(|c| matches!(c.state(), SessionState::Error(_))));
    match h.controller.state() {
        SessionState::Error(SessionError::DeviceUnavailable(reason)) => {
            assert!(reason.contains("unplugged"))
        }
        other => panic!("expected device error, got {other:?}"),
    }
    assert_eq!(h.live_cameras(), 0);
    assert!(h.wait_for_detectors_released());
}

#[test]
fn failed_detections_still_render_the_video() {
    let mut rig = Rig::new(1);
    rig.detect_fails = true;
    rig.hands = DetectionBatch::new(vec![open_hand()]);
    let mut h = rig.build();
    assert!(h.pump_until(|c| *c.sprite_status() == SpriteStatus::Ready));
    h.start_active();

    assert!(h.render_next(7, 0));
    let first = h.output_number();
    assert!(h.render_next(8, first));

    assert_eq!(*h.controller.state(), SessionState::Active);
    assert!(h.detectors.detected.load(Ordering::SeqCst) >= 2);
    let out = h.controller.output().expect("output");
    assert!(out.rgba.chunks_exact(4).all(|px| px == [8, 0, 0, 255]));
}

#[test]
fn teardown_is_idempotent() {
    let mut h = Rig::new(1).build();
    h.start_active();

    h.controller.teardown();
    h.controller.teardown();

    assert_eq!(*h.controller.state(), SessionState::Idle);
    assert_eq!(h.live_cameras(), 0);
    assert!(h.wait_for_detectors_released());
    let stops = entries(&h.journal)
        .iter()
        .filter(|e| e.starts_with("camera-stop"))
        .count();
    assert_eq!(stops, 1);
}

#[test]
fn missing_sprite_reports_failure_without_stopping_the_session() {
    let mut rig = Rig::new(1);
    rig.config.designs.push(CustomDesign {
        name: "Missing".into(),
        image: "does/not/exist.png".into(),
    });
    let mut h = rig.build();
    h.start_active();

    assert!(h.controller.select_design(DesignId(100)));
    assert!(h.pump_until(|c| !matches!(c.sprite_status(), SpriteStatus::Loading)));
    match h.controller.sprite_status() {
        SpriteStatus::Failed(err) => {
            assert_eq!(err.user_message(), "Failed to load nail image")
        }
        other => panic!("expected failure, got {other:?}"),
    }

    assert_eq!(*h.controller.state(), SessionState::Active);
    assert!(h.render_next(3, 0));
}

#[test]
fn unknown_designs_are_rejected() {
    let mut h = Rig::new(1).build();
    let before = h.controller.selected_design();
    assert!(!h.controller.select_design(DesignId(999)));
    assert_eq!(h.controller.selected_design(), before);
}

#[test]
fn detected_hands_get_nails_drawn() {
    let mut rig = Rig::new(1);
    rig.hands = DetectionBatch::new(vec![open_hand()]);
    let mut h = rig.build();
    assert!(h.pump_until(|c| *c.sprite_status() == SpriteStatus::Ready));
    h.start_active();

    assert!(h.render_next(0, 0));
    let out = h.controller.output().expect("output");
    let painted = out.rgba.chunks_exact(4).filter(|px| px[0] > 0).count();
    assert!(painted > 0);
}

#[test]
fn sprite_size_is_clamped() {
    let mut h = Rig::new(1).build();
    assert_eq!(h.controller.set_sprite_size(500.0), 96.0);
    assert_eq!(h.controller.set_sprite_size(1.0), 24.0);
    assert_eq!(h.controller.sprite_size(), 24.0);
}
