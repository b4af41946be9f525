//! Capture session: owns the one live camera stream.

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};

use crate::{config::CaptureConstraints, error::CaptureError, types::Frame};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraDevice {
    pub id: String,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceSelector {
    Default,
    Index(usize),
    Id(String),
}

/// A frame tagged with the generation of the stream that produced it.
#[derive(Clone, Debug)]
pub struct SourceFrame {
    pub generation: u64,
    pub frame: Frame,
}

/// Where a capture stream pushes its frames. Latest wins: when the consumer
/// has not picked up the previous frame yet, the new one is dropped.
#[derive(Clone, Debug)]
pub struct FrameSink {
    generation: u64,
    tx: Sender<SourceFrame>,
    failure_tx: Sender<(u64, String)>,
}

impl FrameSink {
    pub fn new(
        generation: u64,
        tx: Sender<SourceFrame>,
        failure_tx: Sender<(u64, String)>,
    ) -> Self {
        Self {
            generation,
            tx,
            failure_tx,
        }
    }

    /// The stream died and will not deliver more frames.
    pub fn report_failure(&self, reason: impl Into<String>) {
        let _ = self.failure_tx.send((self.generation, reason.into()));
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the receiving side is gone.
    pub fn push(&self, frame: Frame) -> bool {
        match self.tx.try_send(SourceFrame {
            generation: self.generation,
            frame,
        }) {
            Ok(()) | Err(crossbeam_channel::TrySendError::Full(_)) => true,
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => false,
        }
    }
}

/// A running camera stream.
pub trait MediaStream: Send {
    /// Stop every underlying track. Calling it again is a no-op.
    fn stop(&mut self);

    fn resolution(&self) -> Option<(u32, u32)>;
}

/// Platform camera access.
pub trait CaptureBackend: Send {
    /// Coarse permission request made before enumeration on platforms whose
    /// device ids are only meaningful after access was granted.
    fn request_permission(&mut self) -> Result<(), CaptureError>;

    fn enumerate_devices(&mut self) -> Result<Vec<CameraDevice>, CaptureError>;

    fn open_stream(
        &mut self,
        device: &CameraDevice,
        constraints: &CaptureConstraints,
        sink: FrameSink,
    ) -> Result<Box<dyn MediaStream>, CaptureError>;

    fn has_stable_device_ids(&self) -> bool {
        true
    }
}

/// Handle to the live feed.
pub struct FrameSource {
    pub device: CameraDevice,
    pub device_index: usize,
    pub generation: u64,
    pub width: u32,
    pub height: u32,
    ready: bool,
    stream: Box<dyn MediaStream>,
}

impl FrameSource {
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Called when the first frame of this stream has arrived.
    pub fn mark_ready(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.ready = true;
    }
}

impl std::fmt::Debug for FrameSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSource")
            .field("device", &self.device)
            .field("device_index", &self.device_index)
            .field("generation", &self.generation)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("ready", &self.ready)
            .finish()
    }
}

/// Next camera index when cycling; `None` when there is nothing to cycle.
pub fn next_camera_index(current: usize, device_count: usize) -> Option<usize> {
    if device_count == 0 {
        return None;
    }
    Some((current + 1) % device_count)
}

pub struct CaptureSession {
    backend: Box<dyn CaptureBackend>,
    source: Option<FrameSource>,
    devices: Vec<CameraDevice>,
    frame_tx: Sender<SourceFrame>,
    frame_rx: Receiver<SourceFrame>,
    failure_tx: Sender<(u64, String)>,
    failure_rx: Receiver<(u64, String)>,
    generation: u64,
}

impl CaptureSession {
    pub fn new(backend: Box<dyn CaptureBackend>) -> Self {
        let (frame_tx, frame_rx) = bounded(1);
        let (failure_tx, failure_rx) = unbounded();
        Self {
            backend,
            source: None,
            devices: Vec::new(),
            frame_tx,
            frame_rx,
            failure_tx,
            failure_rx,
            generation: 0,
        }
    }

    /// Open a camera. Any previously open stream is fully closed first, and
    /// nothing stays open when this fails.
    pub fn open(
        &mut self,
        selector: &DeviceSelector,
        constraints: &CaptureConstraints,
    ) -> Result<&FrameSource, CaptureError> {
        self.close();

        if !self.backend.has_stable_device_ids() {
            self.backend.request_permission()?;
        }
        let devices = self.enumerate()?;
        let (device_index, device) = resolve_device(&devices, selector)?;

        self.generation += 1;
        let sink = FrameSink::new(
            self.generation,
            self.frame_tx.clone(),
            self.failure_tx.clone(),
        );
        let mut stream = self.backend.open_stream(&device, constraints, sink)?;

        let (width, height) = stream.resolution().unwrap_or((0, 0));
        if stream.resolution().is_some() && !constraints.accepts(width, height) {
            stream.stop();
            return Err(CaptureError::DeviceUnavailable(format!(
                "{} negotiated {width}x{height}, outside {}x{}..{}x{}",
                device.label,
                constraints.min.width,
                constraints.min.height,
                constraints.max.width,
                constraints.max.height
            )));
        }

        log::info!(
            "camera {} opened ({width}x{height}, generation {})",
            device.label,
            self.generation
        );
        Ok(self.source.insert(FrameSource {
            device,
            device_index,
            generation: self.generation,
            width,
            height,
            ready: false,
            stream,
        }))
    }

    /// Stop the live stream, if any. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.stream.stop();
            log::info!("camera {} closed", source.device.label);
        }
        // Anything still queued belongs to the stream that just went away.
        while self.frame_rx.try_recv().is_ok() {}
        while self.failure_rx.try_recv().is_ok() {}
    }

    /// Refresh and return the known device list.
    pub fn enumerate(&mut self) -> Result<Vec<CameraDevice>, CaptureError> {
        self.devices = self.backend.enumerate_devices()?;
        Ok(self.devices.clone())
    }

    pub fn devices(&self) -> &[CameraDevice] {
        &self.devices
    }

    pub fn source(&self) -> Option<&FrameSource> {
        self.source.as_ref()
    }

    pub fn source_mut(&mut self) -> Option<&mut FrameSource> {
        self.source.as_mut()
    }

    pub fn is_open(&self) -> bool {
        self.source.is_some()
    }

    /// Latest frame of the live stream, discarding frames of closed streams.
    pub fn latest_frame(&mut self) -> Option<Frame> {
        let live = self.source.as_ref()?.generation;
        let mut latest = None;
        while let Ok(tagged) = self.frame_rx.try_recv() {
            if tagged.generation == live {
                latest = Some(tagged.frame);
            }
        }
        latest
    }

    /// Failure reported by the live stream since the last call, if any.
    pub fn take_failure(&mut self) -> Option<String> {
        let live = self.source.as_ref()?.generation;
        let mut failure = None;
        while let Ok((generation, reason)) = self.failure_rx.try_recv() {
            if generation == live {
                failure = Some(reason);
            }
        }
        failure
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn resolve_device(
    devices: &[CameraDevice],
    selector: &DeviceSelector,
) -> Result<(usize, CameraDevice), CaptureError> {
    if devices.is_empty() {
        return Err(CaptureError::DeviceUnavailable(
            "no camera found".to_string(),
        ));
    }

    let found = match selector {
        DeviceSelector::Default => Some(0),
        // An index past the end falls back to the first camera.
        DeviceSelector::Index(idx) => Some(if *idx < devices.len() { *idx } else { 0 }),
        DeviceSelector::Id(id) => devices.iter().position(|device| &device.id == id),
    };

    found
        .map(|idx| (idx, devices[idx].clone()))
        .ok_or_else(|| match selector {
            DeviceSelector::Id(id) => {
                CaptureError::DeviceUnavailable(format!("camera {id} not found"))
            }
            _ => CaptureError::DeviceUnavailable("camera not found".to_string()),
        })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Default)]
    struct Ledger {
        live: usize,
        max_live: usize,
        opened: usize,
        stopped: usize,
        permission_requests: usize,
    }

    struct FakeStream {
        ledger: Arc<Mutex<Ledger>>,
        resolution: (u32, u32),
        stopped: bool,
    }

    impl MediaStream for FakeStream {
        fn stop(&mut self) {
            if self.stopped {
                return;
            }
            self.stopped = true;
            let mut ledger = self.ledger.lock().expect("ledger");
            ledger.live -= 1;
            ledger.stopped += 1;
        }

        fn resolution(&self) -> Option<(u32, u32)> {
            Some(self.resolution)
        }
    }

    struct FakeBackend {
        ledger: Arc<Mutex<Ledger>>,
        devices: Vec<CameraDevice>,
        stable_ids: bool,
        deny: bool,
        resolution: (u32, u32),
    }

    impl FakeBackend {
        fn new(count: usize) -> (Self, Arc<Mutex<Ledger>>) {
            let ledger = Arc::new(Mutex::new(Ledger::default()));
            let devices = (0..count)
                .map(|i| CameraDevice {
                    id: format!("cam-{i}"),
                    label: format!("Camera {i}"),
                })
                .collect();
            (
                Self {
                    ledger: ledger.clone(),
                    devices,
                    stable_ids: true,
                    deny: false,
                    resolution: (1280, 720),
                },
                ledger,
            )
        }
    }

    impl CaptureBackend for FakeBackend {
        fn request_permission(&mut self) -> Result<(), CaptureError> {
            self.ledger.lock().expect("ledger").permission_requests += 1;
            if self.deny {
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
            _device: &CameraDevice,
            _constraints: &CaptureConstraints,
            _sink: FrameSink,
        ) -> Result<Box<dyn MediaStream>, CaptureError> {
            let mut ledger = self.ledger.lock().expect("ledger");
            ledger.live += 1;
            ledger.opened += 1;
            ledger.max_live = ledger.max_live.max(ledger.live);
            Ok(Box::new(FakeStream {
                ledger: self.ledger.clone(),
                resolution: self.resolution,
                stopped: false,
            }))
        }

        fn has_stable_device_ids(&self) -> bool {
            self.stable_ids
        }
    }

    #[test]
    fn reopening_closes_the_previous_stream_first() {
        let (backend, ledger) = FakeBackend::new(2);
        let mut session = CaptureSession::new(Box::new(backend));
        let constraints = CaptureConstraints::default();

        session
            .open(&DeviceSelector::Index(0), &constraints)
            .expect("first open");
        let second = session
            .open(&DeviceSelector::Index(1), &constraints)
            .expect("second open");
        assert_eq!(second.device.id, "cam-1");

        let ledger = ledger.lock().expect("ledger");
        assert_eq!(ledger.opened, 2);
        assert_eq!(ledger.max_live, 1);
        assert_eq!(ledger.live, 1);
    }

    #[test]
    fn close_is_idempotent() {
        let (backend, ledger) = FakeBackend::new(1);
        let mut session = CaptureSession::new(Box::new(backend));
        session.close();
        session
            .open(&DeviceSelector::Default, &CaptureConstraints::default())
            .expect("open");
        session.close();
        session.close();
        assert!(!session.is_open());
        assert_eq!(ledger.lock().expect("ledger").stopped, 1);
    }

    #[test]
    fn no_devices_is_device_unavailable() {
        let (backend, _) = FakeBackend::new(0);
        let mut session = CaptureSession::new(Box::new(backend));
        let err = session
            .open(&DeviceSelector::Default, &CaptureConstraints::default())
            .expect_err("no camera");
        assert!(matches!(err, CaptureError::DeviceUnavailable(_)));
    }

    #[test]
    fn unknown_id_is_device_unavailable() {
        let (backend, _) = FakeBackend::new(1);
        let mut session = CaptureSession::new(Box::new(backend));
        let err = session
            .open(
                &DeviceSelector::Id("nope".into()),
                &CaptureConstraints::default(),
            )
            .expect_err("unknown id");
        assert!(matches!(err, CaptureError::DeviceUnavailable(_)));
    }

    #[test]
    fn out_of_range_index_falls_back_to_first_camera() {
        let (backend, _) = FakeBackend::new(2);
        let mut session = CaptureSession::new(Box::new(backend));
        let source = session
            .open(&DeviceSelector::Index(5), &CaptureConstraints::default())
            .expect("open");
        assert_eq!(source.device_index, 0);
    }

    #[test]
    fn unstable_ids_request_permission_before_enumerating() {
        let (mut backend, ledger) = FakeBackend::new(1);
        backend.stable_ids = false;
        backend.deny = true;
        let mut session = CaptureSession::new(Box::new(backend));
        let err = session
            .open(&DeviceSelector::Default, &CaptureConstraints::default())
            .expect_err("denied");
        assert_eq!(err, CaptureError::PermissionDenied);
        let ledger = ledger.lock().expect("ledger");
        assert_eq!(ledger.permission_requests, 1);
        assert_eq!(ledger.opened, 0);
    }

    #[test]
    fn resolution_outside_constraints_is_rejected_and_released() {
        let (mut backend, ledger) = FakeBackend::new(1);
        backend.resolution = (320, 240);
        let mut session = CaptureSession::new(Box::new(backend));
        let err = session
            .open(&DeviceSelector::Default, &CaptureConstraints::default())
            .expect_err("too small");
        assert!(matches!(err, CaptureError::DeviceUnavailable(_)));
        assert!(!session.is_open());
        assert_eq!(ledger.lock().expect("ledger").live, 0);
    }

    #[test]
    fn cycling_wraps_and_ignores_empty_lists() {
        assert_eq!(next_camera_index(0, 0), None);
        let mut idx = 1;
        for _ in 0..3 {
            idx = next_camera_index(idx, 3).expect("devices");
        }
        assert_eq!(idx, 1);
    }

    #[test]
    fn frames_from_closed_streams_are_discarded() {
        let (backend, _) = FakeBackend::new(1);
        let mut session = CaptureSession::new(Box::new(backend));
        session
            .open(&DeviceSelector::Default, &CaptureConstraints::default())
            .expect("open");
        let live = session.source().expect("source").generation;

        let sink = |generation| {
            FrameSink::new(
                generation,
                session.frame_tx.clone(),
                session.failure_tx.clone(),
            )
        };
        let stale = sink(live - 1);
        let fresh = sink(live);

        assert!(stale.push(Frame::new(vec![0; 4], 1, 1)));
        stale.report_failure("unplugged");
        assert!(session.latest_frame().is_none());
        assert!(session.take_failure().is_none());

        fresh.push(Frame::new(vec![0; 4], 1, 1));
        fresh.report_failure("unplugged");
        assert!(session.latest_frame().is_some());
        assert_eq!(session.take_failure().as_deref(), Some("unplugged"));
    }
}
