//! Pose detection adapter: owns one landmark service instance on a worker
//! thread and feeds it at most one frame at a time.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::{
    error::SessionError,
    types::{DetectionBatch, Frame, MAX_HANDS},
};

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Fixed detector configuration. Not user adjustable.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectorOptions {
    pub max_hands: usize,
    pub model_complexity: u8,
    pub min_detection_confidence: f32,
    pub min_tracking_confidence: f32,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            max_hands: MAX_HANDS,
            model_complexity: 1,
            min_detection_confidence: 0.5,
            min_tracking_confidence: 0.5,
        }
    }
}

/// An external hand landmark service. Dropping it releases the instance.
pub trait LandmarkService: Send {
    fn configure(&mut self, options: &DetectorOptions) -> Result<()>;

    fn initialize(&mut self) -> Result<()>;

    fn detect(&mut self, frame: &Frame) -> Result<DetectionBatch>;
}

pub trait LandmarkServiceFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn LandmarkService>>;
}

#[derive(Debug)]
pub enum DetectorEvent {
    Ready {
        generation: u64,
    },
    Failed {
        generation: u64,
        reason: String,
    },
    Detection {
        generation: u64,
        seq: u64,
        frame: Frame,
        result: Result<DetectionBatch, String>,
    },
}

impl DetectorEvent {
    pub fn generation(&self) -> u64 {
        match self {
            DetectorEvent::Ready { generation }
            | DetectorEvent::Failed { generation, .. }
            | DetectorEvent::Detection { generation, .. } => *generation,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted(u64),
    DroppedBusy,
    DroppedNotReady,
    Stopped,
}

/// Handle to a running detector worker.
pub struct PoseDetector {
    generation: u64,
    frame_tx: Option<Sender<(u64, Frame)>>,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    ready: bool,
    in_flight: Option<u64>,
    next_seq: u64,
    started_at: Instant,
}

impl PoseDetector {
    /// Spawn the worker. Creation, configuration and initialization of the
    /// service happen on the worker; completion arrives as an event.
    pub fn start(
        factory: Arc<dyn LandmarkServiceFactory>,
        options: DetectorOptions,
        quiescence: Duration,
        events: Sender<DetectorEvent>,
        generation: u64,
    ) -> Result<Self, SessionError> {
        let (frame_tx, frame_rx) = bounded(1);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = thread::Builder::new()
            .name(format!("pose-detector-{generation}"))
            .spawn(move || {
                run_worker(
                    factory, options, quiescence, frame_rx, events, stop_flag, generation,
                )
            })
            .map_err(|err| SessionError::DetectorInitFailure(format!("worker thread: {err}")))?;

        Ok(Self {
            generation,
            frame_tx: Some(frame_tx),
            stop,
            handle: Some(handle),
            ready: false,
            in_flight: None,
            next_seq: 0,
            started_at: Instant::now(),
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_stopped(&self) -> bool {
        self.frame_tx.is_none()
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Record the worker's ready signal. Signals for other handles are ignored.
    pub fn mark_ready(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.is_stopped() {
            return false;
        }
        self.ready = true;
        true
    }

    pub fn submit_frame(&mut self, frame: Frame) -> SubmitOutcome {
        let Some(frame_tx) = self.frame_tx.as_ref() else {
            return SubmitOutcome::Stopped;
        };
        if !self.ready {
            return SubmitOutcome::DroppedNotReady;
        }
        if let Some(pending) = self.in_flight {
            log::debug!("detector busy with frame {pending}, dropping new frame");
            return SubmitOutcome::DroppedBusy;
        }

        let seq = self.next_seq;
        match frame_tx.try_send((seq, frame)) {
            Ok(()) => {
                self.next_seq += 1;
                self.in_flight = Some(seq);
                SubmitOutcome::Submitted(seq)
            }
            Err(TrySendError::Full(_)) => SubmitOutcome::DroppedBusy,
            Err(TrySendError::Disconnected(_)) => SubmitOutcome::Stopped,
        }
    }

    /// Match a detection result against the outstanding submission. Returns
    /// false for results that belong to another handle or submission.
    pub fn accept_result(&mut self, generation: u64, seq: u64) -> bool {
        if generation != self.generation || self.is_stopped() || self.in_flight != Some(seq) {
            return false;
        }
        self.in_flight = None;
        true
    }

    /// Stop the handle without waiting for the worker. The worker releases
    /// the service once its current call returns and reports nothing after
    /// that. Safe to repeat.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if self.frame_tx.take().is_some() {
            log::info!("pose detector {} stopped", self.generation);
        }
        self.ready = false;
        self.in_flight = None;
    }

    /// The worker has exited and its service is gone.
    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .is_none_or(|handle| handle.is_finished())
    }

    /// Wait at most `timeout` for the worker to exit. Returns true once it has.
    pub fn join_timeout(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("pose detector {} worker panicked", self.generation);
            }
        }
        true
    }
}

impl Drop for PoseDetector {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for PoseDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoseDetector")
            .field("generation", &self.generation)
            .field("ready", &self.ready)
            .field("in_flight", &self.in_flight)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

fn create_service(
    factory: &dyn LandmarkServiceFactory,
    options: &DetectorOptions,
) -> Result<Box<dyn LandmarkService>> {
    let mut service = factory.create()?;
    service.configure(options)?;
    service.initialize()?;
    Ok(service)
}

fn run_worker(
    factory: Arc<dyn LandmarkServiceFactory>,
    options: DetectorOptions,
    quiescence: Duration,
    frame_rx: Receiver<(u64, Frame)>,
    events: Sender<DetectorEvent>,
    stop: Arc<AtomicBool>,
    generation: u64,
) {
    if !quiescence.is_zero() {
        thread::sleep(quiescence);
    }
    if stop.load(Ordering::SeqCst) {
        return;
    }

    let mut service = match create_service(factory.as_ref(), &options) {
        Ok(service) => service,
        Err(err) => {
            log::error!("hand detector failed to initialize: {err:#}");
            if !stop.load(Ordering::SeqCst) {
                let _ = events.send(DetectorEvent::Failed {
                    generation,
                    reason: format!("{err:#}"),
                });
            }
            return;
        }
    };

    if stop.load(Ordering::SeqCst) {
        return;
    }
    log::info!("pose detector {generation} ready");
    if events.send(DetectorEvent::Ready { generation }).is_err() {
        return;
    }

    while let Ok((seq, frame)) = frame_rx.recv() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let result = service.detect(&frame).map_err(|err| format!("{err:#}"));
        // A result finishing after stop belongs to nobody.
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let event = DetectorEvent::Detection {
            generation,
            seq,
            frame,
            result,
        };
        if events.send(event).is_err() {
            break;
        }
    }
}
