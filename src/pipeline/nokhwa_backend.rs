//! Native camera access through nokhwa.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Result, anyhow};
use crossbeam_channel::bounded;
use nokhwa::{
    Buffer, Camera, nokhwa_check, nokhwa_initialize,
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
        Resolution,
    },
};

use super::{
    camera::{CameraDevice, CaptureBackend, FrameSink, MediaStream},
    rgba_converter::{self, PixelLayout},
};
use crate::{config::CaptureConstraints, error::CaptureError};

// Built-in macOS cameras often reject YUYV even though nokhwa lists it.
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::MJPEG,
];

const PERMISSION_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_CONSECUTIVE_READ_FAILURES: u32 = 30;

fn requested_formats(constraints: &CaptureConstraints) -> [RequestedFormat<'static>; 3] {
    let ideal = CameraFormat::new(
        Resolution::new(constraints.ideal.width, constraints.ideal.height),
        FrameFormat::MJPEG,
        constraints.fps,
    );
    [
        RequestedFormat::with_formats(
            RequestedFormatType::Closest(ideal),
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::with_formats(
            RequestedFormatType::HighestFrameRate(constraints.fps),
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
    ]
}

fn layout_of(format: FrameFormat) -> PixelLayout {
    match format {
        FrameFormat::NV12 => PixelLayout::Nv12,
        FrameFormat::YUYV => PixelLayout::Yuyv,
        FrameFormat::MJPEG => PixelLayout::Mjpeg,
        FrameFormat::RAWRGB => PixelLayout::Rgb,
        FrameFormat::RAWBGR => PixelLayout::Bgr,
        FrameFormat::GRAY => PixelLayout::Gray,
    }
}

fn camera_index(device: &CameraDevice) -> CameraIndex {
    match device.id.parse::<u32>() {
        Ok(idx) => CameraIndex::Index(idx),
        Err(_) => CameraIndex::String(device.id.clone()),
    }
}

fn build_camera(index: &CameraIndex, constraints: &CaptureConstraints) -> Result<Camera> {
    let mut last_err = None;

    for requested in requested_formats(constraints) {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("no supported camera format")))
}

fn buffer_to_frame(buffer: &Buffer) -> Result<crate::types::Frame> {
    let resolution = buffer.resolution();
    rgba_converter::to_frame(
        layout_of(buffer.source_frame_format()),
        buffer.buffer(),
        resolution.width_x,
        resolution.height_y,
    )
}

#[derive(Debug, Default)]
pub struct NokhwaBackend;

impl NokhwaBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureBackend for NokhwaBackend {
    fn request_permission(&mut self) -> Result<(), CaptureError> {
        if nokhwa_check() {
            return Ok(());
        }

        let (tx, rx) = bounded(1);
        nokhwa_initialize(move |granted| {
            let _ = tx.send(granted);
        });
        match rx.recv_timeout(PERMISSION_TIMEOUT) {
            Ok(true) => Ok(()),
            Ok(false) | Err(_) => Err(CaptureError::PermissionDenied),
        }
    }

    fn enumerate_devices(&mut self) -> Result<Vec<CameraDevice>, CaptureError> {
        let cameras = query(ApiBackend::Auto)
            .map_err(|err| CaptureError::DeviceUnavailable(format!("camera query failed: {err}")))?;
        Ok(cameras
            .into_iter()
            .map(|info| CameraDevice {
                id: info.index().as_string(),
                label: info.human_name(),
            })
            .collect())
    }

    fn open_stream(
        &mut self,
        device: &CameraDevice,
        constraints: &CaptureConstraints,
        sink: FrameSink,
    ) -> Result<Box<dyn MediaStream>, CaptureError> {
        let index = camera_index(device);

        // Open once on the caller's thread so negotiation errors surface from open.
        let resolution = {
            let mut trial = build_camera(&index, constraints).map_err(|err| {
                CaptureError::DeviceUnavailable(format!("{}: {err:#}", device.label))
            })?;
            let resolution = trial.resolution();
            let _ = trial.stop_stream();
            (resolution.width_x, resolution.height_y)
        };

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let constraints = constraints.clone();
        let label = device.label.clone();

        let handle = thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || capture_loop(index, constraints, label, sink, stop_flag))
            .map_err(|err| CaptureError::DeviceUnavailable(format!("capture thread: {err}")))?;

        Ok(Box::new(NokhwaStream {
            stop,
            handle: Some(handle),
            resolution,
        }))
    }

    fn has_stable_device_ids(&self) -> bool {
        // AVFoundation only exposes real device ids after access was granted.
        !cfg!(target_os = "macos")
    }
}

fn capture_loop(
    index: CameraIndex,
    constraints: CaptureConstraints,
    label: String,
    sink: FrameSink,
    stop: Arc<AtomicBool>,
) {
    let mut camera = match build_camera(&index, &constraints) {
        Ok(camera) => camera,
        Err(err) => {
            log::error!("failed to reopen camera {label}: {err:?}");
            sink.report_failure(format!("{label}: {err:#}"));
            return;
        }
    };

    let mut failures = 0u32;
    while !stop.load(Ordering::Relaxed) {
        let read_start = Instant::now();
        let buffer = match camera.frame() {
            Ok(buffer) => buffer,
            Err(err) => {
                failures += 1;
                log::warn!(
                    "camera frame read failed (after {:?}): {err:?}",
                    read_start.elapsed()
                );
                if failures >= MAX_CONSECUTIVE_READ_FAILURES {
                    sink.report_failure(format!("{label} stopped delivering frames"));
                    break;
                }
                continue;
            }
        };
        failures = 0;

        let frame = match buffer_to_frame(&buffer) {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("failed to decode camera frame: {err:?}");
                continue;
            }
        };

        if !sink.push(frame) {
            break;
        }
    }

    let _ = camera.stop_stream();
    log::debug!("capture loop for {label} finished");
}

#[derive(Debug)]
pub struct NokhwaStream {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    resolution: (u32, u32),
}

impl MediaStream for NokhwaStream {
    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn resolution(&self) -> Option<(u32, u32)> {
        Some(self.resolution)
    }
}

impl Drop for NokhwaStream {
    fn drop(&mut self) {
        self.stop();
    }
}
