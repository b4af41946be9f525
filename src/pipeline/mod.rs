pub mod camera;
pub mod compositor;
pub mod detector;
#[cfg(feature = "camera-nokhwa")]
pub mod nokhwa_backend;
pub mod rgba_converter;
pub mod skeleton;

// Re-exports for convenience
pub use camera::{
    CameraDevice, CaptureBackend, CaptureSession, DeviceSelector, FrameSink, FrameSource,
    MediaStream, next_camera_index,
};
pub use compositor::{CompositedFrame, CompositorOptions, render};
pub use detector::{
    DetectorEvent, DetectorOptions, LandmarkService, LandmarkServiceFactory, PoseDetector,
    SubmitOutcome,
};
#[cfg(feature = "camera-nokhwa")]
pub use nokhwa_backend::NokhwaBackend;
