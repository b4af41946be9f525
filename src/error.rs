use thiserror::Error;

/// Failures at the capture boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("camera access was denied")]
    PermissionDenied,

    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Everything that can go wrong in a try-on session.
///
/// Only startup and camera-switch failures put the session into its error
/// state; per-frame failures are logged and absorbed where they happen.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("camera access was denied")]
    PermissionDenied,

    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("hand detector failed to initialize: {0}")]
    DetectorInitFailure(String),

    #[error("hand detection failed for a frame: {0}")]
    FrameSubmissionFailure(String),

    #[error("failed to load nail sprite: {0}")]
    SpriteLoadFailure(String),
}

impl SessionError {
    pub fn user_message(&self) -> &'static str {
        match self {
            SessionError::PermissionDenied => "Please grant camera permissions and try again",
            SessionError::SpriteLoadFailure(_) => "Failed to load nail image",
            SessionError::DeviceUnavailable(_)
            | SessionError::DetectorInitFailure(_)
            | SessionError::FrameSubmissionFailure(_) => {
                "Failed to initialize camera. Please try again."
            }
        }
    }

    pub fn is_permission_error(&self) -> bool {
        matches!(self, SessionError::PermissionDenied)
    }
}

impl From<CaptureError> for SessionError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::PermissionDenied => SessionError::PermissionDenied,
            CaptureError::DeviceUnavailable(reason) => SessionError::DeviceUnavailable(reason),
        }
    }
}
