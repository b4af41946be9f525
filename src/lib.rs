//! Live nail art try-on: camera capture, hand landmark detection, fingertip
//! geometry and sprite compositing, orchestrated by a session state machine.

pub mod config;
pub mod designs;
pub mod error;
pub mod geometry;
pub mod landmarker;
pub mod model_download;
pub mod pipeline;
pub mod session;
pub mod types;

pub use config::AppConfig;
pub use error::{CaptureError, SessionError};
pub use session::{SessionController, SessionState, SessionView, SpriteStatus};
