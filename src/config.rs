//! Application configuration: YAML file sections plus the fixed detector
//! settings that are deliberately not exposed to users.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    geometry::{GeometryConfig, PalmGate, SizingMode},
    pipeline::compositor::CompositorOptions,
};

pub const MIN_SPRITE_SIZE: f32 = 24.0;
pub const MAX_SPRITE_SIZE: f32 = 96.0;
pub const DEFAULT_SPRITE_SIZE: f32 = 64.0;

/// Clamp a requested sprite base size into the supported range.
pub fn clamp_sprite_size(requested: f32) -> f32 {
    if requested.is_nan() {
        return DEFAULT_SPRITE_SIZE;
    }
    requested.clamp(MIN_SPRITE_SIZE, MAX_SPRITE_SIZE)
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub capture: CaptureConstraints,
    pub detector: DetectorConfig,
    pub overlay: OverlayConfig,
    /// User supplied designs appended to the built-in catalog.
    pub designs: Vec<CustomDesign>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Resolution negotiation constraints for opening a camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConstraints {
    pub ideal: Resolution,
    pub min: Resolution,
    pub max: Resolution,
    pub fps: u32,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            ideal: Resolution::new(1280, 720),
            min: Resolution::new(640, 480),
            max: Resolution::new(1920, 1080),
            fps: 30,
        }
    }
}

impl CaptureConstraints {
    pub fn accepts(&self, width: u32, height: u32) -> bool {
        (self.min.width..=self.max.width).contains(&width)
            && (self.min.height..=self.max.height).contains(&height)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub model_dir: PathBuf,
    /// Upper bound on detector startup, model download included.
    pub init_timeout_ms: u64,
    /// Pause before a fresh detector instance is created.
    pub quiescence_ms: u64,
    /// How long a restart waits for the previous detector to exit.
    pub shutdown_wait_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            init_timeout_ms: 120_000,
            quiescence_ms: 100,
            shutdown_wait_ms: 2_000,
        }
    }
}

impl DetectorConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn quiescence(&self) -> Duration {
        Duration::from_millis(self.quiescence_ms)
    }

    pub fn shutdown_wait(&self) -> Duration {
        Duration::from_millis(self.shutdown_wait_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub default_design: String,
    pub sprite_size: f32,
    pub sizing: SizingMode,
    pub palm_gate: Option<PalmGate>,
    /// Shift of the sprite past the fingertip, as a fraction of its size.
    pub nail_bed_offset: f32,
    pub show_tip_markers: bool,
    pub show_skeleton: bool,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            default_design: "Basic".to_string(),
            sprite_size: DEFAULT_SPRITE_SIZE,
            sizing: SizingMode::default(),
            palm_gate: None,
            nail_bed_offset: 0.3125,
            show_tip_markers: false,
            show_skeleton: false,
        }
    }
}

impl OverlayConfig {
    pub fn geometry(&self) -> GeometryConfig {
        GeometryConfig {
            sizing: self.sizing,
            palm_gate: self.palm_gate,
        }
    }

    pub fn compositor(&self) -> CompositorOptions {
        CompositorOptions {
            nail_bed_offset: self.nail_bed_offset,
            show_tip_markers: self.show_tip_markers,
            show_skeleton: self.show_skeleton,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomDesign {
    pub name: String,
    pub image: PathBuf,
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let capture = &self.capture;
        if capture.min.width > capture.max.width || capture.min.height > capture.max.height {
            return Err(ConfigError::Invalid(
                "capture.min must not exceed capture.max".to_string(),
            ));
        }
        if !capture.accepts(capture.ideal.width, capture.ideal.height) {
            return Err(ConfigError::Invalid(
                "capture.ideal must lie between capture.min and capture.max".to_string(),
            ));
        }
        if !self.overlay.sprite_size.is_finite() {
            return Err(ConfigError::Invalid(
                "overlay.sprite_size must be a finite number".to_string(),
            ));
        }
        match self.overlay.sizing {
            SizingMode::FrameFraction { fraction } if !(fraction > 0.0) => {
                return Err(ConfigError::Invalid(
                    "overlay.sizing.fraction must be positive".to_string(),
                ));
            }
            SizingMode::FingerLength { multiplier } if !(multiplier > 0.0) => {
                return Err(ConfigError::Invalid(
                    "overlay.sizing.multiplier must be positive".to_string(),
                ));
            }
            _ => {}
        }
        if let Some(gate) = &self.overlay.palm_gate {
            if !gate.threshold.is_finite() {
                return Err(ConfigError::Invalid(
                    "overlay.palm_gate.threshold must be finite".to_string(),
                ));
            }
        }
        if !self.overlay.nail_bed_offset.is_finite() {
            return Err(ConfigError::Invalid(
                "overlay.nail_bed_offset must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sprite_size_is_clamped_to_range() {
        assert_eq!(clamp_sprite_size(200.0), 96.0);
        assert_eq!(clamp_sprite_size(2.0), 24.0);
        assert_eq!(clamp_sprite_size(50.0), 50.0);
        assert_eq!(clamp_sprite_size(f32::NAN), DEFAULT_SPRITE_SIZE);
    }

    #[test]
    fn defaults_validate() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capture.ideal, Resolution::new(1280, 720));
        assert_eq!(config.overlay.default_design, "Basic");
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = r#"
overlay:
  sprite_size: 48
  sizing:
    mode: frame_fraction
    fraction: 0.25
  palm_gate:
    threshold: 0.01
    mirrored_handedness: true
designs:
  - name: Chrome
    image: assets/nails/chrome.png
"#;
        let config = AppConfig::from_yaml(yaml).expect("yaml parses");
        assert_eq!(config.overlay.sprite_size, 48.0);
        assert_eq!(
            config.overlay.sizing,
            SizingMode::FrameFraction { fraction: 0.25 }
        );
        let gate = config.overlay.palm_gate.expect("gate configured");
        assert!(gate.mirrored_handedness);
        assert_eq!(config.designs.len(), 1);
        assert_eq!(config.capture, CaptureConstraints::default());
        assert_eq!(config.detector.quiescence_ms, 100);
        assert_eq!(config.detector.shutdown_wait(), Duration::from_secs(2));
    }

    #[test]
    fn example_config_is_valid() {
        let config = AppConfig::from_yaml(include_str!("../config.example.yaml"))
            .expect("example parses");
        assert!(config.validate().is_ok());
        assert_eq!(config.overlay.sizing, SizingMode::default());
        assert!(config.overlay.palm_gate.is_none());
        assert_eq!(config.designs[0].name, "Sunset");
    }

    #[test]
    fn inverted_constraints_are_rejected() {
        let mut config = AppConfig::default();
        config.capture.min = Resolution::new(4000, 480);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn non_positive_multiplier_is_rejected() {
        let mut config = AppConfig::default();
        config.overlay.sizing = SizingMode::FingerLength { multiplier: 0.0 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn constraints_accept_inclusive_bounds() {
        let constraints = CaptureConstraints::default();
        assert!(constraints.accepts(640, 480));
        assert!(constraints.accepts(1920, 1080));
        assert!(!constraints.accepts(320, 240));
        assert!(!constraints.accepts(3840, 2160));
    }
}
