#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod ui;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use gpui::Application;
use nail_tryon::{
    AppConfig, SessionController, geometry::PalmGate, landmarker::OrtHandLandmarkerFactory,
    pipeline::CaptureBackend,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Live nail art try-on", long_about = None)]
struct Args {
    /// Configuration file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Camera to open first, by enumeration index
    #[arg(long)]
    camera: Option<usize>,

    /// Initial nail design by name
    #[arg(short, long)]
    design: Option<String>,

    /// Sprite base size in pixels, clamped to 24..=96
    #[arg(long)]
    sprite_size: Option<f32>,

    /// Only draw nails when the back of the hand faces the camera
    #[arg(long)]
    palm_gate: bool,

    /// Draw fingertip markers and the landmark skeleton
    #[arg(long)]
    debug_landmarks: bool,

    /// Directory holding (or receiving) the ONNX hand models
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => {
            log::info!("loading configuration from {}", path.display());
            AppConfig::from_file(path)?
        }
        None => AppConfig::default(),
    };

    if let Some(design) = &args.design {
        config.overlay.default_design = design.clone();
    }
    if let Some(size) = args.sprite_size {
        config.overlay.sprite_size = size;
    }
    if args.palm_gate && config.overlay.palm_gate.is_none() {
        config.overlay.palm_gate = Some(PalmGate::default());
    }
    if args.debug_landmarks {
        config.overlay.show_tip_markers = true;
        config.overlay.show_skeleton = true;
    }
    if let Some(dir) = &args.model_dir {
        config.detector.model_dir = dir.clone();
    }

    config.validate()?;
    Ok(config)
}

#[cfg(feature = "camera-nokhwa")]
fn capture_backend() -> Result<Box<dyn CaptureBackend>> {
    Ok(Box::new(nail_tryon::pipeline::NokhwaBackend::new()))
}

#[cfg(not(feature = "camera-nokhwa"))]
fn capture_backend() -> Result<Box<dyn CaptureBackend>> {
    anyhow::bail!("built without a camera backend; enable the `camera-nokhwa` feature")
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = load_config(&args).context("invalid configuration")?;
    let backend = capture_backend()?;
    let (download_tx, download_rx) = crossbeam_channel::unbounded();
    let factory = Arc::new(
        OrtHandLandmarkerFactory::new(config.detector.model_dir.clone()).with_progress(download_tx),
    );

    let mut controller = SessionController::new(config, backend, factory);
    if let Some(index) = args.camera {
        controller = controller.with_camera_index(index);
    }

    Application::new()
        .with_assets(gpui_component_assets::Assets)
        .run(move |app| {
            gpui_component::init(app);

            if let Err(err) = ui::launch_ui(app, controller, download_rx) {
                log::error!("failed to launch ui: {err:?}");
            }
        });

    Ok(())
}
