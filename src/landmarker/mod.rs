//! Two stage hand landmark service on ONNX Runtime: a palm detector finds
//! new hands, a landmark model refines each hand region, and confident hands
//! are tracked into the next frame without running the palm detector again.

mod handpose;
mod palm;
mod preprocess;

use std::path::PathBuf;

use anyhow::{Result, anyhow, bail, ensure};
use crossbeam_channel::Sender;

pub use self::{
    handpose::{HANDPOSE_INPUT_SIZE, HandposeEstimator},
    palm::{PALM_INPUT_SIZE, PalmDetection, PalmDetector},
    preprocess::HandRoi,
};
use crate::{
    model_download::{ModelDownloadEvent, ModelKind, ensure_model_ready},
    pipeline::detector::{DetectorOptions, LandmarkService, LandmarkServiceFactory},
    types::{DetectionBatch, Frame, MAX_HANDS},
};

const SUPPORTED_MODEL_COMPLEXITY: u8 = 1;

struct Models {
    palm: PalmDetector,
    handpose: HandposeEstimator,
}

pub struct OrtHandLandmarker {
    model_dir: PathBuf,
    progress: Option<Sender<ModelDownloadEvent>>,
    options: DetectorOptions,
    models: Option<Models>,
    tracked: Vec<HandRoi>,
}

impl OrtHandLandmarker {
    pub fn new(model_dir: PathBuf) -> Self {
        Self {
            model_dir,
            progress: None,
            options: DetectorOptions::default(),
            models: None,
            tracked: Vec::new(),
        }
    }

    /// Forward model download progress to `progress`.
    pub fn with_progress(mut self, progress: Sender<ModelDownloadEvent>) -> Self {
        self.progress = Some(progress);
        self
    }

    fn fetch_model(&self, kind: ModelKind) -> Result<PathBuf> {
        ensure_model_ready(&self.model_dir, kind, |event| {
            if let Some(progress) = &self.progress {
                let _ = progress.send(event);
            }
        })
    }
}

impl LandmarkService for OrtHandLandmarker {
    fn configure(&mut self, options: &DetectorOptions) -> Result<()> {
        ensure!(
            options.model_complexity == SUPPORTED_MODEL_COMPLEXITY,
            "model complexity {} is not available, only {SUPPORTED_MODEL_COMPLEXITY} is shipped",
            options.model_complexity
        );
        ensure!(
            (1..=MAX_HANDS).contains(&options.max_hands),
            "max hands must be between 1 and {MAX_HANDS}, got {}",
            options.max_hands
        );
        for (name, value) in [
            ("detection", options.min_detection_confidence),
            ("tracking", options.min_tracking_confidence),
        ] {
            ensure!(
                (0.0..=1.0).contains(&value),
                "min {name} confidence must be within [0, 1], got {value}"
            );
        }
        self.options = *options;
        Ok(())
    }

    fn initialize(&mut self) -> Result<()> {
        let palm_path = self.fetch_model(ModelKind::PalmDetector)?;
        let handpose_path = self.fetch_model(ModelKind::HandLandmarks)?;

        let models = Models {
            palm: PalmDetector::new(&palm_path, self.options.min_detection_confidence)?,
            handpose: HandposeEstimator::new(&handpose_path)?,
        };
        log::info!(
            "hand landmarker ready using {} and {}",
            palm_path.display(),
            handpose_path.display()
        );
        self.models = Some(models);
        self.tracked.clear();
        Ok(())
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionBatch> {
        let Some(models) = self.models.as_mut() else {
            bail!("hand landmarker used before initialize");
        };
        if !frame.is_drawable() {
            return Err(anyhow!(
                "frame buffer size mismatch: got {} bytes for {}x{}",
                frame.rgba.len(),
                frame.width,
                frame.height
            ));
        }

        let max_hands = self.options.max_hands;
        let mut regions = merge_regions(std::mem::take(&mut self.tracked), &[], max_hands);
        if regions.len() < max_hands {
            let palms = models.palm.detect(frame)?;
            regions = merge_regions(regions, &palms, max_hands);
        }

        let mut hands = Vec::with_capacity(regions.len());
        for roi in &regions {
            let estimate = match models.handpose.estimate(frame, roi) {
                Ok(estimate) => estimate,
                Err(err) => {
                    log::warn!("hand landmark estimation failed: {err:#}");
                    continue;
                }
            };
            if estimate.presence < self.options.min_tracking_confidence {
                continue;
            }
            if let Some(next) = handpose::roi_from_landmarks(&estimate.pixels) {
                self.tracked.push(next);
            }
            hands.push(estimate.hand);
        }

        Ok(DetectionBatch::new(hands))
    }
}

/// Keep tracked regions and add palms that are not already covered by one,
/// best score first, up to `max_hands`. A tracked region whose center lies
/// inside an earlier one has converged onto the same hand and is dropped.
pub fn merge_regions(
    tracked: Vec<HandRoi>,
    palms: &[PalmDetection],
    max_hands: usize,
) -> Vec<HandRoi> {
    let mut regions: Vec<HandRoi> = Vec::with_capacity(max_hands);
    for roi in tracked {
        if regions.len() >= max_hands {
            break;
        }
        if regions.iter().any(|kept| kept.contains(roi.center)) {
            log::debug!("dropping duplicate hand region at {:?}", roi.center);
            continue;
        }
        regions.push(roi);
    }
    for palm in palms {
        if regions.len() >= max_hands {
            break;
        }
        let center = palm.center();
        if regions.iter().any(|roi| roi.contains(center)) {
            continue;
        }
        regions.push(palm::roi_from_palm(palm));
    }
    regions
}

/// Creates a fresh [`OrtHandLandmarker`] reading models from one directory.
#[derive(Clone, Debug)]
pub struct OrtHandLandmarkerFactory {
    model_dir: PathBuf,
    progress: Option<Sender<ModelDownloadEvent>>,
}

impl OrtHandLandmarkerFactory {
    pub fn new(model_dir: PathBuf) -> Self {
        Self {
            model_dir,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Sender<ModelDownloadEvent>) -> Self {
        self.progress = Some(progress);
        self
    }
}

impl LandmarkServiceFactory for OrtHandLandmarkerFactory {
    fn create(&self) -> Result<Box<dyn LandmarkService>> {
        let mut service = OrtHandLandmarker::new(self.model_dir.clone());
        if let Some(progress) = &self.progress {
            service = service.with_progress(progress.clone());
        }
        Ok(Box::new(service))
    }
}
