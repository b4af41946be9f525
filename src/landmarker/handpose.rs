//! Hand landmark model: 224px rotated crop in, 21 landmarks plus presence
//! and handedness scores out.

use std::path::Path;

use anyhow::{Context, Result, anyhow, ensure};
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::Tensor,
};

use super::{
    palm::upright_rotation,
    preprocess::{HandRoi, rotated_crop},
};
use crate::types::{Frame, HandLandmarkSet, Handedness, LandmarkPoint, NUM_LANDMARKS, WRIST};

pub const HANDPOSE_INPUT_SIZE: u32 = 224;

const MIDDLE_MCP: usize = 9;
const TRACKING_ROI_SCALE: f32 = 2.0;
const TRACKING_ROI_SHIFT_Y: f32 = -0.1;

#[derive(Clone, Debug, PartialEq)]
pub struct HandEstimate {
    pub hand: HandLandmarkSet,
    pub presence: f32,
    /// Landmarks in frame pixels, used to derive the next tracking region.
    pub pixels: Vec<(f32, f32)>,
}

/// Turn raw model output into normalized landmarks. `raw` holds 21 x/y/z
/// triples in crop pixels.
pub fn decode_landmarks(
    raw: &[f32],
    roi: &HandRoi,
    frame_w: u32,
    frame_h: u32,
) -> Result<(Vec<LandmarkPoint>, Vec<(f32, f32)>)> {
    ensure!(
        raw.len() >= NUM_LANDMARKS * 3,
        "unexpected landmark length: got {}, need {}",
        raw.len(),
        NUM_LANDMARKS * 3
    );
    ensure!(frame_w > 0 && frame_h > 0, "empty frame");

    let crop_to_frame = roi.side / HANDPOSE_INPUT_SIZE as f32;
    let (w, h) = (frame_w as f32, frame_h as f32);
    let mut points = Vec::with_capacity(NUM_LANDMARKS);
    let mut pixels = Vec::with_capacity(NUM_LANDMARKS);
    for triple in raw.chunks_exact(3).take(NUM_LANDMARKS) {
        let (px, py) = roi.to_frame(triple[0], triple[1], HANDPOSE_INPUT_SIZE);
        pixels.push((px, py));
        // Depth shares the horizontal scale.
        points.push(LandmarkPoint::new(px / w, py / h, triple[2] * crop_to_frame / w));
    }
    Ok((points, pixels))
}

/// Region to look at in the next frame, derived from this frame's landmarks.
pub fn roi_from_landmarks(pixels: &[(f32, f32)]) -> Option<HandRoi> {
    let wrist = *pixels.get(WRIST)?;
    let middle = *pixels.get(MIDDLE_MCP)?;
    let rotation = upright_rotation(wrist, middle);
    let (sin, cos) = rotation.sin_cos();

    // Bounds in the hand-aligned frame.
    let (mut min_x, mut max_x, mut min_y, mut max_y) = (f32::MAX, f32::MIN, f32::MAX, f32::MIN);
    for &(x, y) in pixels {
        let local_x = x * cos + y * sin;
        let local_y = -x * sin + y * cos;
        min_x = min_x.min(local_x);
        max_x = max_x.max(local_x);
        min_y = min_y.min(local_y);
        max_y = max_y.max(local_y);
    }
    let width = max_x - min_x;
    let height = max_y - min_y;
    if !(width.is_finite() && height.is_finite()) || width.max(height) <= 0.0 {
        return None;
    }

    let local_cx = (min_x + max_x) * 0.5;
    let local_cy = (min_y + max_y) * 0.5 + height * TRACKING_ROI_SHIFT_Y;
    Some(HandRoi {
        center: (
            local_cx * cos - local_cy * sin,
            local_cx * sin + local_cy * cos,
        ),
        side: width.max(height) * TRACKING_ROI_SCALE,
        rotation,
    })
}

pub struct HandposeEstimator {
    session: Session,
}

impl HandposeEstimator {
    pub fn new(model_path: &Path) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| {
                format!("failed to load hand landmark model from {}", model_path.display())
            })?;
        Ok(Self { session })
    }

    pub fn estimate(&mut self, frame: &Frame, roi: &HandRoi) -> Result<HandEstimate> {
        let input = rotated_crop(frame, roi, HANDPOSE_INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run hand landmark model")?;
        ensure!(
            outputs.len() >= 3,
            "hand landmark model returned {} outputs, expected 3",
            outputs.len()
        );

        let raw: Vec<f32> = outputs[0].try_extract_array::<f32>()?.iter().copied().collect();
        let first_value = |idx: usize| -> Result<f32> {
            outputs[idx]
                .try_extract_array::<f32>()?
                .iter()
                .next()
                .copied()
                .ok_or_else(|| anyhow!("hand landmark output {idx} is empty"))
        };
        let presence = first_value(1)?;
        let handedness = Handedness::from_score(first_value(2)?);

        let (points, pixels) = decode_landmarks(&raw, roi, frame.width, frame.height)?;
        Ok(HandEstimate {
            hand: HandLandmarkSet::new(points, handedness),
            presence,
            pixels,
        })
    }
}
