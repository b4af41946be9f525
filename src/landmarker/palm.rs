//! Palm detector: 192px letterboxed input, SSD anchors, sigmoid scores and
//! greedy non-maximum suppression.

use std::{cmp::Ordering, f32::consts::PI, path::Path, sync::OnceLock};

use anyhow::{Context, Result, anyhow, ensure};
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::Tensor,
};

use super::preprocess::{HandRoi, Letterbox, letterbox};
use crate::types::Frame;

pub const PALM_INPUT_SIZE: u32 = 192;
pub const PALM_KEYPOINTS: usize = 7;

const ANCHOR_STRIDES: [u32; 4] = [8, 16, 16, 16];
const ANCHORS_PER_LAYER: usize = 2;
const NMS_IOU_THRESHOLD: f32 = 0.3;
const ROI_SCALE: f32 = 2.6;
const ROI_SHIFT_Y: f32 = -0.5;

// Palm keypoint indices used for orientation.
const WRIST_KEYPOINT: usize = 0;
const MIDDLE_MCP_KEYPOINT: usize = 2;

#[derive(Clone, Debug, PartialEq)]
pub struct PalmDetection {
    /// x1, y1, x2, y2 in frame pixels.
    pub bbox: [f32; 4],
    pub keypoints: [(f32, f32); PALM_KEYPOINTS],
    pub score: f32,
}

impl PalmDetection {
    pub fn center(&self) -> (f32, f32) {
        (
            (self.bbox[0] + self.bbox[2]) * 0.5,
            (self.bbox[1] + self.bbox[3]) * 0.5,
        )
    }
}

/// Anchor centers in normalized input coordinates. Layers sharing a stride
/// share one grid, each cell carrying two anchors per layer.
pub fn anchors() -> &'static [(f32, f32)] {
    static ANCHORS: OnceLock<Vec<(f32, f32)>> = OnceLock::new();
    ANCHORS.get_or_init(|| generate_anchors(PALM_INPUT_SIZE, &ANCHOR_STRIDES))
}

fn generate_anchors(input_size: u32, strides: &[u32]) -> Vec<(f32, f32)> {
    let mut anchors = Vec::new();
    let mut layer = 0;
    while layer < strides.len() {
        let stride = strides[layer];
        let mut same_stride = 0;
        while layer < strides.len() && strides[layer] == stride {
            same_stride += 1;
            layer += 1;
        }

        let grid = input_size.div_ceil(stride);
        for y in 0..grid {
            for x in 0..grid {
                let center = (
                    (x as f32 + 0.5) / grid as f32,
                    (y as f32 + 0.5) / grid as f32,
                );
                anchors.extend(std::iter::repeat_n(center, same_stride * ANCHORS_PER_LAYER));
            }
        }
    }
    anchors
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Decode raw model outputs. `boxes` is `[anchors, features]` row-major with
/// at least 4 + 2 * 7 features, `scores` holds one logit per anchor.
pub fn decode(
    boxes: &[f32],
    features: usize,
    scores: &[f32],
    letterbox: &Letterbox,
    score_threshold: f32,
) -> Result<Vec<PalmDetection>> {
    ensure!(
        features >= 4 + PALM_KEYPOINTS * 2,
        "palm box feature dimension too small: {features}"
    );
    let anchors = anchors();
    let count = anchors.len().min(scores.len());
    ensure!(
        boxes.len() >= count * features,
        "palm boxes too short: got {}, need {}",
        boxes.len(),
        count * features
    );

    let input = PALM_INPUT_SIZE as f32;
    let scale = letterbox.long_edge();
    let (bias_x, bias_y) = letterbox.pad_in_frame();
    let to_frame = |dx: f32, dy: f32, anchor: (f32, f32)| {
        (
            (dx / input + anchor.0) * scale - bias_x,
            (dy / input + anchor.1) * scale - bias_y,
        )
    };

    let mut candidates = Vec::new();
    for (idx, &anchor) in anchors.iter().enumerate().take(count) {
        let score = sigmoid(scores[idx]);
        if score < score_threshold {
            continue;
        }

        let row = &boxes[idx * features..(idx + 1) * features];
        let (cx, cy) = to_frame(row[0], row[1], anchor);
        let half_w = row[2] / input * scale * 0.5;
        let half_h = row[3] / input * scale * 0.5;
        if !(half_w > 0.0 && half_h > 0.0) {
            continue;
        }

        let keypoints = std::array::from_fn(|k| to_frame(row[4 + k * 2], row[5 + k * 2], anchor));
        candidates.push(PalmDetection {
            bbox: [cx - half_w, cy - half_h, cx + half_w, cy + half_h],
            keypoints,
            score,
        });
    }

    Ok(non_max_suppression(candidates, NMS_IOU_THRESHOLD))
}

/// Greedy NMS, highest score first.
pub fn non_max_suppression(mut candidates: Vec<PalmDetection>, threshold: f32) -> Vec<PalmDetection> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    let mut kept: Vec<PalmDetection> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(&k.bbox, &candidate.bbox) < threshold) {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = inter_w * inter_h;
    if inter <= 0.0 {
        return 0.0;
    }
    let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let union = area(a) + area(b) - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

/// Rotation that turns the segment `from -> to` upright on screen.
pub fn upright_rotation(from: (f32, f32), to: (f32, f32)) -> f32 {
    let angle = PI * 0.5 - (-(to.1 - from.1)).atan2(to.0 - from.0);
    normalize_radians(angle)
}

fn normalize_radians(angle: f32) -> f32 {
    angle - 2.0 * PI * ((angle + PI) / (2.0 * PI)).floor()
}

/// Square hand region around a detected palm, rotated so the fingers point
/// up and extended to cover the whole hand.
pub fn roi_from_palm(palm: &PalmDetection) -> HandRoi {
    let rotation = upright_rotation(
        palm.keypoints[WRIST_KEYPOINT],
        palm.keypoints[MIDDLE_MCP_KEYPOINT],
    );
    let width = palm.bbox[2] - palm.bbox[0];
    let height = palm.bbox[3] - palm.bbox[1];
    let (sin, cos) = rotation.sin_cos();
    let (cx, cy) = palm.center();

    HandRoi {
        center: (
            cx - height * ROI_SHIFT_Y * sin,
            cy + height * ROI_SHIFT_Y * cos,
        ),
        side: width.max(height) * ROI_SCALE,
        rotation,
    }
}

pub struct PalmDetector {
    session: Session,
    score_threshold: f32,
}

impl PalmDetector {
    pub fn new(model_path: &Path, score_threshold: f32) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| {
                format!("failed to load palm detector from {}", model_path.display())
            })?;
        Ok(Self {
            session,
            score_threshold,
        })
    }

    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<PalmDetection>> {
        let (input, info) = letterbox(frame, PALM_INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run palm detector")?;
        ensure!(
            outputs.len() >= 2,
            "palm detector returned {} outputs, expected 2",
            outputs.len()
        );

        let boxes = outputs[0].try_extract_array::<f32>()?;
        let scores = outputs[1].try_extract_array::<f32>()?;
        let features = *boxes
            .shape()
            .last()
            .ok_or_else(|| anyhow!("palm boxes have no shape"))?;
        let boxes: Vec<f32> = boxes.iter().copied().collect();
        let scores: Vec<f32> = scores.iter().copied().collect();

        decode(&boxes, features, &scores, &info, self.score_threshold)
    }
}
