//! Landmark set → fingertip placement transforms.
//!
//! Everything here is a pure function of the current landmarks and settings;
//! nothing is carried over between frames.

use std::f32::consts::FRAC_PI_2;

use serde::{Deserialize, Serialize};

use crate::types::{
    DetectionBatch, Finger, FingertipTransform, HandLandmarkSet, Handedness, WRIST,
};

const MIDDLE_TIP: usize = 12;
const INDEX_TIP: usize = 8;
const PINKY_TIP: usize = 20;

/// How large each nail sprite is drawn.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SizingMode {
    /// A fixed fraction of the frame width, capped by the sprite base size.
    FrameFraction { fraction: f32 },
    /// Tip-to-joint pixel distance times `multiplier`, capped by the sprite
    /// base size so a nail never outgrows its finger.
    FingerLength { multiplier: f32 },
}

impl Default for SizingMode {
    fn default() -> Self {
        SizingMode::FingerLength { multiplier: 1.5 }
    }
}

/// Palm-facing filter. A best-effort heuristic, not a pose solve.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PalmGate {
    pub threshold: f32,
    /// Set when the detector labels handedness as seen in a mirrored image.
    pub mirrored_handedness: bool,
}

impl Default for PalmGate {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            mirrored_handedness: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GeometryConfig {
    pub sizing: SizingMode,
    pub palm_gate: Option<PalmGate>,
}

/// Placement transforms for the five fingertips of one hand, thumb first.
///
/// Returns an empty list when the landmark set is incomplete or a required
/// landmark is missing, or when the palm gate rejects the hand.
pub fn compute_transforms(
    hand: &HandLandmarkSet,
    frame_width: u32,
    frame_height: u32,
    sprite_base_size: f32,
    config: &GeometryConfig,
) -> Vec<FingertipTransform> {
    compute_hand_transforms(0, hand, frame_width, frame_height, sprite_base_size, config)
}

/// Transforms for every hand of a batch, in the order the hands were received.
pub fn compute_batch_transforms(
    batch: &DetectionBatch,
    frame_width: u32,
    frame_height: u32,
    sprite_base_size: f32,
    config: &GeometryConfig,
) -> Vec<FingertipTransform> {
    batch
        .hands
        .iter()
        .enumerate()
        .flat_map(|(idx, hand)| {
            compute_hand_transforms(
                idx,
                hand,
                frame_width,
                frame_height,
                sprite_base_size,
                config,
            )
        })
        .collect()
}

fn compute_hand_transforms(
    hand_idx: usize,
    hand: &HandLandmarkSet,
    frame_width: u32,
    frame_height: u32,
    sprite_base_size: f32,
    config: &GeometryConfig,
) -> Vec<FingertipTransform> {
    if !hand.is_complete() {
        return Vec::new();
    }

    if let Some(gate) = &config.palm_gate {
        match back_of_hand_visible(hand, gate) {
            Some(true) => {}
            Some(false) | None => return Vec::new(),
        }
    }

    let width = frame_width as f32;
    let height = frame_height as f32;

    let mut transforms = Vec::with_capacity(Finger::ALL.len());
    for finger in Finger::ALL {
        let (Some(tip), Some(joint)) = (
            hand.point(finger.tip_index()),
            hand.point(finger.joint_index()),
        ) else {
            return Vec::new();
        };

        let x = tip.x * width;
        let y = tip.y * height;
        let dx = joint.x * width - x;
        let dy = joint.y * height - y;
        let angle = dy.atan2(dx) - FRAC_PI_2;

        let scale = match config.sizing {
            SizingMode::FrameFraction { fraction } => (width * fraction).min(sprite_base_size),
            SizingMode::FingerLength { multiplier } => {
                (dx.hypot(dy) * multiplier).min(sprite_base_size)
            }
        };

        transforms.push(FingertipTransform {
            hand: hand_idx,
            finger,
            x,
            y,
            angle,
            scale,
        });
    }
    transforms
}

/// Approximate palm normal: (wrist → middle tip) × (index tip → pinky tip).
pub fn palm_normal(hand: &HandLandmarkSet) -> Option<[f32; 3]> {
    let wrist = hand.point(WRIST)?;
    let middle = hand.point(MIDDLE_TIP)?;
    let index = hand.point(INDEX_TIP)?;
    let pinky = hand.point(PINKY_TIP)?;

    let a = [middle.x - wrist.x, middle.y - wrist.y, middle.z - wrist.z];
    let b = [pinky.x - index.x, pinky.y - index.y, pinky.z - index.z];

    Some([
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ])
}

/// Signed facing score; positive when the back of the hand faces the camera.
///
/// Image coordinates have y pointing down, so for a right hand seen from the
/// back the index tip lies left of the pinky tip and the normal's depth
/// component is positive. Left hands wind the other way.
pub fn facing_score(hand: &HandLandmarkSet, gate: &PalmGate) -> Option<f32> {
    let normal = palm_normal(hand)?;
    let mut sign = match hand.handedness {
        Handedness::Right => 1.0,
        Handedness::Left => -1.0,
    };
    if gate.mirrored_handedness {
        sign = -sign;
    }
    Some(normal[2] * sign)
}

pub fn back_of_hand_visible(hand: &HandLandmarkSet, gate: &PalmGate) -> Option<bool> {
    facing_score(hand, gate).map(|score| score > gate.threshold)
}
