//! Debug drawing: hand skeletons and fingertip markers on an RGBA buffer.

use crate::types::{DetectionBatch, FingertipTransform, HandLandmarkSet};

pub const CONNECTIONS: &[(usize, usize)] = &[
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    (0, 5),
    (5, 6),
    (6, 7),
    (7, 8),
    (0, 9),
    (9, 10),
    (10, 11),
    (11, 12),
    (0, 13),
    (13, 14),
    (14, 15),
    (15, 16),
    (0, 17),
    (17, 18),
    (18, 19),
    (19, 20),
    (5, 9),
    (9, 13),
    (13, 17),
];

const BONE_COLOR: [u8; 4] = [56, 189, 248, 255];
const JOINT_COLOR: [u8; 4] = [248, 113, 113, 255];
const TIP_MARKER_COLOR: [u8; 4] = [255, 0, 0, 255];
const BONE_RADIUS: i32 = 2;
const JOINT_RADIUS: i32 = 4;
const TIP_MARKER_RADIUS: i32 = 3;

pub fn draw_hands(buffer: &mut [u8], width: u32, height: u32, batch: &DetectionBatch) {
    for hand in &batch.hands {
        draw_hand(buffer, width, height, hand);
    }
}

fn draw_hand(buffer: &mut [u8], width: u32, height: u32, hand: &HandLandmarkSet) {
    let to_px = |idx: usize| {
        hand.point(idx)
            .map(|p| (p.x * width as f32, p.y * height as f32))
    };

    for &(a, b) in CONNECTIONS {
        if let (Some(pa), Some(pb)) = (to_px(a), to_px(b)) {
            draw_segment(buffer, width, height, pa, pb, BONE_RADIUS, BONE_COLOR);
        }
    }
    for idx in 0..hand.points.len() {
        if let Some(p) = to_px(idx) {
            fill_disc(buffer, width, height, p, JOINT_RADIUS, JOINT_COLOR);
        }
    }
}

/// Small red dot on every fingertip anchor.
pub fn draw_tip_markers(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    transforms: &[FingertipTransform],
) {
    for t in transforms {
        fill_disc(
            buffer,
            width,
            height,
            (t.x, t.y),
            TIP_MARKER_RADIUS,
            TIP_MARKER_COLOR,
        );
    }
}

fn draw_segment(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    from: (f32, f32),
    to: (f32, f32),
    radius: i32,
    color: [u8; 4],
) {
    let (dx, dy) = (to.0 - from.0, to.1 - from.1);
    let steps = dx.abs().max(dy.abs()).ceil().max(1.0) as i32;
    for step in 0..=steps {
        let t = step as f32 / steps as f32;
        fill_disc(
            buffer,
            width,
            height,
            (from.0 + dx * t, from.1 + dy * t),
            radius,
            color,
        );
    }
}

fn fill_disc(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    center: (f32, f32),
    radius: i32,
    color: [u8; 4],
) {
    if !center.0.is_finite() || !center.1.is_finite() {
        return;
    }
    let (cx, cy) = (center.0.round() as i64, center.1.round() as i64);
    let r = radius as i64;
    let r2 = r * r;
    for oy in -r..=r {
        let y = cy + oy;
        if y < 0 || y >= height as i64 {
            continue;
        }
        for ox in -r..=r {
            let x = cx + ox;
            if x < 0 || x >= width as i64 || ox * ox + oy * oy > r2 {
                continue;
            }
            let idx = (y as usize * width as usize + x as usize) * 4;
            if let Some(px) = buffer.get_mut(idx..idx + 4) {
                px.copy_from_slice(&color);
            }
        }
    }
}
