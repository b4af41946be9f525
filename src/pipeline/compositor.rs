//! Draws the video frame and one nail sprite per fingertip transform into an
//! output buffer.

use rayon::prelude::*;
use thiserror::Error;

use super::skeleton;
use crate::{
    designs::Sprite,
    types::{FingertipTransform, Frame},
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompositorOptions {
    /// Shift of the sprite past the fingertip, as a fraction of its size.
    pub nail_bed_offset: f32,
    pub show_tip_markers: bool,
    pub show_skeleton: bool,
}

impl Default for CompositorOptions {
    fn default() -> Self {
        Self {
            nail_bed_offset: 0.3125,
            show_tip_markers: false,
            show_skeleton: false,
        }
    }
}

/// The drawable output surface, sized to the live frame.
#[derive(Clone, Debug, Default)]
pub struct CompositedFrame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub frame_number: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub skipped: bool,
    pub drawn: usize,
    pub failed: usize,
}

#[derive(Error, Debug, PartialEq)]
pub enum DrawError {
    #[error("sprite has no pixel data")]
    EmptySprite,

    #[error("transform is not drawable: {0:?}")]
    InvalidTransform(FingertipTransform),
}

/// Composite one frame. The output is left untouched when the frame has no
/// usable dimensions. A failing sprite draw is logged and does not stop the
/// remaining draws.
pub fn render(
    frame: &Frame,
    transforms: &[FingertipTransform],
    sprite: Option<&Sprite>,
    output: &mut CompositedFrame,
    options: &CompositorOptions,
) -> RenderStats {
    if !frame.is_drawable() {
        return RenderStats {
            skipped: true,
            ..RenderStats::default()
        };
    }

    output.width = frame.width;
    output.height = frame.height;
    output.rgba.clear();
    output.rgba.extend_from_slice(&frame.rgba);

    let mut stats = RenderStats::default();
    if let Some(sprite) = sprite {
        for transform in transforms {
            match draw_sprite(
                &mut output.rgba,
                frame.width,
                frame.height,
                sprite,
                transform,
                options.nail_bed_offset,
            ) {
                Ok(()) => stats.drawn += 1,
                Err(err) => {
                    stats.failed += 1;
                    log::warn!(
                        "failed to draw nail for {:?} of hand {}: {err}",
                        transform.finger,
                        transform.hand
                    );
                }
            }
        }
    }

    if options.show_tip_markers {
        skeleton::draw_tip_markers(&mut output.rgba, frame.width, frame.height, transforms);
    }

    stats
}

/// Alpha-blend `sprite` translated to the anchor, rotated by the transform's
/// angle and scaled to `transform.scale` pixels.
pub fn draw_sprite(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    sprite: &Sprite,
    transform: &FingertipTransform,
    nail_bed_offset: f32,
) -> Result<(), DrawError> {
    if !sprite.is_valid() {
        return Err(DrawError::EmptySprite);
    }
    let size = transform.scale;
    let offset = size * nail_bed_offset;
    if !(size > 0.0)
        || !transform.x.is_finite()
        || !transform.y.is_finite()
        || !transform.angle.is_finite()
        || !offset.is_finite()
    {
        return Err(DrawError::InvalidTransform(*transform));
    }

    let half = size * 0.5;
    let reach = half.hypot(half + offset.abs());
    let x0 = (transform.x - reach).floor().max(0.0) as usize;
    let y0 = (transform.y - reach).floor().max(0.0) as usize;
    let x1 = ((transform.x + reach).ceil().max(0.0) as usize).min(width as usize);
    let y1 = ((transform.y + reach).ceil().max(0.0) as usize).min(height as usize);
    if x0 >= x1 || y0 >= y1 {
        return Ok(());
    }

    let (sin, cos) = transform.angle.sin_cos();
    let sprite_w = sprite.width as f32;
    let sprite_h = sprite.height as f32;
    let stride = width as usize * 4;

    buffer[y0 * stride..y1 * stride]
        .par_chunks_mut(stride)
        .enumerate()
        .for_each(|(row, line)| {
            let dy = (y0 + row) as f32 + 0.5 - transform.y;
            for x in x0..x1 {
                let dx = x as f32 + 0.5 - transform.x;
                // Undo the rotation to land in sprite-local coordinates.
                let local_x = dx * cos + dy * sin;
                let local_y = -dx * sin + dy * cos;
                let u = (local_x + half) / size * sprite_w;
                let v = (local_y + half + offset) / size * sprite_h;
                if u < 0.0 || v < 0.0 || u >= sprite_w || v >= sprite_h {
                    continue;
                }
                let src = sprite.sample(u, v);
                blend_over(&mut line[x * 4..x * 4 + 4], src);
            }
        });

    Ok(())
}

fn blend_over(dst: &mut [u8], src: [f32; 4]) {
    let alpha = (src[3] / 255.0).clamp(0.0, 1.0);
    if alpha <= 0.0 {
        return;
    }
    for c in 0..3 {
        let blended = src[c] * alpha + dst[c] as f32 * (1.0 - alpha);
        dst[c] = blended.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = 255;
}
