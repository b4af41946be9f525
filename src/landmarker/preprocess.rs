//! Model input preparation: letterboxed resize and rotated square crops.

use anyhow::{Context, Result, anyhow, ensure};
use fast_image_resize as fir;
use ndarray::Array4;
use rayon::prelude::*;

use crate::types::Frame;

/// How a frame was fitted into a square model input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub frame_w: u32,
    pub frame_h: u32,
}

impl Letterbox {
    /// Padding expressed in frame pixels.
    pub fn pad_in_frame(&self) -> (f32, f32) {
        (self.pad_x / self.scale, self.pad_y / self.scale)
    }

    pub fn long_edge(&self) -> f32 {
        self.frame_w.max(self.frame_h) as f32
    }
}

/// Rotated square region of a frame, in frame pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HandRoi {
    pub center: (f32, f32),
    pub side: f32,
    /// Radians, clockwise on screen.
    pub rotation: f32,
}

impl HandRoi {
    /// Map a point given in crop pixels of an `input_size` crop back to frame pixels.
    pub fn to_frame(&self, x: f32, y: f32, input_size: u32) -> (f32, f32) {
        let half = input_size as f32 / 2.0;
        let scale = self.side / input_size as f32;
        let dx = (x - half) * scale;
        let dy = (y - half) * scale;
        let (sin, cos) = self.rotation.sin_cos();
        (
            self.center.0 + dx * cos - dy * sin,
            self.center.1 + dx * sin + dy * cos,
        )
    }

    pub fn contains(&self, point: (f32, f32)) -> bool {
        let dx = point.0 - self.center.0;
        let dy = point.1 - self.center.1;
        let (sin, cos) = self.rotation.sin_cos();
        let local_x = dx * cos + dy * sin;
        let local_y = -dx * sin + dy * cos;
        let half = self.side / 2.0;
        local_x.abs() <= half && local_y.abs() <= half
    }
}

fn ensure_frame(frame: &Frame) -> Result<()> {
    ensure!(
        frame.is_drawable(),
        "frame buffer size mismatch: got {} bytes for {}x{}",
        frame.rgba.len(),
        frame.width,
        frame.height
    );
    Ok(())
}

/// Resize keeping aspect ratio, center on a black square and normalize to
/// NHWC floats in [0, 1].
pub fn letterbox(frame: &Frame, target: u32) -> Result<(Array4<f32>, Letterbox)> {
    ensure_frame(frame)?;

    let scale = target as f32 / frame.width.max(frame.height) as f32;
    let new_w = ((frame.width as f32 * scale).round() as u32).clamp(1, target);
    let new_h = ((frame.height as f32 * scale).round() as u32).clamp(1, target);

    let src = fir::images::ImageRef::new(
        frame.width,
        frame.height,
        &frame.rgba,
        fir::PixelType::U8x4,
    )?;
    let mut dst = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    fir::Resizer::new()
        .resize(&src, &mut dst, Some(&options))
        .context("letterbox resize failed")?;
    let resized = dst.into_vec();

    let pad_x = (target - new_w) as usize / 2;
    let pad_y = (target - new_h) as usize / 2;
    let side = target as usize;
    let src_stride = new_w as usize * 4;

    let mut data = vec![0f32; side * side * 3];
    data.par_chunks_mut(side * 3)
        .enumerate()
        .for_each(|(row, line)| {
            if row < pad_y || row >= pad_y + new_h as usize {
                return;
            }
            let src_row = &resized[(row - pad_y) * src_stride..(row - pad_y + 1) * src_stride];
            for (col, px) in src_row.chunks_exact(4).enumerate() {
                let dst = (pad_x + col) * 3;
                line[dst] = px[0] as f32 / 255.0;
                line[dst + 1] = px[1] as f32 / 255.0;
                line[dst + 2] = px[2] as f32 / 255.0;
            }
        });

    let input = Array4::from_shape_vec((1, side, side, 3), data)
        .map_err(|err| anyhow!("failed to build letterbox tensor: {err}"))?;

    Ok((
        input,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
            frame_w: frame.width,
            frame_h: frame.height,
        },
    ))
}

/// Sample `roi` into an `output_size` square, NHWC floats in [0, 1].
/// Pixels outside the frame are black.
pub fn rotated_crop(frame: &Frame, roi: &HandRoi, output_size: u32) -> Result<Array4<f32>> {
    ensure_frame(frame)?;
    ensure!(roi.side > 0.0, "empty crop region");

    let side = output_size as usize;
    let mut data = vec![0f32; side * side * 3];
    data.par_chunks_mut(side * 3)
        .enumerate()
        .for_each(|(y, line)| {
            for x in 0..side {
                let (src_x, src_y) = roi.to_frame(x as f32 + 0.5, y as f32 + 0.5, output_size);
                let rgb = sample_rgb(frame, src_x - 0.5, src_y - 0.5);
                line[x * 3..x * 3 + 3].copy_from_slice(&rgb);
            }
        });

    Array4::from_shape_vec((1, side, side, 3), data)
        .map_err(|err| anyhow!("failed to build crop tensor: {err}"))
}

fn sample_rgb(frame: &Frame, x: f32, y: f32) -> [f32; 3] {
    if !x.is_finite() || !y.is_finite() {
        return [0.0; 3];
    }
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let (w, h) = (frame.width as i64, frame.height as i64);
    let fetch = |cx: f32, cy: f32| -> [f32; 3] {
        let (ix, iy) = (cx as i64, cy as i64);
        if ix < 0 || iy < 0 || ix >= w || iy >= h {
            return [0.0; 3];
        }
        let idx = (iy as usize * frame.width as usize + ix as usize) * 4;
        [
            frame.rgba[idx] as f32 / 255.0,
            frame.rgba[idx + 1] as f32 / 255.0,
            frame.rgba[idx + 2] as f32 / 255.0,
        ]
    };

    let c00 = fetch(x0, y0);
    let c10 = fetch(x0 + 1.0, y0);
    let c01 = fetch(x0, y0 + 1.0);
    let c11 = fetch(x0 + 1.0, y0 + 1.0);
    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    std::array::from_fn(|c| lerp(lerp(c00[c], c10[c], fx), lerp(c01[c], c11[c], fx), fy))
}
