//! Nail design catalog and sprite loading.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    thread,
};

use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;

use crate::{config::CustomDesign, error::SessionError};

/// Sprites larger than this on their long edge are downsized on load.
pub const MAX_SPRITE_EDGE: u32 = 256;

const BUILTIN_NAIL_SIZE: u32 = 128;
const CUSTOM_DESIGN_BASE_ID: u32 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DesignId(pub u32);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpriteSource {
    /// Procedurally drawn pink nail, always available.
    BuiltinNail,
    File(PathBuf),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverlayDesign {
    pub id: DesignId,
    pub name: String,
    pub source: SpriteSource,
}

pub fn builtin_designs() -> Vec<OverlayDesign> {
    vec![
        OverlayDesign {
            id: DesignId(1),
            name: "Basic".to_string(),
            source: SpriteSource::BuiltinNail,
        },
        OverlayDesign {
            id: DesignId(2),
            name: "French".to_string(),
            source: SpriteSource::File(PathBuf::from("assets/nails/french.png")),
        },
        OverlayDesign {
            id: DesignId(3),
            name: "Glitter".to_string(),
            source: SpriteSource::File(PathBuf::from("assets/nails/glitter.png")),
        },
    ]
}

/// Built-in designs followed by user supplied ones.
pub fn catalog(custom: &[CustomDesign]) -> Vec<OverlayDesign> {
    let mut designs = builtin_designs();
    designs.extend(custom.iter().enumerate().map(|(idx, design)| OverlayDesign {
        id: DesignId(CUSTOM_DESIGN_BASE_ID + idx as u32),
        name: design.name.clone(),
        source: SpriteSource::File(design.image.clone()),
    }));
    designs
}

pub fn find_by_name<'a>(designs: &'a [OverlayDesign], name: &str) -> Option<&'a OverlayDesign> {
    designs
        .iter()
        .find(|design| design.name.eq_ignore_ascii_case(name))
}

/// Decoded RGBA8 sprite.
#[derive(Clone, Debug, PartialEq)]
pub struct Sprite {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Sprite {
    pub fn new(rgba: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let sprite = Self {
            rgba,
            width,
            height,
        };
        if !sprite.is_valid() {
            return Err(anyhow!(
                "sprite buffer size mismatch: got {} bytes for {}x{}",
                sprite.rgba.len(),
                width,
                height
            ));
        }
        Ok(sprite)
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.rgba.len() == (self.width as usize) * (self.height as usize) * 4
    }

    /// Bilinear sample at sprite pixel coordinates, edges clamped.
    pub fn sample(&self, u: f32, v: f32) -> [f32; 4] {
        let max_x = (self.width - 1) as f32;
        let max_y = (self.height - 1) as f32;
        let sx = (u - 0.5).clamp(0.0, max_x);
        let sy = (v - 0.5).clamp(0.0, max_y);
        let x0 = sx.floor();
        let y0 = sy.floor();
        let fx = sx - x0;
        let fy = sy - y0;
        let x1 = (x0 + 1.0).min(max_x);
        let y1 = (y0 + 1.0).min(max_y);

        let texel = |x: f32, y: f32| -> [f32; 4] {
            let idx = (y as usize * self.width as usize + x as usize) * 4;
            [
                self.rgba[idx] as f32,
                self.rgba[idx + 1] as f32,
                self.rgba[idx + 2] as f32,
                self.rgba[idx + 3] as f32,
            ]
        };

        let c00 = texel(x0, y0);
        let c10 = texel(x1, y0);
        let c01 = texel(x0, y1);
        let c11 = texel(x1, y1);
        let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
        let mut out = [0.0; 4];
        for c in 0..4 {
            out[c] = lerp(lerp(c00[c], c10[c], fx), lerp(c01[c], c11[c], fx), fy);
        }
        out
    }
}

pub fn load_sprite(design: &OverlayDesign) -> Result<Sprite, SessionError> {
    let loaded = match &design.source {
        SpriteSource::BuiltinNail => Ok(builtin_nail(BUILTIN_NAIL_SIZE)),
        SpriteSource::File(path) => load_sprite_file(path),
    };
    loaded.map_err(|err| SessionError::SpriteLoadFailure(format!("{}: {err:#}", design.name)))
}

fn load_sprite_file(path: &Path) -> Result<Sprite> {
    let decoded = image::open(path)
        .with_context(|| format!("failed to decode {}", path.display()))?
        .into_rgba8();
    let (width, height) = decoded.dimensions();
    let sprite = Sprite::new(decoded.into_raw(), width, height)?;
    fit_to_max_edge(sprite, MAX_SPRITE_EDGE)
}

fn fit_to_max_edge(sprite: Sprite, max_edge: u32) -> Result<Sprite> {
    let long_edge = sprite.width.max(sprite.height);
    if long_edge <= max_edge {
        return Ok(sprite);
    }

    let scale = max_edge as f32 / long_edge as f32;
    let new_w = (sprite.width as f32 * scale).round().max(1.0) as u32;
    let new_h = (sprite.height as f32 * scale).round().max(1.0) as u32;

    let src = fir::images::Image::from_vec_u8(
        sprite.width,
        sprite.height,
        sprite.rgba,
        fir::PixelType::U8x4,
    )?;
    let mut dst = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Lanczos3));
    fir::Resizer::new()
        .resize(&src, &mut dst, Some(&options))
        .context("sprite resize failed")?;

    Sprite::new(dst.into_vec(), new_w, new_h)
}

/// Pink nail with a soft alpha falloff towards the rim.
pub fn builtin_nail(size: u32) -> Sprite {
    let size = size.max(1);
    let mut rgba = vec![0u8; (size as usize) * (size as usize) * 4];
    let center = size as f32 / 2.0;
    let radius = size as f32 / 2.0;
    let solid = size as f32 / 3.0;

    for (idx, px) in rgba.chunks_exact_mut(4).enumerate() {
        let x = (idx as u32 % size) as f32 + 0.5;
        let y = (idx as u32 / size) as f32 + 0.5;
        let dist = (x - center).hypot(y - center);
        let alpha = if dist > radius {
            0.0
        } else if dist > solid {
            255.0 * (1.0 - (dist - solid) / (radius - solid))
        } else {
            255.0
        };
        px.copy_from_slice(&[255, 192, 203, alpha.clamp(0.0, 255.0) as u8]);
    }

    Sprite {
        rgba,
        width: size,
        height: size,
    }
}

/// Decode a design on a background thread and hand the result to `on_done`.
pub fn spawn_sprite_load<F>(design: OverlayDesign, on_done: F) -> thread::JoinHandle<()>
where
    F: FnOnce(Result<Arc<Sprite>, SessionError>) + Send + 'static,
{
    thread::spawn(move || {
        let result = load_sprite(&design).map(Arc::new);
        match &result {
            Ok(sprite) => log::info!(
                "loaded nail design {} ({}x{})",
                design.name,
                sprite.width,
                sprite.height
            ),
            Err(err) => log::error!("failed to load nail design {}: {err}", design.name),
        }
        on_done(result);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_appends_custom_designs() {
        let custom = vec![CustomDesign {
            name: "Chrome".into(),
            image: PathBuf::from("chrome.png"),
        }];
        let designs = catalog(&custom);
        assert_eq!(designs.len(), 4);
        assert_eq!(designs[0].name, "Basic");
        assert_eq!(designs[3].id, DesignId(100));
        assert_eq!(find_by_name(&designs, "chrome").map(|d| d.id), Some(DesignId(100)));
        assert!(find_by_name(&designs, "neon").is_none());
    }

    #[test]
    fn builtin_nail_is_opaque_in_the_middle_and_clear_in_corners() {
        let sprite = builtin_nail(50);
        assert!(sprite.is_valid());
        let alpha = |x: u32, y: u32| sprite.rgba[((y * 50 + x) * 4 + 3) as usize];
        assert_eq!(alpha(25, 25), 255);
        assert_eq!(alpha(0, 0), 0);
    }

    #[test]
    fn builtin_design_always_loads() {
        let designs = builtin_designs();
        let sprite = load_sprite(&designs[0]).expect("builtin sprite");
        assert_eq!((sprite.width, sprite.height), (128, 128));
    }

    #[test]
    fn missing_file_is_a_sprite_load_failure() {
        let design = OverlayDesign {
            id: DesignId(9),
            name: "Ghost".into(),
            source: SpriteSource::File(PathBuf::from("does/not/exist.png")),
        };
        assert!(matches!(
            load_sprite(&design),
            Err(SessionError::SpriteLoadFailure(_))
        ));
    }

    #[test]
    fn oversized_sprites_are_downsized() {
        let sprite = Sprite::new(vec![255; 512 * 128 * 4], 512, 128).expect("sprite");
        let fitted = fit_to_max_edge(sprite, 256).expect("resize");
        assert_eq!((fitted.width, fitted.height), (256, 64));
    }

    #[test]
    fn mismatched_buffer_is_rejected() {
        assert!(Sprite::new(vec![0; 10], 2, 2).is_err());
    }

    #[test]
    fn sampling_interpolates_between_texels() {
        let sprite = Sprite::new(vec![0, 0, 0, 255, 200, 0, 0, 255], 2, 1).expect("sprite");
        let mid = sprite.sample(1.0, 0.5);
        assert!((mid[0] - 100.0).abs() < 1e-3);
        assert_eq!(sprite.sample(0.0, 0.0)[0], 0.0);
        assert_eq!(sprite.sample(2.0, 0.5)[0], 200.0);
    }
}
