use super::{Arc, ImageBuffer, ImageFrame, RenderImage, Rgba};
use nail_tryon::{model_download::ModelDownloadEvent, pipeline::compositor::CompositedFrame};

pub(super) fn output_to_image(output: &CompositedFrame) -> Option<Arc<RenderImage>> {
    let mut rgba = output.rgba.clone();

    // GPUI expects BGRA; convert in place to avoid the async asset pipeline and flicker.
    swap_red_blue(&mut rgba);

    let buffer = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(output.width, output.height, rgba)?;
    Some(Arc::new(RenderImage::new(vec![ImageFrame::new(buffer)])))
}

fn swap_red_blue(pixels: &mut [u8]) {
    for px in pixels.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
}

pub(super) fn size_label(size: f32) -> String {
    format!("{size:.0}px")
}

/// Line shown on the Starting card while a model downloads. `None` once the
/// model is on disk.
pub(super) fn download_label(event: &ModelDownloadEvent) -> Option<String> {
    match event {
        ModelDownloadEvent::AlreadyPresent { .. } | ModelDownloadEvent::Finished { .. } => None,
        ModelDownloadEvent::Started { model, .. } => {
            Some(format!("Downloading {} model...", model.label()))
        }
        ModelDownloadEvent::Progress {
            model,
            downloaded,
            total: Some(total),
        } if *total > 0 => Some(format!(
            "Downloading {} model: {}%",
            model.label(),
            downloaded.saturating_mul(100) / total
        )),
        ModelDownloadEvent::Progress {
            model, downloaded, ..
        } => Some(format!(
            "Downloading {} model: {:.1} MB",
            model.label(),
            *downloaded as f64 / (1024.0 * 1024.0)
        )),
    }
}
