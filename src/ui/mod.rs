use std::sync::Arc;

use crossbeam_channel::Receiver;
use gpui::{
    AnyElement, App, AppContext, Context, IntoElement, ObjectFit, ParentElement, Render,
    RenderImage, SharedString, Styled, StyledImage, TitlebarOptions, Window, WindowOptions, div,
    img, px,
    prelude::FluentBuilder,
};
use gpui_component::{
    ActiveTheme, Root, Selectable,
    button::{Button, ButtonVariants},
    h_flex,
    tag::Tag,
    v_flex,
};
use image::{Frame as ImageFrame, ImageBuffer, Rgba};
use nail_tryon::{SessionController, SessionView, model_download::ModelDownloadEvent};

mod live_view;
mod render_util;
mod status_view;

const SPRITE_SIZE_STEP: f32 = 8.0;
const PREVIEW_MAX_WIDTH: f32 = 960.0;

pub fn launch_ui(
    app: &mut App,
    controller: SessionController,
    downloads: Receiver<ModelDownloadEvent>,
) -> gpui::Result<()> {
    let window_options = WindowOptions {
        titlebar: Some(TitlebarOptions {
            title: Some("Nail Try-On".into()),
            appears_transparent: false,
            traffic_light_position: None,
        }),
        ..Default::default()
    };

    app.open_window(window_options, move |window, app| {
        let view = app.new(|_| AppView::new(controller, downloads));
        app.new(|cx| Root::new(view, window, cx))
    })?;

    Ok(())
}

pub(crate) struct AppView {
    controller: SessionController,
    downloads: Receiver<ModelDownloadEvent>,
    download_status: Option<String>,
    latest_image: Option<Arc<RenderImage>>,
    shown_frame: u64,
}

impl AppView {
    fn new(mut controller: SessionController, downloads: Receiver<ModelDownloadEvent>) -> Self {
        controller.start();
        Self {
            controller,
            downloads,
            download_status: None,
            latest_image: None,
            shown_frame: 0,
        }
    }

    fn drain_downloads(&mut self) {
        while let Ok(event) = self.downloads.try_recv() {
            self.download_status = render_util::download_label(&event);
        }
    }

    /// Upload the newest composited frame, if it changed since the last one.
    fn refresh_image(&mut self, window: &mut Window, cx: &mut Context<'_, Self>) {
        let Some(output) = self.controller.output() else {
            return;
        };
        if output.frame_number == self.shown_frame {
            return;
        }
        self.shown_frame = output.frame_number;
        if let Some(image) = render_util::output_to_image(output) {
            self.replace_latest_image(image, window, cx);
        }
    }

    fn replace_latest_image(
        &mut self,
        new_image: Arc<RenderImage>,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) {
        // The sprite atlas keeps every uploaded frame until it is dropped.
        if let Some(old_image) = self.latest_image.replace(new_image) {
            cx.drop_image(old_image, Some(window));
        }
    }

    fn clear_image(&mut self, window: &mut Window, cx: &mut Context<'_, Self>) {
        if let Some(old_image) = self.latest_image.take() {
            cx.drop_image(old_image, Some(window));
        }
        self.shown_frame = 0;
    }
}

impl Render for AppView {
    fn render(&mut self, window: &mut Window, cx: &mut Context<'_, Self>) -> impl IntoElement {
        // Keep polling the session while the window is open.
        cx.defer_in(window, |_, _, cx| {
            cx.notify();
        });

        self.drain_downloads();
        self.controller.pump();

        let view = match self.controller.view() {
            SessionView::Live => None,
            SessionView::Starting => Some(None),
            SessionView::Failed(err) => Some(Some(err.clone())),
        };
        let body = match view {
            None => {
                self.refresh_image(window, cx);
                self.render_live(cx)
            }
            Some(error) => {
                self.clear_image(window, cx);
                self.render_status(error.as_ref(), cx)
            }
        };

        v_flex()
            .size_full()
            .bg(cx.theme().background)
            .child(body)
    }
}

impl Drop for AppView {
    fn drop(&mut self) {
        self.controller.teardown();
    }
}
