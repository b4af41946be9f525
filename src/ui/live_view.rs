use super::{
    ActiveTheme, AnyElement, AppView, Button, ButtonVariants, Context, IntoElement, ObjectFit,
    ParentElement, PREVIEW_MAX_WIDTH, SPRITE_SIZE_STEP, Selectable, SharedString, Styled,
    StyledImage, Tag, div, h_flex, img, px, render_util, v_flex,
};
use nail_tryon::SpriteStatus;
use gpui_component::StyledExt;

impl AppView {
    pub(super) fn render_live(&mut self, cx: &mut Context<'_, Self>) -> AnyElement {
        let preview = match &self.latest_image {
            Some(image) => img(image.clone())
                .size_full()
                .object_fit(ObjectFit::Contain)
                .into_any_element(),
            None => div()
                .size_full()
                .flex()
                .items_center()
                .justify_center()
                .text_sm()
                .text_color(cx.theme().muted_foreground)
                .child("Waiting for camera...")
                .into_any_element(),
        };

        let preview_shell = div()
            .w_full()
            .max_w(px(PREVIEW_MAX_WIDTH))
            .flex_1()
            .overflow_hidden()
            .rounded_lg()
            .bg(gpui::rgb(0x000000))
            .child(preview);

        v_flex()
            .size_full()
            .items_center()
            .gap_3()
            .p_4()
            .child(preview_shell)
            .child(self.render_design_row(cx))
            .child(self.render_controls_row(cx))
            .into_any_element()
    }

    fn render_design_row(&mut self, cx: &mut Context<'_, Self>) -> AnyElement {
        let selected = self.controller.selected_design();
        let mut row = h_flex().gap_2().items_center().flex_wrap();

        for design in self.controller.designs() {
            let id = design.id;
            row = row.child(
                Button::new(SharedString::from(format!("design-{}", id.0)))
                    .outline()
                    .label(design.name.clone())
                    .selected(id == selected)
                    .on_click(cx.listener(move |this, _, _, cx| {
                        this.controller.select_design(id);
                        cx.notify();
                    })),
            );
        }

        let status = match self.controller.sprite_status() {
            SpriteStatus::Ready => None,
            SpriteStatus::Loading => Some(Tag::secondary().rounded_full().child("Loading...")),
            SpriteStatus::Failed(err) => {
                Some(Tag::danger().rounded_full().child(err.user_message()))
            }
        };
        if let Some(tag) = status {
            row = row.child(tag);
        }

        row.into_any_element()
    }

    fn render_controls_row(&mut self, cx: &mut Context<'_, Self>) -> AnyElement {
        let theme = cx.theme();
        let size = self.controller.sprite_size();

        let camera_label = self
            .controller
            .active_camera()
            .map(|device| device.label.clone())
            .unwrap_or_else(|| "No camera".to_string());
        let (camera_icon, camera_color) = if self.controller.is_camera_ready() {
            ("●", theme.success)
        } else {
            ("○", theme.muted_foreground)
        };

        let size_controls = h_flex()
            .gap_1()
            .items_center()
            .child(
                Button::new(SharedString::from("sprite-size-down"))
                    .ghost()
                    .label("−")
                    .on_click(cx.listener(|this, _, _, cx| {
                        let size = this.controller.sprite_size() - SPRITE_SIZE_STEP;
                        this.controller.set_sprite_size(size);
                        cx.notify();
                    })),
            )
            .child(
                div()
                    .w(px(48.0))
                    .text_sm()
                    .text_center()
                    .text_color(theme.foreground)
                    .child(render_util::size_label(size)),
            )
            .child(
                Button::new(SharedString::from("sprite-size-up"))
                    .ghost()
                    .label("+")
                    .on_click(cx.listener(|this, _, _, cx| {
                        let size = this.controller.sprite_size() + SPRITE_SIZE_STEP;
                        this.controller.set_sprite_size(size);
                        cx.notify();
                    })),
            );

        let mut camera_info = h_flex().gap_2().items_center().child(
            div()
                .text_xs()
                .text_color(camera_color)
                .font_semibold()
                .child(format!("{camera_icon} {camera_label}")),
        );
        if self.controller.cameras().len() > 1 {
            camera_info = camera_info.child(
                Button::new(SharedString::from("switch-camera"))
                    .outline()
                    .label("Switch Camera")
                    .on_click(cx.listener(|this, _, _, cx| {
                        this.controller.cycle_camera();
                        cx.notify();
                    })),
            );
        }

        h_flex()
            .w_full()
            .max_w(px(PREVIEW_MAX_WIDTH))
            .justify_between()
            .items_center()
            .gap_3()
            .px_3()
            .py_2()
            .rounded_lg()
            .border_1()
            .border_color(theme.border)
            .bg(theme.group_box)
            .child(size_controls)
            .child(camera_info)
            .into_any_element()
    }
}
