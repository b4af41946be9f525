use super::{
    ActiveTheme, AnyElement, AppView, Button, ButtonVariants, Context, FluentBuilder, IntoElement,
    ParentElement, SharedString, Styled, Tag, div, h_flex, v_flex,
};
use nail_tryon::SessionError;
use gpui_component::StyledExt;

impl AppView {
    /// Startup card while camera and detector come up, or the error card with
    /// a retry action once startup failed.
    pub(super) fn render_status(
        &mut self,
        error: Option<&SessionError>,
        cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        let theme = cx.theme();

        let mut card = v_flex()
            .gap_3()
            .p_6()
            .rounded_lg()
            .border_1()
            .border_color(theme.border)
            .bg(theme.group_box);

        match error {
            None => {
                card = card
                    .child(
                        h_flex().gap_2().items_center().child(
                            div()
                                .text_color(theme.muted_foreground)
                                .font_semibold()
                                .child("○ Starting camera..."),
                        ),
                    )
                    .child(
                        div()
                            .text_sm()
                            .text_color(theme.muted_foreground)
                            .child(self.download_status.clone().unwrap_or_else(|| {
                                "The hand model downloads on first launch.".to_string()
                            })),
                    );
            }
            Some(err) => {
                card = card
                    .child(
                        div()
                            .text_color(theme.foreground)
                            .font_semibold()
                            .child(err.user_message()),
                    )
                    .when(err.is_permission_error(), |card| {
                        card.child(
                            div()
                                .text_sm()
                                .text_color(theme.muted_foreground)
                                .child("Allow camera access for this app in the system privacy settings."),
                        )
                    })
                    .child(Tag::danger().rounded_full().child(err.to_string()))
                    .child(
                        Button::new(SharedString::from("retry-session"))
                            .primary()
                            .label("Try Again")
                            .on_click(cx.listener(|this, _, _, cx| {
                                this.controller.retry();
                                cx.notify();
                            })),
                    );
            }
        }

        v_flex()
            .size_full()
            .items_center()
            .justify_center()
            .child(card)
            .into_any_element()
    }
}
