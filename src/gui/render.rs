//! GUI rendering functions.
//!
//! Contains UI layout and component rendering logic.

use eframe::egui::{self, Color32, RichText, TextureHandle, Vec2};

use super::state::{DecodeStatus, GuiState, format_confidence, format_positions, format_timing};
use crate::i18n::t;

/// Buttons clicked during this frame.
#[derive(Default)]
pub struct FormActions {
    pub decode: bool,
    pub reset: bool,
    pub retry: bool,
}

/// Render the URL / file inputs and the filter toggle.
pub fn render_inputs(ui: &mut egui::Ui, state: &mut GuiState) {
    let busy = state.status.is_running();

    ui.add_enabled_ui(!busy, |ui| {
        egui::Grid::new("inputs")
            .num_columns(2)
            .spacing([12.0, 8.0])
            .show(ui, |ui| {
                ui.label(t("labelUrl"));
                let mut url = state.url.clone();
                let response = ui.add(
                    egui::TextEdit::singleline(&mut url)
                        .hint_text("https://")
                        .desired_width(f32::INFINITY),
                );
                if response.changed() {
                    state.set_url(url);
                }
                ui.end_row();

                ui.label(t("labelFile"));
                let mut file = state.file_path.clone();
                let response = ui.add(
                    egui::TextEdit::singleline(&mut file)
                        .hint_text(t("hintDropFile"))
                        .desired_width(f32::INFINITY),
                );
                if response.changed() {
                    state.set_file(file);
                }
                ui.end_row();
            });

        ui.add_space(4.0);
        ui.checkbox(&mut state.enhance, t("labelEnhance"));
    });
}

/// Render the Decode / Reset / Retry buttons.
pub fn render_controls(ui: &mut egui::Ui, state: &GuiState) -> FormActions {
    let mut actions = FormActions::default();
    let busy = state.status.is_running();

    ui.add_space(8.0);
    ui.horizontal(|ui| {
        // Disabled while a decode is running
        ui.add_enabled_ui(!busy, |ui| {
            if ui.button(RichText::new(t("buttonDecode")).size(16.0)).clicked() {
                actions.decode = true;
            }
        });

        ui.add_space(12.0);

        ui.add_enabled_ui(!busy, |ui| {
            if ui.button(t("buttonReset")).clicked() {
                actions.reset = true;
            }
        });

        if state.status.is_failed() && state.last_request.is_some() {
            ui.add_space(12.0);
            if ui.button(t("buttonRetry")).clicked() {
                actions.retry = true;
            }
        }

        if busy {
            ui.add_space(12.0);
            ui.spinner();
        }
    });

    actions
}

/// Render the preview image, scaled to fit the panel width.
pub fn render_preview(ui: &mut egui::Ui, preview: Option<&TextureHandle>) {
    let Some(texture) = preview else {
        return;
    };

    ui.add_space(8.0);
    ui.separator();
    ui.add_space(8.0);

    let size = texture.size_vec2();
    let max_width = ui.available_width().min(400.0);
    let scale = if size.x > max_width { max_width / size.x } else { 1.0 };
    ui.image((texture.id(), Vec2::new(size.x * scale, size.y * scale)));
}

/// Render the result text and diagnostics.
pub fn render_result(ui: &mut egui::Ui, state: &GuiState, show_timing: bool, show_confidences: bool) {
    if matches!(state.status, DecodeStatus::Idle) {
        return;
    }

    ui.add_space(8.0);
    ui.separator();
    ui.add_space(8.0);

    let color = match &state.status {
        DecodeStatus::Idle => Color32::GRAY,
        DecodeStatus::Running(_) => Color32::from_rgb(0, 120, 200),
        DecodeStatus::Completed(_) => Color32::from_rgb(0, 150, 0),
        DecodeStatus::Failed(_) => Color32::from_rgb(200, 0, 0),
    };

    ui.horizontal(|ui| {
        ui.label(format!("{}:", t("labelResult")));
        let text = RichText::new(state.status.result_text()).color(color);
        let text = if state.status.outcome().is_some() {
            text.size(24.0).monospace().strong()
        } else {
            text
        };
        ui.label(text);
    });

    let Some(outcome) = state.status.outcome() else {
        return;
    };

    if show_timing {
        ui.add_space(4.0);
        ui.horizontal(|ui| {
            ui.label(format!("{}:", t("labelTiming")));
            ui.label(format_timing(outcome.elapsed));
        });
    }

    if !outcome.result.low_confidence_positions.is_empty() {
        ui.add_space(4.0);
        ui.label(
            RichText::new(format!(
                "{}: {}",
                t("labelLowConfidence"),
                format_positions(&outcome.result.low_confidence_positions)
            ))
            .color(Color32::from_rgb(200, 150, 0)),
        );
    }

    if show_confidences && !outcome.result.confidences.is_empty() {
        ui.add_space(4.0);
        ui.collapsing(t("labelConfidence"), |ui| {
            for confidence in &outcome.result.confidences {
                ui.monospace(format_confidence(confidence));
            }
        });
    }
}
