use eframe::egui;

use crate::controller::{Event, PreviewSize};

use super::app::QrScanApp;

/// Height kept free under the preview for the status label and the button
const CONTROLS_HEIGHT: f32 = 110.0;
const MIN_PREVIEW_SIDE: f32 = 120.0;

pub fn scanner_panel(ctx: &egui::Context, app: &mut QrScanApp) {
    egui::CentralPanel::default().show(ctx, |ui| {
        ui.vertical_centered(|ui| {
            let available = ui.available_size();
            let side = available
                .x
                .min(available.y - CONTROLS_HEIGHT)
                .max(MIN_PREVIEW_SIDE);
            let (rect, _) = ui.allocate_exact_size(egui::vec2(side, side), egui::Sense::hover());

            // Layout pass: the preview surface tracks its container exactly
            let size = PreviewSize {
                width: rect.width(),
                height: rect.height(),
            };
            if app.screen.model().preview != size {
                app.screen.dispatch(Event::BoundsChanged(size));
            }
            paint_preview(ui, rect, app.preview_texture.as_ref());

            let model = app.screen.model().clone();
            ui.add_space(12.0);
            ui.label(egui::RichText::new(&model.status).size(18.0));
            ui.add_space(8.0);

            let button = egui::Button::new(egui::RichText::new(model.button_label).size(16.0));
            if ui.add_enabled(model.button_enabled, button).clicked() {
                app.screen.dispatch(Event::ScanTapped);
            }
        });
    });
}

fn paint_preview(ui: &egui::Ui, rect: egui::Rect, texture: Option<&egui::TextureHandle>) {
    let painter = ui.painter();
    painter.rect_filled(rect, 0.0, egui::Color32::from_gray(16));
    match texture {
        Some(tex) => {
            let uv = cover_uv(tex.size_vec2(), rect.size());
            painter.image(tex.id(), rect, uv, egui::Color32::WHITE);
        }
        None => {
            painter.text(
                rect.center(),
                egui::Align2::CENTER_CENTER,
                "No camera feed",
                egui::FontId::proportional(16.0),
                egui::Color32::from_gray(140),
            );
        }
    }
}

/// UV rectangle that crops the texture to fill `target` without stretching.
fn cover_uv(texture: egui::Vec2, target: egui::Vec2) -> egui::Rect {
    let full = egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0));
    if texture.x <= 0.0 || texture.y <= 0.0 || target.x <= 0.0 || target.y <= 0.0 {
        return full;
    }
    let tex_aspect = texture.x / texture.y;
    let target_aspect = target.x / target.y;
    if tex_aspect > target_aspect {
        let w = target_aspect / tex_aspect;
        egui::Rect::from_min_max(egui::pos2((1.0 - w) / 2.0, 0.0), egui::pos2((1.0 + w) / 2.0, 1.0))
    } else {
        let h = tex_aspect / target_aspect;
        egui::Rect::from_min_max(egui::pos2(0.0, (1.0 - h) / 2.0), egui::pos2(1.0, (1.0 + h) / 2.0))
    }
}

pub fn permission_dialog(ctx: &egui::Context, app: &mut QrScanApp) {
    if !app.prompt.is_open() {
        return;
    }
    egui::Window::new("Camera access")
        .collapsible(false)
        .resizable(false)
        .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
        .show(ctx, |ui| {
            ui.label("QR Scanner needs the camera to scan QR codes.");
            ui.add_space(8.0);
            ui.horizontal(|ui| {
                if ui.button("Allow").clicked() {
                    app.prompt.answer(true);
                }
                if ui.button("Don't Allow").clicked() {
                    app.prompt.answer(false);
                }
            });
        });
}

pub fn status_bar(ctx: &egui::Context, app: &mut QrScanApp) {
    egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
        ui.horizontal(|ui| {
            ui.label(app.screen.controller().pipeline().describe());
            ui.separator();
            ui.label(format!("Scans: {}", app.screen.model().scans));
        });
    });
}
