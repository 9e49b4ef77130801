use std::time::Duration;

use crossbeam_channel::{bounded, Receiver};
use eframe::egui;

use crate::authorization::{PermissionPrompt, PromptAuthorizer};
use crate::config::AppConfig;
use crate::feedback;
use crate::pipeline::{CameraPipeline, Frame};
use crate::screen::{self, Screen};

use super::panels;

/// Capture events are not tied to egui input, so the UI polls at roughly camera rate.
const REPAINT_INTERVAL: Duration = Duration::from_millis(33);

pub struct QrScanApp {
    pub screen: Screen,
    pub prompt: PermissionPrompt,
    pub preview_texture: Option<egui::TextureHandle>,
    preview_rx: Receiver<Frame>,
}

impl QrScanApp {
    pub fn new(config: AppConfig) -> Self {
        let events = screen::event_channel();
        let (preview_tx, preview_rx) = bounded(1);
        let pipeline =
            CameraPipeline::new(config.session.clone(), events.0.clone()).with_preview(preview_tx);
        let authorizer = PromptAuthorizer::new(config.allow_camera);
        let prompt = authorizer.prompt();

        let mut screen = Screen::new(
            Box::new(pipeline),
            Box::new(authorizer),
            feedback::from_config(config.quiet),
            events,
        );
        screen.launch();

        Self {
            screen,
            prompt,
            preview_texture: None,
            preview_rx,
        }
    }

    /// Upload the latest captured frame as the preview texture
    fn poll_preview_frames(&mut self, ctx: &egui::Context) {
        let mut latest = None;
        while let Ok(frame) = self.preview_rx.try_recv() {
            latest = Some(frame);
        }
        let Some(frame) = latest else {
            return;
        };

        let image =
            egui::ColorImage::from_rgb([frame.width as usize, frame.height as usize], &frame.rgb);
        match &mut self.preview_texture {
            Some(tex) => tex.set(image, egui::TextureOptions::LINEAR),
            None => {
                self.preview_texture =
                    Some(ctx.load_texture("camera-preview", image, egui::TextureOptions::LINEAR));
            }
        }
    }
}

impl eframe::App for QrScanApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_preview_frames(ctx);
        self.screen.pump();

        panels::status_bar(ctx, self);
        panels::scanner_panel(ctx, self);
        panels::permission_dialog(ctx, self);

        ctx.request_repaint_after(REPAINT_INTERVAL);
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        tracing::info!(scans = self.screen.model().scans, "Scanner window closed");
    }
}
