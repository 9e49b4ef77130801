mod app;
mod panels;

use eframe::egui;

use crate::config::AppConfig;

pub fn run_gui(config: AppConfig) -> anyhow::Result<()> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([420.0, 620.0])
            .with_min_inner_size([280.0, 420.0])
            .with_title("QR Scanner"),
        ..Default::default()
    };
    eframe::run_native(
        "QR Scanner",
        options,
        Box::new(move |_cc| Ok(Box::new(app::QrScanApp::new(config)))),
    )
    .map_err(|e| anyhow::anyhow!("{}", e))
}
