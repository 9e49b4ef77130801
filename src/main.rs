mod authorization;
mod capture;
mod config;
mod console;
mod controller;
mod detect;
mod feedback;
#[cfg(feature = "gui")]
mod gui;
mod metadata;
mod pipeline;
mod screen;

use clap::Parser;
use config::{AppConfig, Cli, SubCommand};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(SubCommand::Devices) => cmd_devices(),
        #[cfg(feature = "gui")]
        Some(SubCommand::Gui(args)) => gui::run_gui(AppConfig::from_cli(args)),
        None => cmd_run(cli),
    }
}

fn cmd_run(cli: Cli) -> anyhow::Result<()> {
    let config = AppConfig::from_cli(cli.run);

    eprintln!("qr-scan v{}", env!("CARGO_PKG_VERSION"));
    match config.session.camera_index {
        Some(i) => {
            let name = detect::device_name(i).unwrap_or_else(|| "unknown".to_string());
            eprintln!("  Camera:     /dev/video{} ({})", i, name);
        }
        None => eprintln!("  Camera:     auto"),
    }
    if let Some((w, h)) = config.session.resolution {
        eprintln!("  Resolution: {}x{} (user-specified)", w, h);
    }
    eprintln!("  FPS:        {}", config.session.fps);
    if config.once {
        eprintln!("  Mode:       exit after first code");
    }

    console::run(config)?;
    eprintln!("Shutdown complete.");
    Ok(())
}

fn cmd_devices() -> anyhow::Result<()> {
    let cameras = detect::list_cameras();
    if cameras.is_empty() {
        eprintln!("No capture cameras found.");
        eprintln!("Hint: Check that a webcam is connected. Try: ls /dev/video*");
        return Ok(());
    }
    let default = cameras.first().map(|c| c.index);
    for cam in &cameras {
        let marker = if Some(cam.index) == default { "*" } else { " " };
        println!(
            "{} /dev/video{}  {}  ({})",
            marker, cam.index, cam.name, cam.bus_info
        );
    }
    Ok(())
}
