use clap::{Args, Parser, Subcommand};

use crate::pipeline::SessionConfig;

pub fn parse_resolution(s: &str) -> Result<(u32, u32), String> {
    let (w_str, h_str) = s
        .split_once('x')
        .or_else(|| s.split_once('X'))
        .ok_or_else(|| format!("invalid resolution '{}': expected WxH (e.g. 1280x720)", s))?;
    let w: u32 = w_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid width '{}': must be a positive integer", w_str))?;
    let h: u32 = h_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid height '{}': must be a positive integer", h_str))?;
    if w == 0 || h == 0 {
        return Err("width and height must be non-zero".into());
    }
    Ok((w, h))
}

#[derive(Parser, Debug)]
#[command(
    name = "qr-scan",
    about = "Scan QR codes from a webcam",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<SubCommand>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Subcommand, Debug)]
pub enum SubCommand {
    /// List cameras that can be scanned from
    Devices,
    #[cfg(feature = "gui")]
    /// Launch the graphical scanner
    Gui(RunArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Webcam device index (first real camera if not specified)
    #[arg(short = 'i', long)]
    pub camera_index: Option<u32>,

    /// Resolution WxH (e.g. 1280x720)
    #[arg(short = 'r', long, value_parser = parse_resolution)]
    pub resolution: Option<(u32, u32)>,

    /// Target FPS
    #[arg(short, long, default_value_t = 30, value_parser = clap::value_parser!(u32).range(1..=120))]
    pub fps: u32,

    /// Grant camera access without asking
    #[arg(long, default_value_t = false)]
    pub allow_camera: bool,

    /// No bell on a successful scan
    #[arg(short, long, default_value_t = false)]
    pub quiet: bool,

    /// Exit after the first decoded code
    #[arg(long, default_value_t = false)]
    pub once: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub allow_camera: bool,
    pub quiet: bool,
    pub once: bool,
}

impl AppConfig {
    pub fn from_cli(args: RunArgs) -> Self {
        AppConfig {
            session: SessionConfig {
                camera_index: args.camera_index,
                resolution: args.resolution,
                fps: args.fps,
            },
            allow_camera: args.allow_camera,
            quiet: args.quiet,
            once: args.once,
        }
    }
}
