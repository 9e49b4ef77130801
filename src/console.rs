use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, TryRecvError};

use crate::authorization::{AuthorizationStatus, PermissionPrompt, PromptAuthorizer};
use crate::config::AppConfig;
use crate::controller::{Event, PipelineState};
use crate::feedback;
use crate::pipeline::CameraPipeline;
use crate::screen::{self, Screen};

/// How long the loop waits on screen events before checking input again.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Answer(bool),
    Tap,
    Quit,
    Unknown,
}

fn parse_input(line: &str, prompt_open: bool) -> Input {
    let line = line.trim().to_ascii_lowercase();
    if prompt_open {
        return match line.as_str() {
            "y" | "yes" => Input::Answer(true),
            "" | "n" | "no" => Input::Answer(false),
            "q" | "quit" => Input::Quit,
            _ => Input::Unknown,
        };
    }
    match line.as_str() {
        "" => Input::Tap,
        "q" | "quit" => Input::Quit,
        _ => Input::Unknown,
    }
}

fn permission_hint(status: AuthorizationStatus) -> &'static str {
    match status {
        AuthorizationStatus::Restricted => {
            "check permissions on /dev/video* (is this user in the 'video' group?)"
        }
        _ => "pass --allow-camera to grant camera access up front",
    }
}

/// Reads stdin lines on its own thread; the loop never blocks on the terminal.
fn spawn_input_reader() -> anyhow::Result<Receiver<String>> {
    let (tx, rx) = unbounded();
    thread::Builder::new().name("input".into()).spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if tx.send(l).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    })?;
    Ok(rx)
}

/// What has already been written to the terminal.
#[derive(Default)]
struct Shown {
    status: Option<String>,
    label: Option<&'static str>,
    camera: Option<PipelineState>,
    scans: u32,
    prompt: bool,
}

fn render(screen: &Screen, prompt: &PermissionPrompt, shown: &mut Shown) {
    let model = screen.model();

    let camera = screen.controller().pipeline();
    if shown.camera != Some(camera) {
        eprintln!("  {}", camera.describe());
        shown.camera = Some(camera);
    }

    if model.scans != shown.scans {
        shown.scans = model.scans;
        if let Some(ref text) = model.last_decoded {
            // Payloads go to stdout so they can be piped; everything else is stderr.
            println!("{}", text);
            let _ = std::io::stdout().flush();
        }
    } else if shown.status.as_deref() != Some(model.status.as_str()) {
        eprintln!("  Status:  {}", model.status);
    }
    shown.status = Some(model.status.clone());

    if model.button_enabled && shown.label != Some(model.button_label) {
        eprintln!("  [Enter] {}   [q] Quit", model.button_label);
        shown.label = Some(model.button_label);
    }

    let open = prompt.is_open();
    if open && !shown.prompt {
        eprint!("  Allow qr-scan to use the camera? [y/N] ");
        let _ = std::io::stderr().flush();
    }
    shown.prompt = open;
}

pub fn run(config: AppConfig) -> anyhow::Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_ctrlc = shutdown.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        shutdown_ctrlc.store(true, Ordering::SeqCst);
    })?;

    let events = screen::event_channel();
    let pipeline = CameraPipeline::new(config.session.clone(), events.0.clone());
    let authorizer = PromptAuthorizer::new(config.allow_camera);
    let prompt = authorizer.prompt();
    let mut screen = Screen::new(
        Box::new(pipeline),
        Box::new(authorizer),
        feedback::from_config(config.quiet),
        events,
    );

    let input_rx = spawn_input_reader()?;
    let mut input_open = true;
    let mut shown = Shown::default();

    screen.launch();

    while !shutdown.load(Ordering::Relaxed) {
        render(&screen, &prompt, &mut shown);

        if config.once && screen.model().scans > 0 {
            break;
        }
        if !screen.model().button_enabled {
            return Err(anyhow::anyhow!(
                "{}.\nHint: {}",
                screen.model().status,
                permission_hint(screen.controller().authorization())
            ));
        }

        while input_open {
            let line = match input_rx.try_recv() {
                Ok(line) => line,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    // stdin closed: keep scanning, there is just nobody to tap
                    input_open = false;
                    break;
                }
            };
            match parse_input(&line, prompt.is_open()) {
                Input::Answer(granted) => {
                    prompt.answer(granted);
                }
                Input::Tap => screen.dispatch(Event::ScanTapped),
                Input::Quit => shutdown.store(true, Ordering::SeqCst),
                Input::Unknown => eprintln!("  Unknown input '{}'", line.trim()),
            }
        }
        if !input_open && prompt.is_open() {
            eprintln!();
            prompt.answer(false);
        }

        screen.pump_timeout(POLL_INTERVAL);
    }

    // Dropping the screen stops the capture thread
    drop(screen);
    Ok(())
}
