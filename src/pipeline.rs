use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};

use crate::capture::WebcamCapture;
use crate::controller::Event;
use crate::detect;
use crate::metadata::{MetadataBatch, MetadataOutput};

/// Consecutive frame errors tolerated before a running session gives up.
const MAX_CONSECUTIVE_ERRORS: u32 = 30;

/// RGB24 frame as delivered by the camera.
#[derive(Clone)]
pub struct Frame {
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// A bound video input. Lives on the capture thread for its whole life.
pub trait FrameSource {
    /// Blocking: the driver may take hundreds of milliseconds to spin up.
    fn open_stream(&mut self) -> anyhow::Result<()>;
    fn stop_stream(&mut self);
    fn capture_frame(&mut self) -> anyhow::Result<Frame>;
    fn resolution(&self) -> (u32, u32);
}

/// Binds `(device, resolution, fps)` as a frame source. Called on the
/// capture thread; error text is shown to the user.
pub type Binder =
    Arc<dyn Fn(u32, Option<(u32, u32)>, u32) -> anyhow::Result<Box<dyn FrameSource>> + Send + Sync>;

/// Identifies one start of the session. Metadata produced by an earlier run
/// carries an older token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct SessionToken(pub u64);

impl SessionToken {
    pub fn next(self) -> Self {
        SessionToken(self.0 + 1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("no camera available")]
    NoCamera,
    /// Binding the device as input failed; the text is shown to the user as-is.
    #[error("{0}")]
    InputBinding(String),
}

/// The capture pipeline seen by the screen: one video input feeding one
/// QR metadata output.
///
/// `start_running` and `stop_running` are called from the interface context
/// and must only schedule the work; opening a camera stream blocks.
pub trait CaptureSession {
    /// Select the camera, bind it as input and install the metadata output.
    /// Calling it again on a configured session changes nothing.
    fn configure(&mut self) -> Result<(), CaptureError>;
    fn start_running(&mut self, session: SessionToken);
    fn stop_running(&mut self);
    fn is_running(&self) -> bool;
    fn input_count(&self) -> usize;
    fn output_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// `None` selects the first real capture device
    pub camera_index: Option<u32>,
    pub resolution: Option<(u32, u32)>,
    pub fps: u32,
}

enum SessionCommand {
    Start(SessionToken),
    Stop,
    Shutdown,
}

struct CaptureWorker {
    cmd_tx: Sender<SessionCommand>,
    handle: thread::JoinHandle<()>,
}

/// Camera-backed session. All camera calls happen on the `capture` thread,
/// which owns the device for the lifetime of the pipeline.
pub struct CameraPipeline {
    config: SessionConfig,
    events: Sender<Event>,
    binder: Binder,
    preview_tx: Option<Sender<Frame>>,
    worker: Option<CaptureWorker>,
    running: Arc<AtomicBool>,
    inputs: usize,
    outputs: usize,
}

impl CameraPipeline {
    pub fn new(config: SessionConfig, events: Sender<Event>) -> Self {
        Self::with_binder(config, events, Arc::new(bind_webcam))
    }

    pub fn with_binder(config: SessionConfig, events: Sender<Event>, binder: Binder) -> Self {
        CameraPipeline {
            config,
            events,
            binder,
            preview_tx: None,
            worker: None,
            running: Arc::new(AtomicBool::new(false)),
            inputs: 0,
            outputs: 0,
        }
    }

    /// Forward every captured frame to a preview surface (latest wins).
    pub fn with_preview(mut self, preview_tx: Sender<Frame>) -> Self {
        self.preview_tx = Some(preview_tx);
        self
    }

    fn select_device(&self) -> Result<u32, CaptureError> {
        match self.config.camera_index {
            Some(index) => Ok(index),
            None => detect::default_camera().ok_or(CaptureError::NoCamera),
        }
    }
}

impl CaptureSession for CameraPipeline {
    fn configure(&mut self) -> Result<(), CaptureError> {
        if self.worker.is_some() {
            tracing::debug!("Pipeline already configured");
            return Ok(());
        }

        let device = self.select_device()?;
        let SessionConfig {
            resolution, fps, ..
        } = self.config.clone();

        let binder = self.binder.clone();
        let (cmd_tx, cmd_rx) = unbounded();
        let (bound_tx, bound_rx) = bounded(1);
        let context = LoopContext {
            events: self.events.clone(),
            preview_tx: self.preview_tx.clone(),
            running: self.running.clone(),
            frame_interval: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
            output: MetadataOutput::qr_only(),
        };

        // The source is created on the capture thread; nokhwa handles are not Send.
        let handle = thread::Builder::new()
            .name("capture".into())
            .spawn(move || {
                let camera = match binder(device, resolution, fps) {
                    Ok(camera) => {
                        let _ = bound_tx.send(Ok(camera.resolution()));
                        camera
                    }
                    Err(e) => {
                        let _ = bound_tx.send(Err(format!("{}", e)));
                        return;
                    }
                };
                capture_loop(camera, cmd_rx, context);
            })
            .map_err(|e| CaptureError::InputBinding(format!("Cannot start capture thread: {}", e)))?;

        match bound_rx.recv() {
            Ok(Ok((w, h))) => {
                let name = detect::device_name(device).unwrap_or_else(|| "unknown".to_string());
                tracing::info!(device, %name, width = w, height = h, "Camera bound");
            }
            Ok(Err(msg)) => {
                join_with_panic_log(handle);
                return Err(CaptureError::InputBinding(msg));
            }
            Err(_) => {
                join_with_panic_log(handle);
                return Err(CaptureError::InputBinding(
                    "Capture thread exited while binding the camera".into(),
                ));
            }
        }

        self.worker = Some(CaptureWorker { cmd_tx, handle });
        self.inputs = 1;
        self.outputs = 1;
        Ok(())
    }

    fn start_running(&mut self, session: SessionToken) {
        match self.worker {
            Some(ref worker) => {
                let _ = worker.cmd_tx.send(SessionCommand::Start(session));
            }
            None => tracing::warn!("Start requested on an unconfigured pipeline"),
        }
    }

    fn stop_running(&mut self) {
        if let Some(ref worker) = self.worker {
            let _ = worker.cmd_tx.send(SessionCommand::Stop);
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn input_count(&self) -> usize {
        self.inputs
    }

    fn output_count(&self) -> usize {
        self.outputs
    }
}

impl Drop for CameraPipeline {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.cmd_tx.send(SessionCommand::Shutdown);
            join_with_panic_log(worker.handle);
        }
    }
}

fn bind_webcam(
    index: u32,
    resolution: Option<(u32, u32)>,
    fps: u32,
) -> anyhow::Result<Box<dyn FrameSource>> {
    let camera = WebcamCapture::bind(index, resolution, fps)?;
    Ok(Box::new(camera))
}

struct LoopContext {
    events: Sender<Event>,
    preview_tx: Option<Sender<Frame>>,
    running: Arc<AtomicBool>,
    frame_interval: Duration,
    output: MetadataOutput,
}

fn capture_loop(mut camera: Box<dyn FrameSource>, cmd_rx: Receiver<SessionCommand>, ctx: LoopContext) {
    let mut active: Option<SessionToken> = None;
    let mut consecutive_errors: u32 = 0;
    let mut fps_counter = FpsCounter::new("Capture");

    loop {
        // Stopped: park on the command queue. Running: poll it between frames.
        let command = if active.is_some() {
            match cmd_rx.try_recv() {
                Ok(cmd) => Some(cmd),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break,
            }
        } else {
            match cmd_rx.recv() {
                Ok(cmd) => Some(cmd),
                Err(_) => break,
            }
        };

        if let Some(cmd) = command {
            match cmd {
                SessionCommand::Start(token) => {
                    if active.is_none() {
                        if let Err(e) = camera.open_stream() {
                            tracing::error!(error = %e, "Stream start failed");
                            let _ = ctx.events.send(Event::SessionFailed {
                                session: token,
                                message: format!("{}", e),
                            });
                            continue;
                        }
                        let (w, h) = camera.resolution();
                        tracing::info!(width = w, height = h, "Capture running");
                        ctx.running.store(true, Ordering::SeqCst);
                        consecutive_errors = 0;
                        fps_counter = FpsCounter::new("Capture");
                    }
                    active = Some(token);
                }
                SessionCommand::Stop => {
                    if active.take().is_some() {
                        camera.stop_stream();
                        ctx.running.store(false, Ordering::SeqCst);
                        tracing::info!("Capture stopped");
                    }
                }
                SessionCommand::Shutdown => break,
            }
            continue;
        }

        let Some(token) = active else { continue };
        let start = Instant::now();

        match camera.capture_frame() {
            Ok(frame) => {
                consecutive_errors = 0;
                let objects = ctx.output.recognize(&frame);
                if let Some(ref tx) = ctx.preview_tx {
                    let _ = tx.try_send(frame);
                }
                if !objects.is_empty() {
                    let batch = MetadataBatch {
                        session: token,
                        objects,
                    };
                    if ctx.events.send(Event::MetadataDetected(batch)).is_err() {
                        tracing::debug!("Screen gone, capture thread exiting");
                        break;
                    }
                }
                fps_counter.tick();
            }
            Err(e) => {
                consecutive_errors += 1;
                // Only log the first error to avoid spam
                if consecutive_errors == 1 {
                    tracing::warn!(error = %e, "Capture error");
                }
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    camera.stop_stream();
                    ctx.running.store(false, Ordering::SeqCst);
                    active = None;
                    let _ = ctx.events.send(Event::SessionFailed {
                        session: token,
                        message: format!("Camera stopped delivering frames: {}", e),
                    });
                }
            }
        }

        // Rate limit to target FPS
        let elapsed = start.elapsed();
        if elapsed < ctx.frame_interval {
            thread::sleep(ctx.frame_interval - elapsed);
        }
    }

    camera.stop_stream();
    ctx.running.store(false, Ordering::SeqCst);
}

/// Join a thread handle and log any panic payload.
fn join_with_panic_log(handle: thread::JoinHandle<()>) {
    let name = handle.thread().name().unwrap_or("unnamed").to_string();
    if let Err(payload) = handle.join() {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        tracing::error!(thread = %name, "Thread panicked: {}", msg);
    }
}

/// Logs the capture rate every 5 seconds at debug level
struct FpsCounter {
    name: &'static str,
    count: u32,
    last_report: Instant,
}

impl FpsCounter {
    fn new(name: &'static str) -> Self {
        FpsCounter {
            name,
            count: 0,
            last_report: Instant::now(),
        }
    }

    fn tick(&mut self) {
        self.count += 1;
        let elapsed = self.last_report.elapsed();
        if elapsed >= Duration::from_secs(5) {
            let fps = self.count as f64 / elapsed.as_secs_f64();
            tracing::debug!("{} FPS: {:.1}", self.name, fps);
            self.count = 0;
            self.last_report = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn test_session_tokens_increase() {
        let first = SessionToken::default().next();
        let second = first.next();
        assert_eq!(first, SessionToken(1));
        assert!(second > first);
    }

    #[test]
    fn test_binding_error_text_is_verbatim() {
        let err = CaptureError::InputBinding("Device or resource busy".into());
        assert_eq!(err.to_string(), "Device or resource busy");
    }

    fn config() -> SessionConfig {
        SessionConfig {
            camera_index: Some(0),
            resolution: None,
            fps: 30,
        }
    }

    /// Frame source producing blank frames, optionally refusing to stream.
    struct BlankSource {
        refuse_stream: bool,
    }

    impl FrameSource for BlankSource {
        fn open_stream(&mut self) -> anyhow::Result<()> {
            if self.refuse_stream {
                anyhow::bail!("Failed to start camera stream: busy");
            }
            Ok(())
        }

        fn stop_stream(&mut self) {}

        fn capture_frame(&mut self) -> anyhow::Result<Frame> {
            Ok(Frame {
                rgb: vec![255; 16 * 16 * 3],
                width: 16,
                height: 16,
            })
        }

        fn resolution(&self) -> (u32, u32) {
            (16, 16)
        }
    }

    /// Binder that records the thread of every bind.
    fn recording_binder(
        binds: Arc<Mutex<Vec<thread::ThreadId>>>,
        result: fn() -> anyhow::Result<Box<dyn FrameSource>>,
    ) -> Binder {
        Arc::new(move |_: u32, _: Option<(u32, u32)>, _: u32| {
            binds.lock().unwrap().push(thread::current().id());
            result()
        })
    }

    fn blank() -> anyhow::Result<Box<dyn FrameSource>> {
        Ok(Box::new(BlankSource {
            refuse_stream: false,
        }))
    }

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    #[test]
    fn test_configure_twice_binds_one_input() {
        let binds = Arc::new(Mutex::new(Vec::new()));
        let (tx, _rx) = unbounded();
        let mut pipeline =
            CameraPipeline::with_binder(config(), tx, recording_binder(binds.clone(), blank));

        pipeline.configure().unwrap();
        let worker_thread = pipeline
            .worker
            .as_ref()
            .map(|w| (w.handle.thread().id(), w.handle.thread().name().map(String::from)))
            .unwrap();
        assert_eq!(worker_thread.1.as_deref(), Some("capture"));

        pipeline.configure().unwrap();
        assert_eq!(pipeline.input_count(), 1);
        assert_eq!(pipeline.output_count(), 1);
        assert_eq!(*binds.lock().unwrap(), vec![worker_thread.0]);
        assert_eq!(
            pipeline.worker.as_ref().map(|w| w.handle.thread().id()),
            Some(worker_thread.0)
        );
    }

    #[test]
    fn test_binding_failure_leaves_pipeline_unconfigured() {
        let binds = Arc::new(Mutex::new(Vec::new()));
        let (tx, _rx) = unbounded();
        let mut pipeline = CameraPipeline::with_binder(
            config(),
            tx,
            recording_binder(binds.clone(), || {
                Err(anyhow::anyhow!("Cannot open camera /dev/video0: Device or resource busy"))
            }),
        );

        assert_eq!(
            pipeline.configure(),
            Err(CaptureError::InputBinding(
                "Cannot open camera /dev/video0: Device or resource busy".into()
            ))
        );
        assert_eq!(pipeline.input_count(), 0);
        assert_eq!(pipeline.output_count(), 0);

        // Not configured, so the next attempt binds again
        assert!(pipeline.configure().is_err());
        assert_eq!(binds.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_start_and_stop_on_capture_thread() {
        let (tx, _rx) = unbounded();
        let binds = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = CameraPipeline::with_binder(config(), tx, recording_binder(binds, blank));
        pipeline.configure().unwrap();

        pipeline.start_running(SessionToken(1));
        assert!(wait_until(|| pipeline.is_running()));
        pipeline.stop_running();
        assert!(wait_until(|| !pipeline.is_running()));
    }

    #[test]
    fn test_stream_failure_reported_with_token() {
        let (tx, rx) = unbounded();
        let binds = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = CameraPipeline::with_binder(
            config(),
            tx,
            recording_binder(binds, || {
                Ok(Box::new(BlankSource {
                    refuse_stream: true,
                }) as Box<dyn FrameSource>)
            }),
        );
        pipeline.configure().unwrap();
        pipeline.start_running(SessionToken(3));

        match rx.recv_timeout(Duration::from_secs(2)) {
            Ok(Event::SessionFailed { session, message }) => {
                assert_eq!(session, SessionToken(3));
                assert_eq!(message, "Failed to start camera stream: busy");
            }
            other => panic!("expected SessionFailed, got {:?}", other),
        }
        assert!(!pipeline.is_running());
    }

    #[test]
    fn test_unconfigured_pipeline_is_inert() {
        let (tx, _rx) = unbounded();
        let mut pipeline = CameraPipeline::new(config(), tx);
        pipeline.start_running(SessionToken(1));
        pipeline.stop_running();
        assert!(!pipeline.is_running());
        assert_eq!(pipeline.input_count(), 0);
        assert_eq!(pipeline.output_count(), 0);
    }
}
