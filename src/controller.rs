//! Screen state machine.
//!
//! The controller never touches hardware. Every input arrives as an [`Event`]
//! on the interface context and every side effect leaves as an [`Effect`]
//! for the screen runtime to carry out, so the whole screen can be driven
//! deterministically in tests.

use crate::authorization::AuthorizationStatus;
use crate::metadata::{MetadataBatch, Symbology};
use crate::pipeline::{CaptureError, SessionToken};

pub const WAITING_PROMPT: &str = "Point the camera at a QR code";
pub const SCANNING: &str = "Scanning...";
pub const PERMISSION_REQUIRED: &str = "Camera permission is required to scan QR codes";
pub const NOT_READY: &str = "Camera is not ready";
pub const NO_CAMERA: &str = "No camera available";
pub const CONFIGURING: &str = "Setting up camera...";

pub const START_LABEL: &str = "Start Scanning";
pub const RESCAN_LABEL: &str = "Scan Again";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Configuring,
    /// Configured and stopped
    Ready,
    Running,
}

impl PipelineState {
    pub fn describe(self) -> &'static str {
        match self {
            PipelineState::Idle => "Camera: Off",
            PipelineState::Configuring => "Camera: Starting",
            PipelineState::Ready => "Camera: Paused",
            PipelineState::Running => "Camera: Active",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    /// Authorization status read once the screen is built
    Launched(AuthorizationStatus),
    /// Answer to a permission prompt
    PermissionResolved(bool),
    ConfigureFinished(Result<(), CaptureError>),
    ScanTapped,
    MetadataDetected(MetadataBatch),
    SessionFailed { session: SessionToken, message: String },
    BoundsChanged(PreviewSize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    RequestPermission,
    Configure,
    StartSession(SessionToken),
    StopSession,
    Pulse,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PreviewSize {
    pub width: f32,
    pub height: f32,
}

/// Everything a front-end needs to draw the screen.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenModel {
    pub status: String,
    pub button_label: &'static str,
    pub button_enabled: bool,
    pub preview: PreviewSize,
    pub last_decoded: Option<String>,
    /// Successful decodes so far; distinguishes repeat scans of the same code
    pub scans: u32,
}

pub struct Controller {
    model: ScreenModel,
    pipeline: PipelineState,
    authorization: AuthorizationStatus,
    session: SessionToken,
    configure_failed: bool,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller {
    pub fn new() -> Self {
        Controller {
            model: ScreenModel {
                status: WAITING_PROMPT.into(),
                button_label: START_LABEL,
                button_enabled: true,
                preview: PreviewSize::default(),
                last_decoded: None,
                scans: 0,
            },
            pipeline: PipelineState::Idle,
            authorization: AuthorizationStatus::NotDetermined,
            session: SessionToken::default(),
            configure_failed: false,
        }
    }

    pub fn model(&self) -> &ScreenModel {
        &self.model
    }

    pub fn pipeline(&self) -> PipelineState {
        self.pipeline
    }

    pub fn authorization(&self) -> AuthorizationStatus {
        self.authorization
    }

    #[cfg(test)]
    pub fn session(&self) -> SessionToken {
        self.session
    }

    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        let mut effects = Vec::new();
        match event {
            Event::Launched(status) => self.authorization_changed(status, &mut effects),
            Event::PermissionResolved(granted) => {
                let status = if granted {
                    AuthorizationStatus::Authorized
                } else {
                    AuthorizationStatus::Denied
                };
                self.authorization_changed(status, &mut effects);
            }
            Event::ConfigureFinished(result) => self.configure_finished(result, &mut effects),
            Event::ScanTapped => self.scan_tapped(&mut effects),
            Event::MetadataDetected(batch) => self.metadata_detected(batch, &mut effects),
            Event::SessionFailed { session, message } => {
                if session == self.session && self.pipeline == PipelineState::Running {
                    tracing::warn!(%message, "Session failed");
                    self.pipeline = PipelineState::Ready;
                    self.model.status = message;
                }
            }
            Event::BoundsChanged(size) => self.model.preview = size,
        }
        effects
    }

    fn authorization_changed(&mut self, status: AuthorizationStatus, effects: &mut Vec<Effect>) {
        self.authorization = status;
        match status {
            AuthorizationStatus::Authorized => self.configure(effects),
            AuthorizationStatus::NotDetermined => effects.push(Effect::RequestPermission),
            AuthorizationStatus::Denied | AuthorizationStatus::Restricted => {
                tracing::info!(?status, "Camera access unavailable");
                self.model.status = PERMISSION_REQUIRED.into();
                self.model.button_enabled = false;
            }
        }
    }

    /// Only leaves `Idle`; any later state means configuration already ran.
    fn configure(&mut self, effects: &mut Vec<Effect>) {
        if self.pipeline != PipelineState::Idle {
            return;
        }
        self.pipeline = PipelineState::Configuring;
        effects.push(Effect::Configure);
    }

    fn configure_finished(&mut self, result: Result<(), CaptureError>, effects: &mut Vec<Effect>) {
        if self.pipeline != PipelineState::Configuring {
            return;
        }
        match result {
            Ok(()) => {
                self.configure_failed = false;
                self.pipeline = PipelineState::Ready;
                self.model.status = WAITING_PROMPT.into();
                self.start(effects);
            }
            Err(e) => {
                tracing::error!(error = %e, "Pipeline configuration failed");
                self.configure_failed = true;
                self.pipeline = PipelineState::Idle;
                self.model.status = match e {
                    CaptureError::NoCamera => NO_CAMERA.into(),
                    CaptureError::InputBinding(text) => text,
                };
            }
        }
    }

    fn start(&mut self, effects: &mut Vec<Effect>) {
        if self.pipeline != PipelineState::Ready {
            return;
        }
        self.session = self.session.next();
        self.pipeline = PipelineState::Running;
        effects.push(Effect::StartSession(self.session));
    }

    fn stop(&mut self, effects: &mut Vec<Effect>) {
        if self.pipeline != PipelineState::Running {
            return;
        }
        self.pipeline = PipelineState::Ready;
        effects.push(Effect::StopSession);
    }

    fn scan_tapped(&mut self, effects: &mut Vec<Effect>) {
        if !self.model.button_enabled {
            return;
        }
        match self.pipeline {
            PipelineState::Idle if self.configure_failed => {
                self.model.status = CONFIGURING.into();
                self.configure(effects);
            }
            PipelineState::Idle | PipelineState::Configuring => {
                self.model.status = NOT_READY.into();
            }
            PipelineState::Ready | PipelineState::Running => {
                self.start(effects);
                self.model.status = SCANNING.into();
            }
        }
    }

    fn metadata_detected(&mut self, batch: MetadataBatch, effects: &mut Vec<Effect>) {
        // A batch from an earlier run, or one racing a stop, must not
        // overwrite what the current run shows.
        if self.pipeline != PipelineState::Running || batch.session != self.session {
            tracing::trace!(session = batch.session.0, "Dropping stale metadata");
            return;
        }
        let Some(object) = batch.objects.first() else {
            return;
        };
        if object.symbology != Symbology::Qr {
            return;
        }
        let Some(ref text) = object.string_value else {
            return;
        };

        tracing::info!(payload = %text, "QR code decoded");
        self.model.status = text.clone();
        self.model.last_decoded = Some(text.clone());
        self.model.scans += 1;
        self.stop(effects);
        effects.push(Effect::Pulse);
        self.model.button_label = RESCAN_LABEL;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataObject;

    /// Controller that has been authorized, configured and started.
    fn running() -> Controller {
        let mut c = Controller::new();
        c.handle(Event::Launched(AuthorizationStatus::Authorized));
        c.handle(Event::ConfigureFinished(Ok(())));
        assert_eq!(c.pipeline(), PipelineState::Running);
        c
    }

    fn batch(c: &Controller, objects: Vec<MetadataObject>) -> Event {
        Event::MetadataDetected(MetadataBatch {
            session: c.session(),
            objects,
        })
    }

    #[test]
    fn test_initial_model() {
        let c = Controller::new();
        assert_eq!(c.model().status, WAITING_PROMPT);
        assert_eq!(c.model().button_label, START_LABEL);
        assert!(c.model().button_enabled);
        assert_eq!(c.pipeline(), PipelineState::Idle);
    }

    #[test]
    fn test_authorized_launch_configures_then_starts() {
        let mut c = Controller::new();
        let effects = c.handle(Event::Launched(AuthorizationStatus::Authorized));
        assert_eq!(effects, vec![Effect::Configure]);
        assert_eq!(c.pipeline(), PipelineState::Configuring);

        let effects = c.handle(Event::ConfigureFinished(Ok(())));
        assert_eq!(effects, vec![Effect::StartSession(SessionToken(1))]);
        assert_eq!(c.pipeline(), PipelineState::Running);
    }

    #[test]
    fn test_denied_disables_button() {
        for status in [AuthorizationStatus::Denied, AuthorizationStatus::Restricted] {
            let mut c = Controller::new();
            let effects = c.handle(Event::Launched(status));
            assert!(effects.is_empty());
            assert!(!c.model().button_enabled);
            assert_eq!(c.model().status, PERMISSION_REQUIRED);
        }
    }

    #[test]
    fn test_undetermined_requests_permission() {
        let mut c = Controller::new();
        let effects = c.handle(Event::Launched(AuthorizationStatus::NotDetermined));
        assert_eq!(effects, vec![Effect::RequestPermission]);

        let effects = c.handle(Event::PermissionResolved(true));
        assert_eq!(effects, vec![Effect::Configure]);
        assert_eq!(c.authorization(), AuthorizationStatus::Authorized);
    }

    #[test]
    fn test_permission_refused_disables_button() {
        let mut c = Controller::new();
        c.handle(Event::Launched(AuthorizationStatus::NotDetermined));
        let effects = c.handle(Event::PermissionResolved(false));
        assert!(effects.is_empty());
        assert_eq!(c.authorization(), AuthorizationStatus::Denied);
        assert!(!c.model().button_enabled);
        assert_eq!(c.model().status, PERMISSION_REQUIRED);

        // Disabled button ignores taps
        assert!(c.handle(Event::ScanTapped).is_empty());
        assert_eq!(c.model().status, PERMISSION_REQUIRED);
    }

    #[test]
    fn test_configure_is_requested_once() {
        let mut c = Controller::new();
        assert_eq!(
            c.handle(Event::Launched(AuthorizationStatus::Authorized)),
            vec![Effect::Configure]
        );
        assert!(c.handle(Event::PermissionResolved(true)).is_empty());

        c.handle(Event::ConfigureFinished(Ok(())));
        assert!(c.handle(Event::PermissionResolved(true)).is_empty());
        assert_eq!(c.pipeline(), PipelineState::Running);
    }

    #[test]
    fn test_tap_before_configured_reports_not_ready() {
        let mut c = Controller::new();
        let effects = c.handle(Event::ScanTapped);
        assert!(effects.is_empty());
        assert_eq!(c.model().status, NOT_READY);
        assert_eq!(c.pipeline(), PipelineState::Idle);

        c.handle(Event::Launched(AuthorizationStatus::Authorized));
        let effects = c.handle(Event::ScanTapped);
        assert!(effects.is_empty());
        assert_eq!(c.model().status, NOT_READY);
        assert_eq!(c.pipeline(), PipelineState::Configuring);
    }

    #[test]
    fn test_no_camera_message() {
        let mut c = Controller::new();
        c.handle(Event::Launched(AuthorizationStatus::Authorized));
        let effects = c.handle(Event::ConfigureFinished(Err(CaptureError::NoCamera)));
        assert!(effects.is_empty());
        assert_eq!(c.model().status, NO_CAMERA);
        assert_eq!(c.pipeline(), PipelineState::Idle);
        assert!(c.model().button_enabled);
    }

    #[test]
    fn test_binding_error_shown_verbatim() {
        let mut c = Controller::new();
        c.handle(Event::Launched(AuthorizationStatus::Authorized));
        c.handle(Event::ConfigureFinished(Err(CaptureError::InputBinding(
            "Device or resource busy".into(),
        ))));
        assert_eq!(c.model().status, "Device or resource busy");
    }

    #[test]
    fn test_tap_after_failure_retries_configuration() {
        let mut c = Controller::new();
        c.handle(Event::Launched(AuthorizationStatus::Authorized));
        c.handle(Event::ConfigureFinished(Err(CaptureError::NoCamera)));

        let effects = c.handle(Event::ScanTapped);
        assert_eq!(effects, vec![Effect::Configure]);
        assert_eq!(c.model().status, CONFIGURING);

        // A second tap while the retry is in flight does not stack another one
        assert!(c.handle(Event::ScanTapped).is_empty());
        assert_eq!(c.model().status, NOT_READY);
    }

    #[test]
    fn test_qr_decode_stops_and_relabels() {
        let mut c = running();
        let event = batch(&c, vec![MetadataObject::qr("https://example.com")]);
        let effects = c.handle(event);

        assert_eq!(effects, vec![Effect::StopSession, Effect::Pulse]);
        assert_eq!(c.model().status, "https://example.com");
        assert_eq!(c.model().last_decoded.as_deref(), Some("https://example.com"));
        assert_eq!(c.model().button_label, RESCAN_LABEL);
        assert_eq!(c.model().scans, 1);
        assert_eq!(c.pipeline(), PipelineState::Ready);
    }

    #[test]
    fn test_non_qr_object_ignored() {
        let mut c = running();
        let before = c.model().clone();
        let event = batch(
            &c,
            vec![MetadataObject {
                symbology: Symbology::Ean13,
                string_value: Some("4006381333931".into()),
            }],
        );
        assert!(c.handle(event).is_empty());
        assert_eq!(c.model(), &before);
        assert_eq!(c.pipeline(), PipelineState::Running);
    }

    #[test]
    fn test_only_first_object_considered() {
        let mut c = running();
        let event = batch(
            &c,
            vec![
                MetadataObject {
                    symbology: Symbology::Aztec,
                    string_value: Some("aztec".into()),
                },
                MetadataObject::qr("second"),
            ],
        );
        assert!(c.handle(event).is_empty());
        assert_eq!(c.model().status, WAITING_PROMPT);
    }

    #[test]
    fn test_qr_without_text_ignored() {
        let mut c = running();
        let event = batch(
            &c,
            vec![MetadataObject {
                symbology: Symbology::Qr,
                string_value: None,
            }],
        );
        assert!(c.handle(event).is_empty());
        assert_eq!(c.model().status, WAITING_PROMPT);
        assert_eq!(c.pipeline(), PipelineState::Running);
    }

    #[test]
    fn test_empty_batch_ignored() {
        let mut c = running();
        let event = batch(&c, Vec::new());
        assert!(c.handle(event).is_empty());
    }

    #[test]
    fn test_rescan_after_decode() {
        let mut c = running();
        let event = batch(&c, vec![MetadataObject::qr("first")]);
        c.handle(event);

        let effects = c.handle(Event::ScanTapped);
        assert_eq!(effects, vec![Effect::StartSession(SessionToken(2))]);
        assert_eq!(c.model().status, SCANNING);
        assert_eq!(c.pipeline(), PipelineState::Running);
        // Last decode survives until the next one
        assert_eq!(c.model().last_decoded.as_deref(), Some("first"));
    }

    #[test]
    fn test_tap_while_running_does_not_restart() {
        let mut c = running();
        assert!(c.handle(Event::ScanTapped).is_empty());
        assert_eq!(c.model().status, SCANNING);
        assert_eq!(c.session(), SessionToken(1));
    }

    #[test]
    fn test_stale_batch_after_restart_ignored() {
        let mut c = running();
        let stale = batch(&c, vec![MetadataObject::qr("old")]);
        let stale_again = stale.clone();
        c.handle(stale);
        c.handle(Event::ScanTapped);

        // Frame from run 1 delivered after run 2 started
        assert!(c.handle(stale_again).is_empty());
        assert_eq!(c.model().status, SCANNING);
        assert_eq!(c.pipeline(), PipelineState::Running);
    }

    #[test]
    fn test_batch_after_stop_ignored() {
        let mut c = running();
        c.handle(batch(&c, vec![MetadataObject::qr("a")]));
        // Same run, but delivered after the stop
        let late = batch(&c, vec![MetadataObject::qr("b")]);
        assert!(c.handle(late).is_empty());
        assert_eq!(c.model().status, "a");
    }

    #[test]
    fn test_session_failure_returns_to_ready() {
        let mut c = running();
        let session = c.session();
        c.handle(Event::SessionFailed {
            session,
            message: "Failed to start camera stream: busy".into(),
        });
        assert_eq!(c.pipeline(), PipelineState::Ready);
        assert_eq!(c.model().status, "Failed to start camera stream: busy");

        // Tapping resumes
        assert_eq!(
            c.handle(Event::ScanTapped),
            vec![Effect::StartSession(SessionToken(2))]
        );
    }

    #[test]
    fn test_stale_session_failure_ignored() {
        let mut c = running();
        c.handle(Event::SessionFailed {
            session: SessionToken(0),
            message: "old".into(),
        });
        assert_eq!(c.pipeline(), PipelineState::Running);
    }

    #[test]
    fn test_layout_matches_container() {
        let mut c = Controller::new();
        let size = PreviewSize {
            width: 320.0,
            height: 320.0,
        };
        assert!(c.handle(Event::BoundsChanged(size)).is_empty());
        assert_eq!(c.model().preview, size);
    }
}
