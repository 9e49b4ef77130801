use std::collections::VecDeque;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::authorization::Authorizer;
use crate::controller::{Controller, Effect, Event, ScreenModel};
use crate::feedback::Feedback;
use crate::pipeline::CaptureSession;

pub fn event_channel() -> (Sender<Event>, Receiver<Event>) {
    unbounded()
}

/// The interface context. Owns the controller and the resources its effects
/// act on; everything here runs on the thread that owns the `Screen`.
pub struct Screen {
    controller: Controller,
    session: Box<dyn CaptureSession>,
    authorizer: Box<dyn Authorizer>,
    feedback: Box<dyn Feedback>,
    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,
}

impl Screen {
    pub fn new(
        session: Box<dyn CaptureSession>,
        authorizer: Box<dyn Authorizer>,
        feedback: Box<dyn Feedback>,
        events: (Sender<Event>, Receiver<Event>),
    ) -> Self {
        let (events_tx, events_rx) = events;
        Screen {
            controller: Controller::new(),
            session,
            authorizer,
            feedback,
            events_tx,
            events_rx,
        }
    }

    /// Read the authorization status and let the controller act on it.
    pub fn launch(&mut self) {
        let status = self.authorizer.status();
        tracing::info!(?status, "Camera authorization");
        self.dispatch(Event::Launched(status));
    }

    /// Handle one event, and any events its effects produce synchronously.
    pub fn dispatch(&mut self, event: Event) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            for effect in self.controller.handle(event) {
                if let Some(follow_up) = self.apply(effect) {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    fn apply(&mut self, effect: Effect) -> Option<Event> {
        tracing::debug!(?effect, "Applying effect");
        match effect {
            Effect::RequestPermission => {
                self.authorizer.request_access(self.events_tx.clone());
                None
            }
            Effect::Configure => {
                let result = self.session.configure();
                if result.is_ok() {
                    tracing::debug!(
                        inputs = self.session.input_count(),
                        outputs = self.session.output_count(),
                        "Pipeline configured"
                    );
                }
                Some(Event::ConfigureFinished(result))
            }
            Effect::StartSession(token) => {
                if self.session.is_running() {
                    tracing::debug!(
                        session = token.0,
                        "Previous stop still pending on the capture thread"
                    );
                }
                self.session.start_running(token);
                None
            }
            Effect::StopSession => {
                self.session.stop_running();
                None
            }
            Effect::Pulse => {
                self.feedback.pulse();
                None
            }
        }
    }

    /// Handle every event already queued. Returns whether any were.
    pub fn pump(&mut self) -> bool {
        let mut handled = false;
        while let Ok(event) = self.events_rx.try_recv() {
            self.dispatch(event);
            handled = true;
        }
        handled
    }

    /// Block up to `timeout` for the next event, then drain the queue.
    pub fn pump_timeout(&mut self, timeout: Duration) -> bool {
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => {
                self.dispatch(event);
                self.pump();
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    pub fn model(&self) -> &ScreenModel {
        self.controller.model()
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }
}
