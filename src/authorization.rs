//! Camera access.
//!
//! Linux has no per-application camera consent, so consent is asked for once
//! per run unless `--allow-camera` was given. Access the OS itself refuses
//! (device node permissions) is reported as `Restricted`: nothing the user
//! answers in the app can change it.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crossbeam_channel::Sender;

use crate::controller::Event;
use crate::detect;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    NotDetermined,
    Authorized,
    Denied,
    Restricted,
}

pub trait Authorizer {
    fn status(&self) -> AuthorizationStatus;
    /// Ask the user. The answer must arrive later as
    /// [`Event::PermissionResolved`] on `reply`, never from inside this call.
    fn request_access(&mut self, reply: Sender<Event>);
}

/// Whether the OS lets this process open the given device nodes.
pub fn os_allows_access(nodes: &[PathBuf]) -> bool {
    if nodes.is_empty() {
        // Nothing to refuse; configuration will report the missing camera.
        return true;
    }
    nodes.iter().any(|path| {
        match OpenOptions::new().read(true).write(true).open(path) {
            Ok(_) => true,
            Err(e) => !matches!(e.kind(), ErrorKind::PermissionDenied),
        }
    })
}

/// An open permission question. Front-ends render it and answer it.
#[derive(Clone, Default)]
pub struct PermissionPrompt {
    pending: Arc<Mutex<Option<Sender<Event>>>>,
}

impl PermissionPrompt {
    pub fn is_open(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Deliver the user's answer. Returns false if no question was open.
    pub fn answer(&self, granted: bool) -> bool {
        let reply = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match reply {
            Some(tx) => {
                tracing::info!(granted, "Camera permission answered");
                let _ = tx.send(Event::PermissionResolved(granted));
                true
            }
            None => false,
        }
    }

    fn open(&self, reply: Sender<Event>) {
        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = Some(reply);
    }
}

pub struct PromptAuthorizer {
    pre_granted: bool,
    prompt: PermissionPrompt,
    nodes: Vec<PathBuf>,
}

impl PromptAuthorizer {
    pub fn new(pre_granted: bool) -> Self {
        PromptAuthorizer {
            pre_granted,
            prompt: PermissionPrompt::default(),
            nodes: detect::device_nodes(),
        }
    }

    /// Handle shared with the front-end that shows the question.
    pub fn prompt(&self) -> PermissionPrompt {
        self.prompt.clone()
    }
}

impl Authorizer for PromptAuthorizer {
    fn status(&self) -> AuthorizationStatus {
        if !os_allows_access(&self.nodes) {
            AuthorizationStatus::Restricted
        } else if self.pre_granted {
            AuthorizationStatus::Authorized
        } else {
            AuthorizationStatus::NotDetermined
        }
    }

    fn request_access(&mut self, reply: Sender<Event>) {
        tracing::debug!("Asking for camera permission");
        self.prompt.open(reply);
    }
}
