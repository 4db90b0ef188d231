//! Connection feedback: a status surface that appears only when connecting
//! takes longer than one attempt.

use std::io::Write;

use crate::endpoint::Endpoint;
use crate::health::{HealthEvent, HealthObserver};
use crate::mode::Role;

/// Visibility of the feedback surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackState {
    Hidden,
    Visible(String),
    Closing,
}

/// Something able to show connection progress to the user.
pub trait FeedbackSurface: Send {
    fn show(&mut self, endpoint: &Endpoint, message: &str);
    fn update(&mut self, message: &str);
    fn close(&mut self);
}

/// Writes progress lines to stderr.
#[derive(Debug, Default)]
pub struct TerminalSurface;

impl FeedbackSurface for TerminalSurface {
    fn show(&mut self, _endpoint: &Endpoint, message: &str) {
        let _ = writeln!(std::io::stderr(), "{message}");
    }

    fn update(&mut self, message: &str) {
        let _ = writeln!(std::io::stderr(), "{message}");
    }

    fn close(&mut self) {}
}

/// Reports progress through tracing only.
#[derive(Debug, Default)]
pub struct LogSurface;

impl FeedbackSurface for LogSurface {
    fn show(&mut self, endpoint: &Endpoint, message: &str) {
        tracing::info!(endpoint = %endpoint, "{message}");
    }

    fn update(&mut self, message: &str) {
        tracing::info!("{message}");
    }

    fn close(&mut self) {
        tracing::debug!("connection feedback closed");
    }
}

pub fn connecting_message(endpoint: &Endpoint) -> String {
    format!("Connecting to {endpoint}...")
}

pub fn retrying_message(attempt: u32, max_attempts: u32) -> String {
    format!("Retrying connection (attempt {attempt} of {max_attempts})...")
}

/// Drives a [`FeedbackSurface`] from health-check events.
///
/// Only watched endpoints can open the surface, and only the endpoint that
/// opened it can update or close it, so at most one surface is ever open.
pub struct FeedbackController<S> {
    watched: Vec<Endpoint>,
    owner: Option<Endpoint>,
    state: FeedbackState,
    surface: S,
}

impl<S: FeedbackSurface> FeedbackController<S> {
    pub fn new(watched: Vec<Endpoint>, surface: S) -> Self {
        Self {
            watched,
            owner: None,
            state: FeedbackState::Hidden,
            surface,
        }
    }

    /// Satellite watches its remote backend. Host watches nothing; its
    /// endpoints are local and failures there are fatal errors instead.
    pub fn for_role(role: Role, backend: &Endpoint, surface: S) -> Self {
        let watched = match role {
            Role::Satellite => vec![backend.clone()],
            Role::Host => Vec::new(),
        };
        Self::new(watched, surface)
    }

    pub fn state(&self) -> &FeedbackState {
        &self.state
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn into_surface(self) -> S {
        self.surface
    }

    fn is_owner(&self, endpoint: &Endpoint) -> bool {
        self.owner.as_ref() == Some(endpoint)
    }

    fn close(&mut self) {
        self.state = FeedbackState::Closing;
        self.surface.close();
        self.owner = None;
        self.state = FeedbackState::Hidden;
    }
}

impl<S: FeedbackSurface> HealthObserver for FeedbackController<S> {
    fn on_event(&mut self, event: &HealthEvent) {
        match event {
            HealthEvent::FirstFailure { endpoint } => {
                if self.owner.is_none() && self.watched.contains(endpoint) {
                    let message = connecting_message(endpoint);
                    self.surface.show(endpoint, &message);
                    self.owner = Some(endpoint.clone());
                    self.state = FeedbackState::Visible(message);
                }
            }
            HealthEvent::Retrying {
                endpoint,
                attempt,
                max_attempts,
            } => {
                if self.is_owner(endpoint) {
                    let message = retrying_message(*attempt, *max_attempts);
                    self.surface.update(&message);
                    self.state = FeedbackState::Visible(message);
                }
            }
            HealthEvent::Success { endpoint, .. } | HealthEvent::Exhausted { endpoint, .. } => {
                if self.is_owner(endpoint) {
                    self.close();
                }
            }
        }
    }
}
