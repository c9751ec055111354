//! Unhandled rejection dispatch.
//!
//! Failures of deferred jobs have no caller to return to. They are
//! dispatched to the registered listeners; when none of them prevents the
//! default, the error is logged.

use crate::error::RunnerError;
use tracing::error;

/// An asynchronous failure
#[derive(Debug)]
pub struct RejectionEvent {
    reason: RunnerError,
    default_prevented: bool,
}

impl RejectionEvent {
    /// Create an event for `reason`
    pub fn new(reason: RunnerError) -> Self {
        Self {
            reason,
            default_prevented: false,
        }
    }

    /// The failure
    pub fn reason(&self) -> &RunnerError {
        &self.reason
    }

    /// Suppress the default logging
    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    /// Whether a listener suppressed the default
    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }

    /// Take the failure out of the event
    pub fn into_reason(self) -> RunnerError {
        self.reason
    }
}

/// Listener for unhandled rejections
pub type RejectionListener = Box<dyn FnMut(&mut RejectionEvent) + Send>;

/// Registered unhandled rejection listeners
#[derive(Default)]
pub struct UnhandledRejections {
    listeners: Vec<RejectionListener>,
}

impl UnhandledRejections {
    /// Create an empty listener set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener
    pub fn add_listener(&mut self, listener: impl FnMut(&mut RejectionEvent) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Number of listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Dispatch `reason` to every listener, then apply the default.
    pub fn dispatch(&mut self, reason: RunnerError) -> RejectionEvent {
        let mut event = RejectionEvent::new(reason);
        for listener in self.listeners.iter_mut() {
            listener(&mut event);
        }
        if !event.default_prevented() {
            error!(error = %event.reason(), "Unhandled rejection");
        }
        event
    }
}
