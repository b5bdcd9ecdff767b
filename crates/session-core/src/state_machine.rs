//! Per-channel MRCP state machines
//!
//! A state machine enforces the request/response lifecycle of one resource
//! inside one session. The orchestrator feeds it every message touching the
//! channel and acts on the signals it returns; it never inspects the machine's
//! internal states, which are resource-specific.

use tracing::{debug, warn};

use crate::message::{MessageKind, MrcpMessage, RequestState};

/// Signal returned by a state machine update
#[derive(Debug)]
pub enum SmSignal {
    /// Route this message onward: requests to the engine channel, responses
    /// and events to the client
    Dispatch(MrcpMessage),
    /// Deactivation previously reported as pending has completed
    Deactivated,
}

/// Outcome of asking a state machine to deactivate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeactivateStatus {
    /// Nothing in flight; the machine is already quiescent
    Idle,
    /// A request is still being serviced; [`SmSignal::Deactivated`] will
    /// follow once its final event passes through
    Pending,
}

/// The state machine seam between the orchestrator and a resource
pub trait MrcpStateMachine: Send {
    /// Feed one message through the machine
    fn update(&mut self, message: MrcpMessage) -> Vec<SmSignal>;

    /// Begin deactivation
    fn deactivate(&mut self) -> DeactivateStatus;
}

/// Generic request-lifecycle state machine
///
/// Suitable for any resource whose protocol follows the plain MRCP shape:
/// one active request at a time, responses either complete it or leave it
/// in progress, and a final event closes an in-progress request. Resources
/// with richer semantics provide their own machine through
/// [`crate::profile::Resource::create_state_machine`].
pub struct DefaultStateMachine {
    resource: String,
    active_request: Option<u64>,
    deactivating: bool,
}

impl DefaultStateMachine {
    /// Create a machine for the named resource
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            active_request: None,
            deactivating: false,
        }
    }

    fn close_request(&mut self, request_id: u64) {
        if self.active_request == Some(request_id) {
            self.active_request = None;
        }
    }
}

impl MrcpStateMachine for DefaultStateMachine {
    fn update(&mut self, message: MrcpMessage) -> Vec<SmSignal> {
        let mut signals = Vec::new();
        match &message.kind {
            MessageKind::Request { method } => {
                if self.deactivating {
                    warn!(
                        "[{}] Dropping {} received while deactivating",
                        self.resource, method
                    );
                    return signals;
                }
                debug!("[{}] Request {} <{}>", self.resource, method, message.request_id);
                self.active_request = Some(message.request_id);
                signals.push(SmSignal::Dispatch(message));
            }
            MessageKind::Response { request_state, .. } => {
                if *request_state != RequestState::InProgress {
                    self.close_request(message.request_id);
                }
                signals.push(SmSignal::Dispatch(message));
            }
            MessageKind::Event { name, request_state } => {
                debug!("[{}] Event {} <{}>", self.resource, name, message.request_id);
                if *request_state == RequestState::Complete {
                    self.close_request(message.request_id);
                }
                signals.push(SmSignal::Dispatch(message));
            }
        }
        if self.deactivating && self.active_request.is_none() {
            self.deactivating = false;
            signals.push(SmSignal::Deactivated);
        }
        signals
    }

    fn deactivate(&mut self) -> DeactivateStatus {
        if self.active_request.is_none() {
            DeactivateStatus::Idle
        } else {
            debug!(
                "[{}] Deactivation pending on request <{}>",
                self.resource,
                self.active_request.unwrap_or(0)
            );
            self.deactivating = true;
            DeactivateStatus::Pending
        }
    }
}
