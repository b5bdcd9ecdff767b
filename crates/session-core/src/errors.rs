//! Error types for session-core
//!
//! Every error here is scoped to one session or one channel; failures surface
//! as an answer status or a terminated session, never as a process failure.

use thiserror::Error;

use crate::types::SessionId;

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Error type covering signaling and channel operations
#[derive(Error, Debug)]
pub enum SessionError {
    /// The offer referenced a resource name missing from the resource factory
    #[error("no such resource: {name}")]
    NoSuchResource { name: String },

    /// The resource exists but its engine is missing or refused the channel
    #[error("unacceptable resource: {name}")]
    UnacceptableResource { name: String },

    /// The resource could not be brought up
    #[error("unavailable resource: {name}")]
    UnavailableResource { name: String },

    /// A control message addressed a channel the session does not have
    #[error("no such channel: {resource}")]
    NoSuchChannel { resource: String },

    /// The channel exists but has no resource or state machine bound
    #[error("channel {resource} has no resource bound")]
    NoResource { resource: String },

    /// No session is registered under the given id
    #[error("no such session: {id}")]
    NoSuchSession { id: SessionId },

    /// The operation is not valid in the session's current state
    #[error("invalid session state: {details}")]
    InvalidState { details: String },

    /// The server loop or a collaborator channel is gone
    #[error("dispatch failed: {reason}")]
    Dispatch { reason: String },

    /// A media engine interaction failed
    #[error(transparent)]
    Media(#[from] mrcpd_media_core::MediaError),
}

impl SessionError {
    /// Create a new dispatch error
    pub fn dispatch(reason: impl Into<String>) -> Self {
        Self::Dispatch {
            reason: reason.into(),
        }
    }

    /// Create a new invalid-state error
    pub fn invalid_state(details: impl Into<String>) -> Self {
        Self::InvalidState {
            details: details.into(),
        }
    }
}
