//! Error types for media-core
//!
//! Media failures are always scoped to a single context or termination; none
//! of them are fatal to the engine loop.

use thiserror::Error;

use crate::types::{ContextId, TerminationId};

/// Result type alias for media operations
pub type Result<T> = std::result::Result<T, MediaError>;

/// Error type covering context, termination and engine operations
#[derive(Error, Debug)]
pub enum MediaError {
    /// The context already holds its maximum number of terminations
    #[error("context capacity exhausted ({capacity} terminations)")]
    CapacityExhausted { capacity: usize },

    /// No context is registered under the given id
    #[error("unknown context: {id}")]
    UnknownContext { id: ContextId },

    /// The termination is not attached to the context it was addressed through
    #[error("unknown termination: {id}")]
    UnknownTermination { id: TerminationId },

    /// Bridging between differing sampling rates is not implemented
    #[error("sampling rate mismatch: {source_rate}Hz -> {sink}Hz (resampling is not supported)")]
    SamplingRateMismatch { source_rate: u32, sink: u32 },

    /// The RTP factory ran out of ports in its configured range
    #[error("no free RTP port in range {min}-{max}")]
    PortRangeExhausted { min: u16, max: u16 },

    /// The media engine loop is gone (channel closed)
    #[error("media engine unavailable: {reason}")]
    EngineUnavailable { reason: String },

    /// A codec engine failed to transform a frame
    #[error("codec failure: {reason}")]
    Codec { reason: String },
}

impl MediaError {
    /// Create a new engine-unavailable error
    pub fn engine_unavailable(reason: impl Into<String>) -> Self {
        Self::EngineUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a new codec failure error
    pub fn codec(reason: impl Into<String>) -> Self {
        Self::Codec {
            reason: reason.into(),
        }
    }
}
