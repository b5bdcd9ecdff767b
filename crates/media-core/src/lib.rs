//! Media processing core for the mrcpd gateway
//!
//! This crate owns the media half of a gateway session: terminations (the
//! endpoints audio flows through), per-session mixing contexts that record
//! directed associations between terminations, and the media engine loop that
//! applies topology changes and steps the resulting bridges on a fixed tick.
//!
//! The session half (signaling, channels, orchestration) lives in
//! `mrcpd-session-core` and talks to this crate exclusively through
//! [`engine::MediaEngineHandle`] and batched task messages.

pub mod bridge;
pub mod context;
pub mod engine;
pub mod error;
pub mod rtp;
pub mod stream;
pub mod termination;
pub mod types;

pub use bridge::MediaObject;
pub use context::{ContextFactory, ContextStats, MediaContext};
pub use engine::{
    EngineEvent, EngineResponse, EngineSignal, MediaEngine, MediaEngineConfig, MediaEngineHandle,
    TaskItem, TaskKind, TaskMessageBuffer,
};
pub use error::{MediaError, Result};
pub use rtp::{RtpFactoryConfig, RtpMediaDescriptor, RtpTerminationDescriptor, RtpTerminationFactory};
pub use stream::{AudioStream, EndpointEvent, FrameBuffer, SharedEndpoint, StreamEndpoint};
pub use termination::Termination;
pub use types::{
    AudioFrame, Codec, CodecDescriptor, CodecEngine, CodecRegistry, ContextId, FrameData,
    StreamMode, TerminationId,
};
