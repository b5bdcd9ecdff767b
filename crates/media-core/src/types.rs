//! Core media types shared across the crate
//!
//! Identifier newtypes, stream direction modes, audio frames, and the codec
//! descriptor/engine seam. Concrete codec implementations live outside this
//! crate; here a codec is a wire descriptor plus an optional transform engine.

use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Unique identifier of a termination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TerminationId(Uuid);

impl TerminationId {
    /// Generate a fresh termination id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TerminationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TerminationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "term-{}", &self.0.simple().to_string()[..8])
    }
}

/// Unique identifier of a media context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(Uuid);

impl ContextId {
    /// Generate a fresh context id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", &self.0.simple().to_string()[..8])
    }
}

/// Direction mode of an audio stream: any subset of {send, receive}
///
/// `SEND` means the stream emits frames toward its far end and is therefore a
/// valid bridge sink; `RECEIVE` means the stream produces frames from its far
/// end and is a valid bridge source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMode(u8);

impl StreamMode {
    /// Inactive stream
    pub const NONE: StreamMode = StreamMode(0);
    /// Stream sends toward its far end (bridge sink)
    pub const SEND: StreamMode = StreamMode(1);
    /// Stream receives from its far end (bridge source)
    pub const RECEIVE: StreamMode = StreamMode(2);
    /// Bidirectional stream
    pub const SEND_RECEIVE: StreamMode = StreamMode(3);

    /// Whether every bit of `other` is set in `self`
    pub fn contains(self, other: StreamMode) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no direction is set
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Swap the send and receive bits
    ///
    /// The local leg of an RTP termination runs in the mirror image of the
    /// remote description: a far end that only sends is a local stream that
    /// only receives.
    pub fn mirror(self) -> StreamMode {
        StreamMode(((self.0 & 1) << 1) | ((self.0 & 2) >> 1))
    }
}

impl Default for StreamMode {
    fn default() -> Self {
        Self::NONE
    }
}

impl BitOr for StreamMode {
    type Output = StreamMode;

    fn bitor(self, rhs: StreamMode) -> StreamMode {
        StreamMode(self.0 | rhs.0)
    }
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self.0 {
            0 => "inactive",
            1 => "sendonly",
            2 => "recvonly",
            _ => "sendrecv",
        };
        write!(f, "{}", s)
    }
}

/// Payload carried by an audio frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameData {
    /// Raw interleaved 16-bit PCM samples
    Pcm(Vec<i16>),
    /// Still-encoded payload as read off an RTP leg or produced by an encoder
    Encoded(Bytes),
}

/// One frame of audio moving through a context
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Frame payload
    pub data: FrameData,
    /// Sampling rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u8,
}

impl AudioFrame {
    /// Create a PCM frame
    pub fn pcm(samples: Vec<i16>, sample_rate: u32, channels: u8) -> Self {
        Self {
            data: FrameData::Pcm(samples),
            sample_rate,
            channels,
        }
    }

    /// Create an encoded frame
    pub fn encoded(payload: Bytes, sample_rate: u32, channels: u8) -> Self {
        Self {
            data: FrameData::Encoded(payload),
            sample_rate,
            channels,
        }
    }
}

/// Wire-level description of a codec, as negotiated per media line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecDescriptor {
    /// RTP payload type
    pub payload_type: u8,
    /// Encoding name as it appears in `a=rtpmap`
    pub name: String,
    /// Sampling rate in Hz
    pub sampling_rate: u32,
    /// Number of channels
    pub channel_count: u8,
}

impl CodecDescriptor {
    /// G.711 μ-law, the default telephony codec
    pub fn pcmu() -> Self {
        Self {
            payload_type: 0,
            name: "PCMU".to_string(),
            sampling_rate: 8000,
            channel_count: 1,
        }
    }

    /// G.711 A-law
    pub fn pcma() -> Self {
        Self {
            payload_type: 8,
            name: "PCMA".to_string(),
            sampling_rate: 8000,
            channel_count: 1,
        }
    }

    /// Linear 16-bit PCM
    pub fn l16(sampling_rate: u32) -> Self {
        Self {
            payload_type: 96,
            name: "L16".to_string(),
            sampling_rate,
            channel_count: 1,
        }
    }

    /// Field-for-field match: same encoding name (case-insensitive, per SDP),
    /// sampling rate and channel count
    pub fn matches(&self, other: &CodecDescriptor) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
            && self.sampling_rate == other.sampling_rate
            && self.channel_count == other.channel_count
    }
}

impl fmt::Display for CodecDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.name, self.sampling_rate, self.channel_count)
    }
}

/// Transform half of a codec: turns encoded frames into PCM and back
///
/// A codec that has no engine is a pass-through payload; connection
/// construction inserts decoders/encoders only where an engine exists.
pub trait CodecEngine: Send + Sync {
    /// Decode one encoded frame into PCM
    fn decode(&self, frame: &AudioFrame) -> Result<AudioFrame>;
    /// Encode one PCM frame
    fn encode(&self, frame: &AudioFrame) -> Result<AudioFrame>;
}

/// A negotiated codec: descriptor plus optional transform engine
#[derive(Clone)]
pub struct Codec {
    /// Wire description
    pub descriptor: CodecDescriptor,
    /// Transform engine, when the deployment registered one for this name
    pub engine: Option<Arc<dyn CodecEngine>>,
}

impl Codec {
    /// A codec with no transform engine (frames pass through encoded)
    pub fn passthrough(descriptor: CodecDescriptor) -> Self {
        Self {
            descriptor,
            engine: None,
        }
    }

    /// A codec backed by a transform engine
    pub fn with_engine(descriptor: CodecDescriptor, engine: Arc<dyn CodecEngine>) -> Self {
        Self {
            descriptor,
            engine: Some(engine),
        }
    }

    /// Whether this codec defines a decode transform
    pub fn can_decode(&self) -> bool {
        self.engine.is_some()
    }

    /// Whether this codec defines an encode transform
    pub fn can_encode(&self) -> bool {
        self.engine.is_some()
    }
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec")
            .field("descriptor", &self.descriptor)
            .field("engine", &self.engine.is_some())
            .finish()
    }
}

/// Registry of codec engines by encoding name
///
/// The RTP termination factory resolves negotiated descriptors against this
/// registry; names without an entry become pass-through codecs.
#[derive(Default, Clone)]
pub struct CodecRegistry {
    engines: HashMap<String, Arc<dyn CodecEngine>>,
}

impl CodecRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an engine under an encoding name
    pub fn register(&mut self, name: impl Into<String>, engine: Arc<dyn CodecEngine>) {
        self.engines.insert(name.into().to_ascii_uppercase(), engine);
    }

    /// Resolve a descriptor into a codec, attaching an engine when one is
    /// registered for its encoding name
    pub fn resolve(&self, descriptor: CodecDescriptor) -> Codec {
        match self.engines.get(&descriptor.name.to_ascii_uppercase()) {
            Some(engine) => Codec::with_engine(descriptor, engine.clone()),
            None => Codec::passthrough(descriptor),
        }
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("engines", &self.engines.keys().collect::<Vec<_>>())
            .finish()
    }
}
