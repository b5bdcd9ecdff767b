//! Terminations: the endpoints a media context connects
//!
//! A termination carries at most one bidirectional audio stream. Engine
//! terminations wrap the internal stream of a resource-engine channel; RTP
//! terminations additionally hold the negotiated local/remote leg and apply
//! descriptor updates to their stream.

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::rtp::{PortAllocator, RtpMediaDescriptor, RtpTerminationDescriptor};
use crate::stream::AudioStream;
use crate::types::{CodecRegistry, StreamMode, TerminationId};

/// The RTP-specific half of a termination
#[derive(Debug)]
pub(crate) struct RtpLeg {
    pub(crate) local: RtpMediaDescriptor,
    pub(crate) remote: Option<RtpMediaDescriptor>,
    pub(crate) allocator: Arc<PortAllocator>,
    pub(crate) codecs: Arc<CodecRegistry>,
}

impl Drop for RtpLeg {
    fn drop(&mut self) {
        self.allocator.release(self.local.port);
    }
}

/// An endpoint inside a media context
pub struct Termination {
    id: TerminationId,
    name: String,
    audio_stream: Option<AudioStream>,
    rtp: Option<RtpLeg>,
    /// Matrix slot, bound while the termination is attached to a context
    pub(crate) slot: Option<usize>,
}

impl Termination {
    /// Create a resource-engine termination around its channel's stream
    pub fn engine(name: impl Into<String>, stream: AudioStream) -> Self {
        Self {
            id: TerminationId::new(),
            name: name.into(),
            audio_stream: Some(stream),
            rtp: None,
            slot: None,
        }
    }

    pub(crate) fn rtp(name: impl Into<String>, stream: AudioStream, leg: RtpLeg) -> Self {
        Self {
            id: TerminationId::new(),
            name: name.into(),
            audio_stream: Some(stream),
            rtp: Some(leg),
            slot: None,
        }
    }

    /// Termination id
    pub fn id(&self) -> TerminationId {
        self.id
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The audio stream, if the termination carries one
    pub fn audio_stream(&self) -> Option<&AudioStream> {
        self.audio_stream.as_ref()
    }

    /// Mutable access to the audio stream
    pub fn audio_stream_mut(&mut self) -> Option<&mut AudioStream> {
        self.audio_stream.as_mut()
    }

    /// Direction mode of the audio stream, `NONE` when absent
    pub fn stream_mode(&self) -> StreamMode {
        self.audio_stream
            .as_ref()
            .map(|s| s.mode)
            .unwrap_or(StreamMode::NONE)
    }

    /// The local RTP media description, for RTP terminations
    pub fn local_rtp(&self) -> Option<&RtpMediaDescriptor> {
        self.rtp.as_ref().map(|leg| &leg.local)
    }

    /// Apply a termination descriptor
    ///
    /// For RTP terminations the remote media description is merged in: the
    /// stream takes the mirrored direction and the first negotiated codec, and
    /// the local leg is written back into `descriptor.audio.local` so the
    /// engine's response carries it to the session. Engine terminations have
    /// nothing to negotiate and accept any descriptor.
    pub fn modify(&mut self, descriptor: &mut RtpTerminationDescriptor) -> Result<()> {
        let Some(leg) = self.rtp.as_mut() else {
            return Ok(());
        };
        if let Some(remote) = descriptor.audio.remote.clone() {
            let mode = remote.mode.mirror();
            leg.local.mode = mode;
            leg.local.mid = remote.mid;
            leg.local.codec_list = remote.codec_list.clone();
            leg.local.ptime = remote.ptime;
            if let Some(stream) = self.audio_stream.as_mut() {
                stream.mode = mode;
                if let Some(desc) = remote.codec_list.first() {
                    let codec = leg.codecs.resolve(desc.clone());
                    stream.rx_codec = Some(codec.clone());
                    stream.tx_codec = Some(codec);
                }
            }
            debug!(
                "Modified RTP termination {}: remote {}:{} {}",
                self.id,
                remote.ip.map(|ip| ip.to_string()).unwrap_or_default(),
                remote.port,
                remote.mode
            );
            leg.remote = Some(remote);
        }
        descriptor.audio.local = Some(leg.local.clone());
        Ok(())
    }
}

impl std::fmt::Debug for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Termination")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("slot", &self.slot)
            .field("mode", &self.stream_mode())
            .field("rtp", &self.rtp.is_some())
            .finish()
    }
}
