//! Audio streams and stream endpoints
//!
//! A termination exposes at most one [`AudioStream`]. The stream's endpoint is
//! the actual frame source/sink, shared between the media engine loop (which
//! drives bridges over it) and whatever feeds it from outside: a resource
//! engine plugin or an RTP leg. Decoder/encoder wrappers are inserted around
//! endpoints during connection construction, never stored on the stream
//! itself.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::types::{AudioFrame, Codec, FrameData, StreamMode};

/// Default number of frames a buffer holds before overrunning
pub const DEFAULT_FRAME_BUFFER_DEPTH: usize = 8;

/// Out-of-band condition raised by an endpoint, reported as an engine event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointEvent {
    /// Frames were dropped because the buffer was full
    BufferOverrun { dropped: u64 },
}

/// A frame source/sink an audio stream is attached to
pub trait StreamEndpoint: Send {
    /// Pop the next frame, if one is available
    fn read_frame(&mut self) -> Option<AudioFrame>;

    /// Push a frame into the endpoint
    fn write_frame(&mut self, frame: AudioFrame);

    /// Drain a pending out-of-band condition, if any
    fn take_event(&mut self) -> Option<EndpointEvent> {
        None
    }
}

/// Shared handle to a stream endpoint
pub type SharedEndpoint = Arc<Mutex<dyn StreamEndpoint>>;

/// Bounded FIFO of audio frames
///
/// The standard endpoint implementation. Writers that outrun readers lose the
/// oldest frame; the loss is surfaced once as a [`EndpointEvent::BufferOverrun`].
pub struct FrameBuffer {
    queue: VecDeque<AudioFrame>,
    depth: usize,
    dropped: u64,
}

impl FrameBuffer {
    /// Create a buffer holding up to `depth` frames
    pub fn new(depth: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(depth),
            depth,
            dropped: 0,
        }
    }

    /// Create a shared endpoint around a buffer of the default depth
    pub fn shared() -> SharedEndpoint {
        Arc::new(Mutex::new(Self::new(DEFAULT_FRAME_BUFFER_DEPTH)))
    }

    /// Create a shared endpoint with an explicit depth
    pub fn shared_with_depth(depth: usize) -> SharedEndpoint {
        Arc::new(Mutex::new(Self::new(depth)))
    }

    /// Number of buffered frames
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl StreamEndpoint for FrameBuffer {
    fn read_frame(&mut self) -> Option<AudioFrame> {
        self.queue.pop_front()
    }

    fn write_frame(&mut self, frame: AudioFrame) {
        if self.queue.len() == self.depth {
            self.queue.pop_front();
            self.dropped += 1;
        }
        self.queue.push_back(frame);
    }

    fn take_event(&mut self) -> Option<EndpointEvent> {
        if self.dropped > 0 {
            let dropped = self.dropped;
            self.dropped = 0;
            Some(EndpointEvent::BufferOverrun { dropped })
        } else {
            None
        }
    }
}

/// Decoder wrapper: reads encoded frames from an inner endpoint and yields PCM
pub struct Decoder {
    inner: SharedEndpoint,
    codec: Codec,
}

impl Decoder {
    /// Wrap an endpoint with the decode transform of `codec`
    pub fn wrap(inner: SharedEndpoint, codec: Codec) -> SharedEndpoint {
        Arc::new(Mutex::new(Self { inner, codec }))
    }
}

impl StreamEndpoint for Decoder {
    fn read_frame(&mut self) -> Option<AudioFrame> {
        let frame = self.inner.lock().unwrap().read_frame()?;
        match (&frame.data, &self.codec.engine) {
            (FrameData::Encoded(_), Some(engine)) => match engine.decode(&frame) {
                Ok(decoded) => Some(decoded),
                Err(e) => {
                    warn!("Dropping frame, decode failed: {}", e);
                    None
                }
            },
            _ => Some(frame),
        }
    }

    fn write_frame(&mut self, frame: AudioFrame) {
        self.inner.lock().unwrap().write_frame(frame);
    }
}

/// Encoder wrapper: encodes PCM frames before writing them to an inner endpoint
pub struct Encoder {
    inner: SharedEndpoint,
    codec: Codec,
}

impl Encoder {
    /// Wrap an endpoint with the encode transform of `codec`
    pub fn wrap(inner: SharedEndpoint, codec: Codec) -> SharedEndpoint {
        Arc::new(Mutex::new(Self { inner, codec }))
    }
}

impl StreamEndpoint for Encoder {
    fn read_frame(&mut self) -> Option<AudioFrame> {
        self.inner.lock().unwrap().read_frame()
    }

    fn write_frame(&mut self, frame: AudioFrame) {
        match (&frame.data, &self.codec.engine) {
            (FrameData::Pcm(_), Some(engine)) => match engine.encode(&frame) {
                Ok(encoded) => self.inner.lock().unwrap().write_frame(encoded),
                Err(e) => warn!("Dropping frame, encode failed: {}", e),
            },
            _ => self.inner.lock().unwrap().write_frame(frame),
        }
    }
}

/// The audio stream of a termination
#[derive(Clone)]
pub struct AudioStream {
    /// Direction mode
    pub mode: StreamMode,
    /// Codec of frames read from this stream (receive direction)
    pub rx_codec: Option<Codec>,
    /// Codec of frames written to this stream (send direction)
    pub tx_codec: Option<Codec>,
    /// The frame source/sink itself
    pub endpoint: SharedEndpoint,
}

impl AudioStream {
    /// Create a stream over an endpoint
    pub fn new(mode: StreamMode, endpoint: SharedEndpoint) -> Self {
        Self {
            mode,
            rx_codec: None,
            tx_codec: None,
            endpoint,
        }
    }

    /// Create a stream with the same codec in both directions
    pub fn with_codec(mode: StreamMode, codec: Codec, endpoint: SharedEndpoint) -> Self {
        Self {
            mode,
            rx_codec: Some(codec.clone()),
            tx_codec: Some(codec),
            endpoint,
        }
    }
}

impl std::fmt::Debug for AudioStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioStream")
            .field("mode", &self.mode)
            .field("rx_codec", &self.rx_codec)
            .field("tx_codec", &self.tx_codec)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_buffer_is_fifo() {
        let mut buf = FrameBuffer::new(4);
        buf.write_frame(AudioFrame::pcm(vec![1], 8000, 1));
        buf.write_frame(AudioFrame::pcm(vec![2], 8000, 1));
        assert_eq!(buf.read_frame().unwrap().data, FrameData::Pcm(vec![1]));
        assert_eq!(buf.read_frame().unwrap().data, FrameData::Pcm(vec![2]));
        assert!(buf.read_frame().is_none());
    }

    #[test]
    fn frame_buffer_overrun_drops_oldest_and_raises_event() {
        let mut buf = FrameBuffer::new(2);
        for i in 0..3 {
            buf.write_frame(AudioFrame::pcm(vec![i], 8000, 1));
        }
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.read_frame().unwrap().data, FrameData::Pcm(vec![1]));
        assert_eq!(buf.take_event(), Some(EndpointEvent::BufferOverrun { dropped: 1 }));
        assert_eq!(buf.take_event(), None);
    }
}
