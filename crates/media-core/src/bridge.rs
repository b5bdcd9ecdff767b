//! Media processing objects materialised from a context topology
//!
//! Each on-cell of a context's association matrix that survives connection
//! construction becomes one of these objects. `process()` is invoked once per
//! media tick and moves one frame from the source endpoint to the sink
//! endpoint.

use tracing::trace;

use crate::stream::SharedEndpoint;

/// A constructed audio-processing object stepped by the media tick
pub trait MediaObject: Send {
    /// Move one frame across the object
    fn process(&mut self);

    /// Tear the object down before it is dropped
    fn destroy(&mut self) {}
}

/// Direct frame copy between two endpoints negotiating identical codecs
pub struct NullBridge {
    source: SharedEndpoint,
    sink: SharedEndpoint,
}

impl NullBridge {
    /// Connect `source` to `sink` without any transform
    pub fn new(source: SharedEndpoint, sink: SharedEndpoint) -> Self {
        trace!("Created null bridge");
        Self { source, sink }
    }
}

impl MediaObject for NullBridge {
    fn process(&mut self) {
        if let Some(frame) = self.source.lock().unwrap().read_frame() {
            self.sink.lock().unwrap().write_frame(frame);
        }
    }
}

/// Frame copy through decoder/encoder wrappers
///
/// The endpoints handed in here may already be wrapped by
/// [`crate::stream::Decoder`] / [`crate::stream::Encoder`]; the bridge itself
/// only moves frames.
pub struct Bridge {
    source: SharedEndpoint,
    sink: SharedEndpoint,
}

impl Bridge {
    /// Connect a (possibly wrapped) source to a (possibly wrapped) sink
    pub fn new(source: SharedEndpoint, sink: SharedEndpoint) -> Self {
        trace!("Created transcoding bridge");
        Self { source, sink }
    }
}

impl MediaObject for Bridge {
    fn process(&mut self) {
        if let Some(frame) = self.source.lock().unwrap().read_frame() {
            self.sink.lock().unwrap().write_frame(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{FrameBuffer, StreamEndpoint};
    use crate::types::{AudioFrame, FrameData};

    #[test]
    fn null_bridge_moves_one_frame_per_process() {
        let source = FrameBuffer::shared();
        let sink = FrameBuffer::shared();
        source
            .lock()
            .unwrap()
            .write_frame(AudioFrame::pcm(vec![7, 7], 8000, 1));
        source
            .lock()
            .unwrap()
            .write_frame(AudioFrame::pcm(vec![8, 8], 8000, 1));

        let mut bridge = NullBridge::new(source.clone(), sink.clone());
        bridge.process();

        let moved = sink.lock().unwrap().read_frame().unwrap();
        assert_eq!(moved.data, FrameData::Pcm(vec![7, 7]));
        // second frame still waiting at the source
        assert!(source.lock().unwrap().read_frame().is_some());
    }

    #[test]
    fn bridge_is_quiet_on_empty_source() {
        let source = FrameBuffer::shared();
        let sink = FrameBuffer::shared();
        let mut bridge = Bridge::new(source, sink.clone());
        bridge.process();
        assert!(sink.lock().unwrap().read_frame().is_none());
    }
}
