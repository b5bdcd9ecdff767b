//! Per-session media contexts and their factory
//!
//! A context is a fixed-capacity square matrix of directed association bits
//! over the terminations attached to it, plus the list of media objects last
//! materialised from that matrix. The factory owns every context and keeps a
//! processing ring of the populated ones; the media engine drives
//! `factory.process()` on each tick.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::bridge::{Bridge, MediaObject, NullBridge};
use crate::error::{MediaError, Result};
use crate::stream::{Decoder, Encoder};
use crate::termination::Termination;
use crate::types::{ContextId, StreamMode, TerminationId};

struct HeaderItem {
    termination: Option<Termination>,
    tx_count: usize,
    rx_count: usize,
}

/// Counters describing one context, used by embedders and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextStats {
    /// Attached terminations
    pub termination_count: usize,
    /// Directed associations currently on
    pub association_count: usize,
    /// Media objects materialised by the last topology apply
    pub object_count: usize,
    /// Whether the context sits in the factory's processing ring
    pub in_ring: bool,
}

/// Association matrix over up to `capacity` terminations
pub struct MediaContext {
    id: ContextId,
    capacity: usize,
    count: usize,
    header: Vec<HeaderItem>,
    matrix: Vec<bool>,
    objects: Vec<Box<dyn MediaObject>>,
}

impl MediaContext {
    /// Create an empty context for at most `capacity` terminations
    pub fn new(id: ContextId, capacity: usize) -> Self {
        let mut header = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            header.push(HeaderItem {
                termination: None,
                tx_count: 0,
                rx_count: 0,
            });
        }
        Self {
            id,
            capacity,
            count: 0,
            header,
            matrix: vec![false; capacity * capacity],
            objects: Vec::new(),
        }
    }

    /// Context id
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Maximum number of terminations
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of terminations
    pub fn count(&self) -> usize {
        self.count
    }

    /// Whether no termination is attached
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn cell(&self, i: usize, j: usize) -> bool {
        self.matrix[i * self.capacity + j]
    }

    fn set_cell(&mut self, i: usize, j: usize, on: bool) {
        self.matrix[i * self.capacity + j] = on;
    }

    /// Slot index of a termination, if attached
    pub fn slot_of(&self, id: TerminationId) -> Option<usize> {
        self.header.iter().position(|h| {
            h.termination
                .as_ref()
                .map(|t| t.id() == id)
                .unwrap_or(false)
        })
    }

    /// Shared access to an attached termination
    pub fn termination(&self, id: TerminationId) -> Option<&Termination> {
        let slot = self.slot_of(id)?;
        self.header[slot].termination.as_ref()
    }

    /// Mutable access to an attached termination
    pub fn termination_mut(&mut self, id: TerminationId) -> Option<&mut Termination> {
        let slot = self.slot_of(id)?;
        self.header[slot].termination.as_mut()
    }

    /// `(tx_count, rx_count)` of a slot
    pub fn counts(&self, slot: usize) -> (usize, usize) {
        (self.header[slot].tx_count, self.header[slot].rx_count)
    }

    /// Whether the directed association `from -> to` is on
    pub fn association_on(&self, from: TerminationId, to: TerminationId) -> bool {
        match (self.slot_of(from), self.slot_of(to)) {
            (Some(i), Some(j)) => self.cell(i, j),
            _ => false,
        }
    }

    /// Total number of on cells
    pub fn association_count(&self) -> usize {
        self.matrix.iter().filter(|&&on| on).count()
    }

    /// Number of materialised media objects
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Attach a termination to the first free slot
    ///
    /// Returns the slot index. Fails when the context is full.
    pub fn add_termination(&mut self, mut termination: Termination) -> Result<usize> {
        let Some(slot) = self.header.iter().position(|h| h.termination.is_none()) else {
            return Err(MediaError::CapacityExhausted {
                capacity: self.capacity,
            });
        };
        debug!("Add termination {} to {} slot {}", termination.id(), self.id, slot);
        termination.slot = Some(slot);
        self.header[slot] = HeaderItem {
            termination: Some(termination),
            tx_count: 0,
            rx_count: 0,
        };
        self.count += 1;
        Ok(slot)
    }

    /// Detach a termination, clearing its row and column
    ///
    /// Returns the termination so the caller can release its resources.
    pub fn subtract_termination(&mut self, id: TerminationId) -> Result<Termination> {
        let Some(i) = self.slot_of(id) else {
            return Err(MediaError::UnknownTermination { id });
        };
        debug!("Subtract termination {} from {} slot {}", id, self.id, i);
        for j in 0..self.capacity {
            if self.header[j].termination.is_none() {
                continue;
            }
            if self.cell(i, j) {
                self.set_cell(i, j, false);
                self.header[i].tx_count -= 1;
                self.header[j].rx_count -= 1;
            }
            if self.cell(j, i) {
                self.set_cell(j, i, false);
                self.header[j].tx_count -= 1;
                self.header[i].rx_count -= 1;
            }
        }
        let mut termination = self.header[i].termination.take().ok_or(
            MediaError::UnknownTermination { id },
        )?;
        self.header[i].tx_count = 0;
        self.header[i].rx_count = 0;
        termination.slot = None;
        self.count -= 1;
        Ok(termination)
    }

    /// Admit the directed associations between two terminations
    ///
    /// Each direction is considered independently and only turned on when the
    /// source stream can receive and the sink stream can send.
    pub fn add_association(&mut self, a: TerminationId, b: TerminationId) -> Result<()> {
        let i = self
            .slot_of(a)
            .ok_or(MediaError::UnknownTermination { id: a })?;
        let j = self
            .slot_of(b)
            .ok_or(MediaError::UnknownTermination { id: b })?;

        if !self.cell(i, j) && self.modes_compatible(i, j) {
            self.set_cell(i, j, true);
            self.header[i].tx_count += 1;
            self.header[j].rx_count += 1;
        }
        if !self.cell(j, i) && self.modes_compatible(j, i) {
            self.set_cell(j, i, true);
            self.header[j].tx_count += 1;
            self.header[i].rx_count += 1;
        }
        Ok(())
    }

    /// Clear the directed associations between two terminations
    pub fn remove_association(&mut self, a: TerminationId, b: TerminationId) -> Result<()> {
        let i = self
            .slot_of(a)
            .ok_or(MediaError::UnknownTermination { id: a })?;
        let j = self
            .slot_of(b)
            .ok_or(MediaError::UnknownTermination { id: b })?;

        if self.cell(i, j) {
            self.set_cell(i, j, false);
            self.header[i].tx_count -= 1;
            self.header[j].rx_count -= 1;
        }
        if self.cell(j, i) {
            self.set_cell(j, i, false);
            self.header[j].tx_count -= 1;
            self.header[i].rx_count -= 1;
        }
        Ok(())
    }

    /// Destroy the topology and clear every association
    pub fn reset_associations(&mut self) {
        self.destroy_topology();
        let mut seen = 0;
        for i in 0..self.capacity {
            if seen == self.count {
                break;
            }
            if self.header[i].termination.is_none() {
                continue;
            }
            seen += 1;
            if self.header[i].tx_count == 0 && self.header[i].rx_count == 0 {
                continue;
            }
            for j in i..self.capacity {
                if self.header[j].termination.is_none() {
                    continue;
                }
                if self.cell(i, j) {
                    self.set_cell(i, j, false);
                    self.header[i].tx_count -= 1;
                    self.header[j].rx_count -= 1;
                }
                if self.cell(j, i) {
                    self.set_cell(j, i, false);
                    self.header[j].tx_count -= 1;
                    self.header[i].rx_count -= 1;
                }
            }
        }
    }

    /// Materialise the matrix into media objects
    ///
    /// Any previous topology is destroyed first. Every on cell whose endpoints
    /// survive connection construction produces one object.
    pub fn apply_topology(&mut self) {
        self.destroy_topology();
        let mut seen = 0;
        for i in 0..self.capacity {
            if seen == self.count {
                break;
            }
            if self.header[i].termination.is_none() {
                continue;
            }
            seen += 1;
            if self.header[i].tx_count == 0 && self.header[i].rx_count == 0 {
                continue;
            }
            for j in i..self.capacity {
                if self.header[j].termination.is_none() {
                    continue;
                }
                if self.cell(i, j) {
                    if let Some(object) = self.connection_create(i, j) {
                        self.objects.push(object);
                    }
                }
                if i != j && self.cell(j, i) {
                    if let Some(object) = self.connection_create(j, i) {
                        self.objects.push(object);
                    }
                }
            }
        }
        debug!(
            "Applied topology on {}: {} association(s), {} object(s)",
            self.id,
            self.association_count(),
            self.objects.len()
        );
    }

    /// Destroy the materialised topology, leaving the matrix untouched
    pub fn destroy_topology(&mut self) {
        for object in self.objects.iter_mut() {
            object.destroy();
        }
        self.objects.clear();
    }

    /// Step every materialised object once, in insertion order
    pub fn process(&mut self) {
        for object in self.objects.iter_mut() {
            object.process();
        }
    }

    /// Drain pending endpoint events from every attached termination
    pub(crate) fn drain_endpoint_events(
        &mut self,
    ) -> Vec<(TerminationId, crate::stream::EndpointEvent)> {
        let mut events = Vec::new();
        for item in self.header.iter() {
            let Some(t) = item.termination.as_ref() else {
                continue;
            };
            if let Some(stream) = t.audio_stream() {
                if let Some(event) = stream.endpoint.lock().unwrap().take_event() {
                    events.push((t.id(), event));
                }
            }
        }
        events
    }

    fn modes_compatible(&self, src: usize, sink: usize) -> bool {
        let src_mode = self.header[src]
            .termination
            .as_ref()
            .map(|t| t.stream_mode())
            .unwrap_or(StreamMode::NONE);
        let sink_mode = self.header[sink]
            .termination
            .as_ref()
            .map(|t| t.stream_mode())
            .unwrap_or(StreamMode::NONE);
        src_mode.contains(StreamMode::RECEIVE) && sink_mode.contains(StreamMode::SEND)
    }

    /// Construct the directed connection `src -> sink`
    ///
    /// Identical codec descriptors produce a null bridge; differing sampling
    /// rates produce nothing (resampling is not implemented); anything else is
    /// bridged through decoder/encoder wrappers where the codecs define them.
    fn connection_create(&self, src: usize, sink: usize) -> Option<Box<dyn MediaObject>> {
        let source_term = self.header[src].termination.as_ref()?;
        let sink_term = self.header[sink].termination.as_ref()?;
        let source = source_term.audio_stream()?;
        let sink = sink_term.audio_stream()?;
        if !source.mode.contains(StreamMode::RECEIVE) || !sink.mode.contains(StreamMode::SEND) {
            return None;
        }
        let rx_codec = source.rx_codec.as_ref()?;
        let tx_codec = sink.tx_codec.as_ref()?;

        if rx_codec.descriptor.matches(&tx_codec.descriptor) {
            return Some(Box::new(NullBridge::new(
                source.endpoint.clone(),
                sink.endpoint.clone(),
            )));
        }
        if rx_codec.descriptor.sampling_rate != tx_codec.descriptor.sampling_rate {
            warn!(
                "No bridge {} -> {}: sampling rate mismatch {} vs {}, resampling is not supported",
                source_term.id(),
                sink_term.id(),
                rx_codec.descriptor,
                tx_codec.descriptor
            );
            return None;
        }
        let mut source_endpoint = source.endpoint.clone();
        if rx_codec.can_decode() {
            source_endpoint = Decoder::wrap(source_endpoint, rx_codec.clone());
        }
        let mut sink_endpoint = sink.endpoint.clone();
        if tx_codec.can_encode() {
            sink_endpoint = Encoder::wrap(sink_endpoint, tx_codec.clone());
        }
        Some(Box::new(Bridge::new(source_endpoint, sink_endpoint)))
    }
}

impl std::fmt::Debug for MediaContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaContext")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("count", &self.count)
            .field("associations", &self.association_count())
            .field("objects", &self.objects.len())
            .finish()
    }
}

/// Owner of every context plus the processing ring of populated ones
#[derive(Default)]
pub struct ContextFactory {
    contexts: HashMap<ContextId, MediaContext>,
    ring: Vec<ContextId>,
}

impl ContextFactory {
    /// Create an empty factory
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly created context
    pub fn insert(&mut self, context: MediaContext) {
        self.contexts.insert(context.id(), context);
    }

    /// Remove a context entirely
    pub fn remove(&mut self, id: ContextId) -> Option<MediaContext> {
        self.ring.retain(|c| *c != id);
        self.contexts.remove(&id)
    }

    /// Shared access to a context
    pub fn get(&self, id: ContextId) -> Option<&MediaContext> {
        self.contexts.get(&id)
    }

    /// Mutable access to a context
    pub fn get_mut(&mut self, id: ContextId) -> Option<&mut MediaContext> {
        self.contexts.get_mut(&id)
    }

    /// Whether a context currently sits in the processing ring
    pub fn in_ring(&self, id: ContextId) -> bool {
        self.ring.contains(&id)
    }

    /// Attach a termination through the factory, maintaining the ring
    pub fn add_termination(&mut self, id: ContextId, termination: Termination) -> Result<usize> {
        let context = self
            .contexts
            .get_mut(&id)
            .ok_or(MediaError::UnknownContext { id })?;
        let was_empty = context.is_empty();
        let slot = context.add_termination(termination)?;
        if was_empty {
            debug!("Add context {} to processing ring", id);
            self.ring.push(id);
        }
        Ok(slot)
    }

    /// Detach a termination through the factory, maintaining the ring
    pub fn subtract_termination(
        &mut self,
        id: ContextId,
        termination: TerminationId,
    ) -> Result<Termination> {
        let context = self
            .contexts
            .get_mut(&id)
            .ok_or(MediaError::UnknownContext { id })?;
        let removed = context.subtract_termination(termination)?;
        if context.is_empty() {
            debug!("Remove context {} from processing ring", id);
            self.ring.retain(|c| *c != id);
        }
        Ok(removed)
    }

    /// Step every populated context once, in ring insertion order
    pub fn process(&mut self) {
        for id in self.ring.clone() {
            if let Some(context) = self.contexts.get_mut(&id) {
                context.process();
            }
        }
    }

    /// Counters for one context
    pub fn stats(&self, id: ContextId) -> Option<ContextStats> {
        let context = self.contexts.get(&id)?;
        Some(ContextStats {
            termination_count: context.count(),
            association_count: context.association_count(),
            object_count: context.object_count(),
            in_ring: self.in_ring(id),
        })
    }
}
