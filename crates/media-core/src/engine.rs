//! The media engine loop
//!
//! A single task owns every media context and applies batched task messages
//! from sessions in arrival order. Each task item produces a response message
//! back to the originating session, tagged with the same command kind;
//! terminations may additionally raise out-of-band events. Between batches a
//! fixed-rate tick steps every populated context.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::context::{ContextFactory, ContextStats, MediaContext};
use crate::error::{MediaError, Result};
use crate::rtp::RtpTerminationDescriptor;
use crate::stream::EndpointEvent;
use crate::termination::Termination;
use crate::types::{ContextId, TerminationId};

/// Configuration of the media engine loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaEngineConfig {
    /// Interval of the media frame tick
    pub tick_interval: Duration,
}

impl Default for MediaEngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(10),
        }
    }
}

/// Discriminant of a task item, echoed back in its response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    AddTermination,
    ModifyTermination,
    SubtractTermination,
    AddAssociation,
    RemoveAssociation,
    ResetAssociations,
    ApplyTopology,
    DestroyTopology,
}

/// One topology mutation, addressed to a context
#[derive(Debug)]
pub enum TaskItem {
    AddTermination {
        context: ContextId,
        termination: Termination,
        descriptor: Option<RtpTerminationDescriptor>,
    },
    ModifyTermination {
        context: ContextId,
        termination: TerminationId,
        descriptor: RtpTerminationDescriptor,
    },
    SubtractTermination {
        context: ContextId,
        termination: TerminationId,
    },
    AddAssociation {
        context: ContextId,
        a: TerminationId,
        b: TerminationId,
    },
    RemoveAssociation {
        context: ContextId,
        a: TerminationId,
        b: TerminationId,
    },
    ResetAssociations {
        context: ContextId,
    },
    ApplyTopology {
        context: ContextId,
    },
    DestroyTopology {
        context: ContextId,
    },
}

impl TaskItem {
    /// Command discriminant of this item
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskItem::AddTermination { .. } => TaskKind::AddTermination,
            TaskItem::ModifyTermination { .. } => TaskKind::ModifyTermination,
            TaskItem::SubtractTermination { .. } => TaskKind::SubtractTermination,
            TaskItem::AddAssociation { .. } => TaskKind::AddAssociation,
            TaskItem::RemoveAssociation { .. } => TaskKind::RemoveAssociation,
            TaskItem::ResetAssociations { .. } => TaskKind::ResetAssociations,
            TaskItem::ApplyTopology { .. } => TaskKind::ApplyTopology,
            TaskItem::DestroyTopology { .. } => TaskKind::DestroyTopology,
        }
    }

    /// Context this item addresses
    pub fn context(&self) -> ContextId {
        match self {
            TaskItem::AddTermination { context, .. }
            | TaskItem::ModifyTermination { context, .. }
            | TaskItem::SubtractTermination { context, .. }
            | TaskItem::AddAssociation { context, .. }
            | TaskItem::RemoveAssociation { context, .. }
            | TaskItem::ResetAssociations { context }
            | TaskItem::ApplyTopology { context }
            | TaskItem::DestroyTopology { context } => *context,
        }
    }
}

/// Per-session aggregation buffer of task items
///
/// Items appended while one signaling message is processed are flushed to the
/// engine as a single batch, preserving their order.
#[derive(Debug, Default)]
pub struct TaskMessageBuffer {
    items: Vec<TaskItem>,
}

impl TaskMessageBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no item is pending
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Queue an add-termination item
    pub fn add_termination(
        &mut self,
        context: ContextId,
        termination: Termination,
        descriptor: Option<RtpTerminationDescriptor>,
    ) {
        self.items.push(TaskItem::AddTermination {
            context,
            termination,
            descriptor,
        });
    }

    /// Queue a modify-termination item
    pub fn modify_termination(
        &mut self,
        context: ContextId,
        termination: TerminationId,
        descriptor: RtpTerminationDescriptor,
    ) {
        self.items.push(TaskItem::ModifyTermination {
            context,
            termination,
            descriptor,
        });
    }

    /// Queue a subtract-termination item
    pub fn subtract_termination(&mut self, context: ContextId, termination: TerminationId) {
        self.items.push(TaskItem::SubtractTermination {
            context,
            termination,
        });
    }

    /// Queue an add-association item
    pub fn add_association(&mut self, context: ContextId, a: TerminationId, b: TerminationId) {
        self.items.push(TaskItem::AddAssociation { context, a, b });
    }

    /// Queue a remove-association item
    pub fn remove_association(&mut self, context: ContextId, a: TerminationId, b: TerminationId) {
        self.items.push(TaskItem::RemoveAssociation { context, a, b });
    }

    /// Queue a reset-associations item
    pub fn reset_associations(&mut self, context: ContextId) {
        self.items.push(TaskItem::ResetAssociations { context });
    }

    /// Queue an apply-topology item
    pub fn apply_topology(&mut self, context: ContextId) {
        self.items.push(TaskItem::ApplyTopology { context });
    }

    /// Queue a destroy-topology item
    pub fn destroy_topology(&mut self, context: ContextId) {
        self.items.push(TaskItem::DestroyTopology { context });
    }

    fn take(&mut self) -> Vec<TaskItem> {
        std::mem::take(&mut self.items)
    }
}

/// Response to one processed task item
#[derive(Debug, Clone)]
pub struct EngineResponse {
    /// Opaque owner tag registered at context creation
    pub owner: u64,
    /// Context the item addressed
    pub context: ContextId,
    /// Command discriminant, identical to the request's
    pub command: TaskKind,
    /// Termination the item addressed, when applicable
    pub termination: Option<TerminationId>,
    /// Whether the item was applied
    pub status: bool,
    /// Updated termination descriptor (add/modify of RTP terminations)
    pub descriptor: Option<RtpTerminationDescriptor>,
}

/// Out-of-band event raised by a termination
#[derive(Debug, Clone)]
pub struct EngineEvent {
    /// Opaque owner tag registered at context creation
    pub owner: u64,
    /// Context the termination belongs to
    pub context: ContextId,
    /// Termination that raised the event
    pub termination: TerminationId,
    /// The condition itself
    pub event: EndpointEvent,
}

/// Message from the engine loop back to a session's dispatcher
#[derive(Debug, Clone)]
pub enum EngineSignal {
    /// Response to a processed task item
    Response(EngineResponse),
    /// Out-of-band termination event
    Event(EngineEvent),
}

enum EngineMessage {
    CreateContext {
        id: ContextId,
        capacity: usize,
        owner: u64,
        signal_tx: mpsc::UnboundedSender<EngineSignal>,
    },
    DestroyContext {
        id: ContextId,
    },
    Batch(Vec<TaskItem>),
    Stats {
        id: ContextId,
        reply: oneshot::Sender<Option<ContextStats>>,
    },
}

/// Cloneable handle to a running media engine loop
#[derive(Clone)]
pub struct MediaEngineHandle {
    tx: mpsc::UnboundedSender<EngineMessage>,
}

impl MediaEngineHandle {
    /// Create a context and register its owner's signal channel
    ///
    /// The returned id is valid for task items as soon as this call returns;
    /// ordering against a subsequent batch is guaranteed by the engine queue.
    pub fn create_context(
        &self,
        owner: u64,
        capacity: usize,
        signal_tx: mpsc::UnboundedSender<EngineSignal>,
    ) -> Result<ContextId> {
        let id = ContextId::new();
        self.tx
            .send(EngineMessage::CreateContext {
                id,
                capacity,
                owner,
                signal_tx,
            })
            .map_err(|_| MediaError::engine_unavailable("engine loop stopped"))?;
        Ok(id)
    }

    /// Drop a context once its terminations have been subtracted
    pub fn destroy_context(&self, id: ContextId) -> Result<()> {
        self.tx
            .send(EngineMessage::DestroyContext { id })
            .map_err(|_| MediaError::engine_unavailable("engine loop stopped"))
    }

    /// Flush an aggregation buffer as one ordered batch
    ///
    /// An empty buffer is a no-op.
    pub fn send(&self, buffer: &mut TaskMessageBuffer) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        self.tx
            .send(EngineMessage::Batch(buffer.take()))
            .map_err(|_| MediaError::engine_unavailable("engine loop stopped"))
    }

    /// Fetch the counters of one context
    pub async fn context_stats(&self, id: ContextId) -> Result<Option<ContextStats>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineMessage::Stats { id, reply })
            .map_err(|_| MediaError::engine_unavailable("engine loop stopped"))?;
        rx.await
            .map_err(|_| MediaError::engine_unavailable("engine loop stopped"))
    }
}

impl std::fmt::Debug for MediaEngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaEngineHandle").finish()
    }
}

struct ContextBinding {
    owner: u64,
    signal_tx: mpsc::UnboundedSender<EngineSignal>,
}

/// The media engine loop state
///
/// Constructed and consumed by [`MediaEngine::start`]; everything it owns is
/// touched from the engine task only.
pub struct MediaEngine {
    factory: ContextFactory,
    bindings: HashMap<ContextId, ContextBinding>,
    config: MediaEngineConfig,
}

impl MediaEngine {
    /// Spawn the engine loop and return its handle
    pub fn start(config: MediaEngineConfig) -> MediaEngineHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = MediaEngine {
            factory: ContextFactory::new(),
            bindings: HashMap::new(),
            config,
        };
        tokio::spawn(engine.run(rx));
        MediaEngineHandle { tx }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<EngineMessage>) {
        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        debug!("Media engine loop started, tick {:?}", self.config.tick_interval);
        loop {
            tokio::select! {
                message = rx.recv() => {
                    match message {
                        Some(message) => self.handle_message(message),
                        None => break,
                    }
                }
                _ = tick.tick() => {
                    self.factory.process();
                    self.forward_endpoint_events();
                }
            }
        }
        debug!("Media engine loop stopped");
    }

    fn handle_message(&mut self, message: EngineMessage) {
        match message {
            EngineMessage::CreateContext {
                id,
                capacity,
                owner,
                signal_tx,
            } => {
                debug!("Create context {} (capacity {})", id, capacity);
                self.factory.insert(MediaContext::new(id, capacity));
                self.bindings.insert(id, ContextBinding { owner, signal_tx });
            }
            EngineMessage::DestroyContext { id } => {
                debug!("Destroy context {}", id);
                if let Some(mut context) = self.factory.remove(id) {
                    context.destroy_topology();
                    if !context.is_empty() {
                        warn!("Destroying context {} with {} termination(s) attached", id, context.count());
                    }
                }
                self.bindings.remove(&id);
            }
            EngineMessage::Batch(items) => {
                for item in items {
                    self.process_item(item);
                }
            }
            EngineMessage::Stats { id, reply } => {
                let _ = reply.send(self.factory.stats(id));
            }
        }
    }

    fn process_item(&mut self, item: TaskItem) {
        let context_id = item.context();
        let command = item.kind();
        let (termination, status, descriptor) = self.apply_item(item);
        let Some(binding) = self.bindings.get(&context_id) else {
            warn!("Dropping response for unknown context {}", context_id);
            return;
        };
        let response = EngineResponse {
            owner: binding.owner,
            context: context_id,
            command,
            termination,
            status,
            descriptor,
        };
        if binding.signal_tx.send(EngineSignal::Response(response)).is_err() {
            debug!("Session channel of context {} is gone", context_id);
        }
    }

    fn apply_item(
        &mut self,
        item: TaskItem,
    ) -> (Option<TerminationId>, bool, Option<RtpTerminationDescriptor>) {
        match item {
            TaskItem::AddTermination {
                context,
                mut termination,
                descriptor,
            } => {
                let id = termination.id();
                let mut descriptor = descriptor;
                if let Some(desc) = descriptor.as_mut() {
                    if let Err(e) = termination.modify(desc) {
                        error!("Failed to apply descriptor to {}: {}", id, e);
                        return (Some(id), false, descriptor);
                    }
                }
                match self.factory.add_termination(context, termination) {
                    Ok(_) => (Some(id), true, descriptor),
                    Err(e) => {
                        warn!("Failed to add termination {}: {}", id, e);
                        (Some(id), false, descriptor)
                    }
                }
            }
            TaskItem::ModifyTermination {
                context,
                termination,
                mut descriptor,
            } => {
                let Some(ctx) = self.factory.get_mut(context) else {
                    warn!("Modify termination on unknown context {}", context);
                    return (Some(termination), false, Some(descriptor));
                };
                match ctx.termination_mut(termination) {
                    Some(t) => match t.modify(&mut descriptor) {
                        Ok(()) => (Some(termination), true, Some(descriptor)),
                        Err(e) => {
                            error!("Failed to modify termination {}: {}", termination, e);
                            (Some(termination), false, Some(descriptor))
                        }
                    },
                    None => {
                        warn!("Modify of unknown termination {}", termination);
                        (Some(termination), false, Some(descriptor))
                    }
                }
            }
            TaskItem::SubtractTermination {
                context,
                termination,
            } => match self.factory.subtract_termination(context, termination) {
                Ok(removed) => {
                    drop(removed);
                    (Some(termination), true, None)
                }
                Err(e) => {
                    warn!("Failed to subtract termination {}: {}", termination, e);
                    (Some(termination), false, None)
                }
            },
            TaskItem::AddAssociation { context, a, b } => {
                let status = self
                    .with_context(context, |ctx| ctx.add_association(a, b))
                    .is_ok();
                (None, status, None)
            }
            TaskItem::RemoveAssociation { context, a, b } => {
                let status = self
                    .with_context(context, |ctx| ctx.remove_association(a, b))
                    .is_ok();
                (None, status, None)
            }
            TaskItem::ResetAssociations { context } => {
                let status = self
                    .with_context(context, |ctx| {
                        ctx.reset_associations();
                        Ok(())
                    })
                    .is_ok();
                (None, status, None)
            }
            TaskItem::ApplyTopology { context } => {
                let status = self
                    .with_context(context, |ctx| {
                        ctx.apply_topology();
                        Ok(())
                    })
                    .is_ok();
                (None, status, None)
            }
            TaskItem::DestroyTopology { context } => {
                let status = self
                    .with_context(context, |ctx| {
                        ctx.destroy_topology();
                        Ok(())
                    })
                    .is_ok();
                (None, status, None)
            }
        }
    }

    fn with_context<F>(&mut self, id: ContextId, f: F) -> Result<()>
    where
        F: FnOnce(&mut MediaContext) -> Result<()>,
    {
        let Some(context) = self.factory.get_mut(id) else {
            warn!("Task item addressed unknown context {}", id);
            return Err(MediaError::UnknownContext { id });
        };
        if let Err(e) = f(context) {
            warn!("Task item failed on {}: {}", id, e);
            return Err(e);
        }
        Ok(())
    }

    fn forward_endpoint_events(&mut self) {
        let ids: Vec<ContextId> = self.bindings.keys().copied().collect();
        for id in ids {
            let Some(context) = self.factory.get_mut(id) else {
                continue;
            };
            let events = context.drain_endpoint_events();
            if events.is_empty() {
                continue;
            }
            let Some(binding) = self.bindings.get(&id) else {
                continue;
            };
            for (termination, event) in events {
                let _ = binding.signal_tx.send(EngineSignal::Event(EngineEvent {
                    owner: binding.owner,
                    context: id,
                    termination,
                    event,
                }));
            }
        }
    }
}
