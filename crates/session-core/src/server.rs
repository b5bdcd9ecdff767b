//! The session table and dispatcher loop
//!
//! One task owns every session and is their sole mutator. Signaling
//! operations, connection-agent acknowledgements, resource-engine callbacks
//! and media-engine responses all arrive as messages on this loop and are
//! demultiplexed to the owning session. After every delivery the loop drains
//! the session's queued signaling messages until one is left in flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use mrcpd_media_core::EngineSignal;

use crate::descriptor::{ControlMediaDescriptor, SessionDescriptor};
use crate::errors::{Result, SessionError};
use crate::message::MrcpMessage;
use crate::profile::Profile;
use crate::session::{ServerSession, SignalingMessage};
use crate::types::{MrcpVersion, SessionId, SESSION_ID_HEX_LENGTH};

/// Configuration of the session server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionServerConfig {
    /// Upper bound on terminations per session context
    pub max_terminations_per_context: usize,
    /// Hex characters in generated session ids
    pub session_id_length: usize,
}

impl Default for SessionServerConfig {
    fn default() -> Self {
        Self {
            max_terminations_per_context: 5,
            session_id_length: SESSION_ID_HEX_LENGTH,
        }
    }
}

/// The signaling transport collaborator, one instance per session
///
/// Outgoing half of the signaling leg: the server calls these once the
/// corresponding exchange completes.
#[async_trait]
pub trait SignalingAgent: Send + Sync {
    /// Deliver the answer to an offer
    async fn answer(&self, descriptor: SessionDescriptor);

    /// Confirm session termination
    async fn terminate_response(&self);

    /// Deliver an MRCPv1 control response or event through the signaling leg
    async fn control_response(&self, message: MrcpMessage);
}

pub(crate) enum DispatchMessage {
    CreateSession {
        slot: u64,
        version: MrcpVersion,
        profile: Arc<Profile>,
        signaling: Arc<dyn SignalingAgent>,
    },
    Offer {
        slot: u64,
        descriptor: SessionDescriptor,
    },
    Control {
        slot: u64,
        channel: Option<usize>,
        message: MrcpMessage,
    },
    ControlById {
        id: SessionId,
        message: MrcpMessage,
    },
    Terminate {
        slot: u64,
    },
    TerminateById {
        id: SessionId,
    },
    ChannelModifyAck {
        slot: u64,
        index: usize,
        answer: Option<ControlMediaDescriptor>,
        status: bool,
    },
    ChannelRemoveAck {
        slot: u64,
        index: usize,
        status: bool,
    },
    ChannelDisconnect {
        slot: u64,
        index: usize,
    },
    EngineOpenAck {
        slot: u64,
        index: usize,
        ok: bool,
    },
    EngineCloseAck {
        slot: u64,
        index: usize,
    },
    EngineChannelMessage {
        slot: u64,
        index: usize,
        message: MrcpMessage,
    },
}

/// Reference to one channel of one session
///
/// Handed to the connection agent and the resource engine when the channel is
/// created; they use it to deliver acknowledgements and messages back onto
/// the signaling loop. Cheap to clone.
#[derive(Clone)]
pub struct ChannelRef {
    slot: u64,
    index: usize,
    tx: mpsc::UnboundedSender<DispatchMessage>,
}

impl ChannelRef {
    pub(crate) fn new(slot: u64, index: usize, tx: mpsc::UnboundedSender<DispatchMessage>) -> Self {
        Self { slot, index, tx }
    }

    /// Position of the channel inside its session
    pub fn index(&self) -> usize {
        self.index
    }

    /// Acknowledge a channel add/modify, carrying the answer descriptor
    pub fn modify_ack(&self, answer: Option<ControlMediaDescriptor>, status: bool) {
        let _ = self.tx.send(DispatchMessage::ChannelModifyAck {
            slot: self.slot,
            index: self.index,
            answer,
            status,
        });
    }

    /// Acknowledge a channel remove
    pub fn remove_ack(&self, status: bool) {
        let _ = self.tx.send(DispatchMessage::ChannelRemoveAck {
            slot: self.slot,
            index: self.index,
            status,
        });
    }

    /// Deliver a client request received on the MRCPv2 control connection
    pub fn client_message(&self, message: MrcpMessage) {
        let _ = self.tx.send(DispatchMessage::Control {
            slot: self.slot,
            channel: Some(self.index),
            message,
        });
    }

    /// Report the control connection dropped
    pub fn disconnect(&self) {
        let _ = self.tx.send(DispatchMessage::ChannelDisconnect {
            slot: self.slot,
            index: self.index,
        });
    }

    /// Report engine channel open completion
    pub fn open_ack(&self, ok: bool) {
        let _ = self.tx.send(DispatchMessage::EngineOpenAck {
            slot: self.slot,
            index: self.index,
            ok,
        });
    }

    /// Report engine channel close completion
    pub fn close_ack(&self) {
        let _ = self.tx.send(DispatchMessage::EngineCloseAck {
            slot: self.slot,
            index: self.index,
        });
    }

    /// Deliver a resource-generated response or event
    pub fn engine_message(&self, message: MrcpMessage) {
        let _ = self.tx.send(DispatchMessage::EngineChannelMessage {
            slot: self.slot,
            index: self.index,
            message,
        });
    }
}

impl std::fmt::Debug for ChannelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRef")
            .field("slot", &self.slot)
            .field("index", &self.index)
            .finish()
    }
}

/// Handle to one session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    slot: u64,
    tx: mpsc::UnboundedSender<DispatchMessage>,
}

impl SessionHandle {
    /// Submit an offer; the answer arrives through the signaling agent
    pub fn offer(&self, descriptor: SessionDescriptor) -> Result<()> {
        self.tx
            .send(DispatchMessage::Offer {
                slot: self.slot,
                descriptor,
            })
            .map_err(|_| SessionError::dispatch("session server stopped"))
    }

    /// Submit a client control message (MRCPv1 signaling-tunnelled path)
    pub fn control(&self, message: MrcpMessage) -> Result<()> {
        self.tx
            .send(DispatchMessage::Control {
                slot: self.slot,
                channel: None,
                message,
            })
            .map_err(|_| SessionError::dispatch("session server stopped"))
    }

    /// Begin session termination; idempotent
    pub fn terminate(&self) -> Result<()> {
        self.tx
            .send(DispatchMessage::Terminate { slot: self.slot })
            .map_err(|_| SessionError::dispatch("session server stopped"))
    }
}

/// Cloneable handle to a running session server
#[derive(Debug, Clone)]
pub struct ServerHandle {
    tx: mpsc::UnboundedSender<DispatchMessage>,
    next_slot: Arc<AtomicU64>,
}

impl ServerHandle {
    /// Create a session bound to a profile and a signaling agent
    ///
    /// The session id proper is generated on its first offer; until then the
    /// session is addressed through the returned handle only.
    pub fn create_session(
        &self,
        profile: Arc<Profile>,
        version: MrcpVersion,
        signaling: Arc<dyn SignalingAgent>,
    ) -> Result<SessionHandle> {
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        self.tx
            .send(DispatchMessage::CreateSession {
                slot,
                version,
                profile,
                signaling,
            })
            .map_err(|_| SessionError::dispatch("session server stopped"))?;
        Ok(SessionHandle {
            slot,
            tx: self.tx.clone(),
        })
    }

    /// Route a control message by MRCP session id
    pub fn control_by_id(&self, id: SessionId, message: MrcpMessage) -> Result<()> {
        self.tx
            .send(DispatchMessage::ControlById { id, message })
            .map_err(|_| SessionError::dispatch("session server stopped"))
    }

    /// Begin termination of a session addressed by MRCP session id
    pub fn terminate_by_id(&self, id: SessionId) -> Result<()> {
        self.tx
            .send(DispatchMessage::TerminateById { id })
            .map_err(|_| SessionError::dispatch("session server stopped"))
    }
}

/// The signaling-loop task owning every session
pub struct SessionServer {
    config: SessionServerConfig,
    sessions: HashMap<u64, ServerSession>,
    by_id: HashMap<SessionId, u64>,
    dispatch_tx: mpsc::UnboundedSender<DispatchMessage>,
    engine_signal_tx: mpsc::UnboundedSender<EngineSignal>,
}

impl SessionServer {
    /// Spawn the signaling loop and return its handle
    pub fn start(config: SessionServerConfig) -> ServerHandle {
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let (engine_signal_tx, engine_signal_rx) = mpsc::unbounded_channel();
        let server = SessionServer {
            config,
            sessions: HashMap::new(),
            by_id: HashMap::new(),
            dispatch_tx: dispatch_tx.clone(),
            engine_signal_tx,
        };
        tokio::spawn(server.run(dispatch_rx, engine_signal_rx));
        info!("Session server started");
        ServerHandle {
            tx: dispatch_tx,
            next_slot: Arc::new(AtomicU64::new(1)),
        }
    }

    async fn run(
        mut self,
        mut dispatch_rx: mpsc::UnboundedReceiver<DispatchMessage>,
        mut engine_signal_rx: mpsc::UnboundedReceiver<EngineSignal>,
    ) {
        loop {
            tokio::select! {
                message = dispatch_rx.recv() => {
                    match message {
                        Some(message) => self.handle_dispatch(message).await,
                        None => break,
                    }
                }
                signal = engine_signal_rx.recv() => {
                    if let Some(signal) = signal {
                        self.handle_engine_signal(signal).await;
                    }
                }
            }
        }
        debug!("Session server loop stopped");
    }

    async fn handle_dispatch(&mut self, message: DispatchMessage) {
        match message {
            DispatchMessage::CreateSession {
                slot,
                version,
                profile,
                signaling,
            } => {
                debug!("Create session at slot {} ({})", slot, version);
                let session = ServerSession::new(
                    slot,
                    version,
                    profile,
                    signaling,
                    self.dispatch_tx.clone(),
                    self.engine_signal_tx.clone(),
                    self.config.max_terminations_per_context,
                    self.config.session_id_length,
                );
                self.sessions.insert(slot, session);
            }
            DispatchMessage::Offer { slot, descriptor } => {
                self.signaling(slot, SignalingMessage::Offer(descriptor)).await;
            }
            DispatchMessage::Control {
                slot,
                channel,
                message,
            } => {
                self.signaling(slot, SignalingMessage::Control { channel, message })
                    .await;
            }
            DispatchMessage::ControlById { id, message } => {
                let Some(slot) = self.by_id.get(&id).copied() else {
                    warn!("Control message for unknown session {}", id);
                    return;
                };
                self.signaling(
                    slot,
                    SignalingMessage::Control {
                        channel: None,
                        message,
                    },
                )
                .await;
            }
            DispatchMessage::Terminate { slot } => {
                self.signaling(slot, SignalingMessage::Terminate).await;
            }
            DispatchMessage::TerminateById { id } => {
                let Some(slot) = self.by_id.get(&id).copied() else {
                    warn!("Terminate for unknown session {}", id);
                    return;
                };
                self.signaling(slot, SignalingMessage::Terminate).await;
            }
            DispatchMessage::ChannelModifyAck {
                slot,
                index,
                answer,
                status,
            } => {
                if let Some(session) = self.sessions.get_mut(&slot) {
                    session.on_channel_modify_ack(index, answer, status).await;
                }
                self.after(slot).await;
            }
            DispatchMessage::ChannelRemoveAck {
                slot,
                index,
                status,
            } => {
                if let Some(session) = self.sessions.get_mut(&slot) {
                    session.on_channel_remove_ack(index, status).await;
                }
                self.after(slot).await;
            }
            DispatchMessage::ChannelDisconnect { slot, index } => {
                if let Some(session) = self.sessions.get_mut(&slot) {
                    session.on_channel_disconnect(index).await;
                }
                self.after(slot).await;
            }
            DispatchMessage::EngineOpenAck { slot, index, ok } => {
                if let Some(session) = self.sessions.get_mut(&slot) {
                    session.on_engine_open_ack(index, ok).await;
                }
                self.after(slot).await;
            }
            DispatchMessage::EngineCloseAck { slot, index } => {
                if let Some(session) = self.sessions.get_mut(&slot) {
                    session.on_engine_close_ack(index).await;
                }
                self.after(slot).await;
            }
            DispatchMessage::EngineChannelMessage {
                slot,
                index,
                message,
            } => {
                if let Some(session) = self.sessions.get_mut(&slot) {
                    session.on_engine_channel_message(index, message).await;
                }
                self.after(slot).await;
            }
        }
    }

    async fn signaling(&mut self, slot: u64, message: SignalingMessage) {
        let Some(session) = self.sessions.get_mut(&slot) else {
            warn!("Signaling message for unknown session slot {}", slot);
            return;
        };
        session.process_signaling(message).await;
        self.after(slot).await;
    }

    async fn handle_engine_signal(&mut self, signal: EngineSignal) {
        let slot = match &signal {
            EngineSignal::Response(response) => response.owner,
            EngineSignal::Event(event) => event.owner,
        };
        if let Some(session) = self.sessions.get_mut(&slot) {
            session.on_engine_signal(signal).await;
        }
        self.after(slot).await;
    }

    /// Post-delivery housekeeping: table updates, then queue pumping
    async fn after(&mut self, slot: u64) {
        loop {
            let Some(session) = self.sessions.get_mut(&slot) else {
                return;
            };
            let ops = session.take_ops();
            if let Some(id) = ops.register {
                debug!("Register session {} at slot {}", id, slot);
                self.by_id.insert(id, slot);
            }
            if ops.unregister {
                if let Some(id) = session.id().cloned() {
                    debug!("Unregister session {}", id);
                    self.by_id.remove(&id);
                }
            }
            if ops.finished {
                debug!("Session at slot {} finished", slot);
                self.sessions.remove(&slot);
                return;
            }
            let Some(session) = self.sessions.get_mut(&slot) else {
                return;
            };
            if !session.pump_next().await {
                return;
            }
        }
    }
}
