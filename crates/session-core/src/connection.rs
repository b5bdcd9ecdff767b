//! Control channels over the MRCPv2 connection agent
//!
//! The connection agent owns the TCP/TLS control connections on its own loop.
//! Channel operations submit work and return whether it was accepted; the
//! acknowledgement arrives later through the [`crate::server::ChannelRef`]
//! the agent was handed at add time.

use std::sync::Arc;

use async_trait::async_trait;

use crate::descriptor::ControlMediaDescriptor;
use crate::message::MrcpMessage;
use crate::server::ChannelRef;

/// The MRCPv2 connection agent collaborator
///
/// `true` return values mean the operation was accepted and an asynchronous
/// acknowledgement will follow; `false` means it was rejected synchronously
/// and the caller must synthesise a rejection answer slot.
#[async_trait]
pub trait ConnectionAgent: Send + Sync {
    /// Establish a control channel for a new control media entry
    async fn channel_add(&self, channel: ChannelRef, descriptor: ControlMediaDescriptor) -> bool;

    /// Re-negotiate an existing control channel
    async fn channel_modify(&self, channel: ChannelRef, descriptor: ControlMediaDescriptor)
        -> bool;

    /// Tear a control channel down
    async fn channel_remove(&self, channel: ChannelRef) -> bool;

    /// Send a response or event to the client over the control connection
    async fn message_send(&self, channel: ChannelRef, message: MrcpMessage) -> bool;
}

/// Per-resource control channel handle (MRCPv2 sessions only)
pub struct ControlChannel {
    agent: Arc<dyn ConnectionAgent>,
    channel: ChannelRef,
}

impl ControlChannel {
    /// Bind a channel reference to the session's connection agent
    pub fn new(agent: Arc<dyn ConnectionAgent>, channel: ChannelRef) -> Self {
        Self { agent, channel }
    }

    /// Issue the add operation
    pub async fn add(&self, descriptor: ControlMediaDescriptor) -> bool {
        self.agent.channel_add(self.channel.clone(), descriptor).await
    }

    /// Issue the modify operation
    pub async fn modify(&self, descriptor: ControlMediaDescriptor) -> bool {
        self.agent
            .channel_modify(self.channel.clone(), descriptor)
            .await
    }

    /// Issue the remove operation
    pub async fn remove(&self) -> bool {
        self.agent.channel_remove(self.channel.clone()).await
    }

    /// Send a message toward the client
    pub async fn send_message(&self, message: MrcpMessage) -> bool {
        self.agent
            .message_send(self.channel.clone(), message)
            .await
    }
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("channel", &self.channel)
            .finish()
    }
}
