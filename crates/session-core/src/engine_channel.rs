//! Engine channels: the binding between a session channel and a resource
//! engine plugin
//!
//! A resource engine runs its own loop (and possibly worker threads). It
//! hands the session an [`EngineChannel`]: a driver for open/close/request
//! operations plus the termination its audio flows through. The termination
//! object itself is shipped to the media engine on setup; the session keeps
//! only its id and stream mode.

use std::sync::Arc;

use async_trait::async_trait;

use mrcpd_media_core::{StreamMode, Termination, TerminationId};

use crate::message::MrcpMessage;
use crate::server::ChannelRef;
use crate::types::MrcpVersion;

/// A resource engine plugin
///
/// One engine per resource name in a profile; `create_channel` is invoked for
/// every session channel bound to that resource. Returning `None` marks the
/// resource unacceptable for this session.
#[async_trait]
pub trait ResourceEngine: Send + Sync {
    /// Create the engine half of a session channel
    ///
    /// The `channel` reference is how the engine reports open/close completion
    /// and delivers resource-generated messages back to the session.
    async fn create_channel(
        &self,
        channel: ChannelRef,
        version: MrcpVersion,
    ) -> Option<EngineChannel>;
}

/// Operations the session invokes on the engine half of a channel
///
/// Each returns whether the operation was accepted; completion is reported
/// through the [`ChannelRef`] given at channel creation.
#[async_trait]
pub trait EngineChannelDriver: Send + Sync {
    /// Open the channel
    async fn open(&self) -> bool;

    /// Close the channel
    async fn close(&self) -> bool;

    /// Process a client request on the engine's loop
    async fn request_process(&self, message: MrcpMessage) -> bool;
}

/// The engine half of one session channel
pub struct EngineChannel {
    driver: Arc<dyn EngineChannelDriver>,
    /// Termination pending handoff to the media engine
    termination: Option<Termination>,
    termination_id: Option<TerminationId>,
    termination_mode: StreamMode,
}

impl EngineChannel {
    /// Wrap a driver and the channel's termination
    pub fn new(driver: Arc<dyn EngineChannelDriver>, termination: Option<Termination>) -> Self {
        let termination_id = termination.as_ref().map(|t| t.id());
        let termination_mode = termination
            .as_ref()
            .map(|t| t.stream_mode())
            .unwrap_or(StreamMode::NONE);
        Self {
            driver,
            termination,
            termination_id,
            termination_mode,
        }
    }

    /// The driver
    pub fn driver(&self) -> &Arc<dyn EngineChannelDriver> {
        &self.driver
    }

    /// Id of the channel's termination, if it has one
    pub fn termination_id(&self) -> Option<TerminationId> {
        self.termination_id
    }

    /// Stream mode of the channel's termination
    pub fn termination_mode(&self) -> StreamMode {
        self.termination_mode
    }

    /// Take the termination for handoff to the media engine
    ///
    /// Returns `None` once it has been shipped.
    pub(crate) fn take_termination(&mut self) -> Option<Termination> {
        self.termination.take()
    }
}

impl std::fmt::Debug for EngineChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineChannel")
            .field("termination_id", &self.termination_id)
            .field("termination_mode", &self.termination_mode)
            .field("pending_handoff", &self.termination.is_some())
            .finish()
    }
}
