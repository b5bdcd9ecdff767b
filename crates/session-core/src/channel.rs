//! The per-resource channel aggregate and RTP termination slots

use std::sync::Arc;

use mrcpd_media_core::TerminationId;

use crate::connection::ControlChannel;
use crate::engine_channel::EngineChannel;
use crate::profile::Resource;
use crate::state_machine::MrcpStateMachine;

/// One resource's channel inside a session
///
/// Aggregates the control leg (MRCPv2 only), the engine leg, and the state
/// machine, plus the SDP position (`id`) and grouping id (`cmid`) that tie it
/// to an RTP leg. The waiting flags track which acknowledgements the current
/// signaling message still owes.
pub(crate) struct MrcpChannel {
    pub resource_name: String,
    pub resource: Option<Arc<dyn Resource>>,
    pub control_channel: Option<ControlChannel>,
    pub engine_channel: Option<EngineChannel>,
    pub state_machine: Option<Box<dyn MrcpStateMachine>>,
    /// Position of the control media entry in the SDP message
    pub id: usize,
    /// Control media id, matched against an audio media's `mid`
    pub cmid: usize,
    pub waiting_for_channel: bool,
    pub waiting_for_termination: bool,
}

impl MrcpChannel {
    pub(crate) fn new(resource_name: impl Into<String>, id: usize, cmid: usize) -> Self {
        Self {
            resource_name: resource_name.into(),
            resource: None,
            control_channel: None,
            engine_channel: None,
            state_machine: None,
            id,
            cmid,
            waiting_for_channel: false,
            waiting_for_termination: false,
        }
    }

    /// Id of the engine termination, when the channel has one
    pub(crate) fn engine_termination_id(&self) -> Option<TerminationId> {
        self.engine_channel
            .as_ref()
            .and_then(|ec| ec.termination_id())
    }
}

/// One RTP leg of a session
pub(crate) struct TerminationSlot {
    /// Id of the RTP termination held by the media engine
    pub termination: TerminationId,
    /// Position of the audio media entry in the SDP message
    pub id: usize,
    /// Media id, matched against control media `cmid`s
    pub mid: usize,
    /// Indices of the session channels grouped with this leg
    pub channels: Vec<usize>,
    /// Whether an engine acknowledgement is outstanding for this leg
    pub waiting: bool,
}
