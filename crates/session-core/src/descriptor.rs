//! Session and control-media descriptors
//!
//! A session descriptor is the typed shape of one SDP exchange: three
//! parallel media arrays indexed by SDP position, where a slot may be absent.
//! The answer to an offer always has the same arity; slots fill in as the
//! sub-requests behind them complete.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use mrcpd_media_core::RtpMediaDescriptor;

use crate::types::{SessionId, SessionStatus};

/// Control-media line of a descriptor (`m=application ...`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlMediaDescriptor {
    /// Session id, filled in by the server once assigned
    pub session_id: Option<SessionId>,
    /// Control-media id grouping this resource with an RTP leg (`a=cmid`)
    pub cmid: usize,
    /// Resource name (`a=resource` / `a=channel`)
    pub resource_name: String,
    /// Port; 0 in answers that reject the channel
    pub port: u16,
}

impl ControlMediaDescriptor {
    /// Build an offer-side control media entry
    pub fn new(resource_name: impl Into<String>, cmid: usize, port: u16) -> Self {
        Self {
            session_id: None,
            cmid,
            resource_name: resource_name.into(),
            port,
        }
    }

    /// Build the rejection answer for this entry: same resource, port 0
    pub fn reject_answer(&self, session_id: Option<SessionId>) -> Self {
        Self {
            session_id,
            cmid: self.cmid,
            resource_name: self.resource_name.clone(),
            port: 0,
        }
    }
}

/// One SDP exchange worth of media descriptions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescriptor {
    /// SDP origin
    pub origin: String,
    /// Bind address of the answering side
    pub ip: Option<IpAddr>,
    /// External (NATed) address, when one is advertised
    pub ext_ip: Option<IpAddr>,
    /// Resource name, MRCPv1 form
    pub resource_name: Option<String>,
    /// Resource setup (true) or teardown (false) flag, MRCPv1 form
    pub resource_state: bool,
    /// Overall status
    pub status: SessionStatus,
    /// Control media slots, indexed by SDP position
    pub control_media: Vec<Option<ControlMediaDescriptor>>,
    /// Audio media slots, indexed by SDP position
    pub audio_media: Vec<Option<RtpMediaDescriptor>>,
    /// Video media slots, indexed by SDP position
    pub video_media: Vec<Option<RtpMediaDescriptor>>,
}

impl SessionDescriptor {
    /// An empty descriptor with status OK
    pub fn new() -> Self {
        Self {
            origin: String::new(),
            ip: None,
            ext_ip: None,
            resource_name: None,
            resource_state: false,
            status: SessionStatus::Ok,
            control_media: Vec::new(),
            audio_media: Vec::new(),
            video_media: Vec::new(),
        }
    }

    /// An MRCPv1 resource offer: one resource name plus audio media
    pub fn resource_offer(resource_name: impl Into<String>, audio: Vec<RtpMediaDescriptor>) -> Self {
        Self {
            resource_name: Some(resource_name.into()),
            resource_state: true,
            audio_media: audio.into_iter().map(Some).collect(),
            ..Self::new()
        }
    }

    /// Build the answer template for this offer: matching arity, empty slots
    pub fn answer_template(&self) -> SessionDescriptor {
        SessionDescriptor {
            origin: String::new(),
            ip: None,
            ext_ip: None,
            resource_name: self.resource_name.clone(),
            resource_state: self.resource_state,
            status: self.status,
            control_media: vec![None; self.control_media.len()],
            audio_media: vec![None; self.audio_media.len()],
            video_media: vec![None; self.video_media.len()],
        }
    }

    /// Control media at an SDP position
    pub fn control_media_get(&self, id: usize) -> Option<&ControlMediaDescriptor> {
        self.control_media.get(id).and_then(|slot| slot.as_ref())
    }

    /// Set the control media slot at an SDP position
    pub fn control_media_set(&mut self, id: usize, descriptor: ControlMediaDescriptor) {
        if id < self.control_media.len() {
            self.control_media[id] = Some(descriptor);
        }
    }

    /// Audio media at an SDP position
    pub fn audio_media_get(&self, id: usize) -> Option<&RtpMediaDescriptor> {
        self.audio_media.get(id).and_then(|slot| slot.as_ref())
    }

    /// Mutable audio media at an SDP position
    pub fn audio_media_get_mut(&mut self, id: usize) -> Option<&mut RtpMediaDescriptor> {
        self.audio_media.get_mut(id).and_then(|slot| slot.as_mut())
    }

    /// Set the audio media slot at an SDP position
    pub fn audio_media_set(&mut self, id: usize, descriptor: RtpMediaDescriptor) {
        if id < self.audio_media.len() {
            self.audio_media[id] = Some(descriptor);
        }
    }

    /// `(control, audio, video)` arities
    pub fn arity(&self) -> (usize, usize, usize) {
        (
            self.control_media.len(),
            self.audio_media.len(),
            self.video_media.len(),
        )
    }
}

impl Default for SessionDescriptor {
    fn default() -> Self {
        Self::new()
    }
}
