//! The per-session orchestrator
//!
//! One `ServerSession` per signaling session. It processes offer, control and
//! terminate messages one at a time (later arrivals queue in FIFO order),
//! fans sub-requests out to the connection agent, the resource engines and
//! the media engine, and replies only when every outstanding sub-request has
//! completed. Asynchronous acknowledgements do not pass through the queue;
//! they decrement the sub-request ledger directly and the lifecycle state
//! decides what happens when it drains.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use mrcpd_media_core::{
    ContextId, EngineResponse, EngineSignal, RtpMediaDescriptor, RtpTerminationDescriptor,
    TaskKind, TaskMessageBuffer,
};

use crate::channel::{MrcpChannel, TerminationSlot};
use crate::connection::ControlChannel;
use crate::descriptor::{ControlMediaDescriptor, SessionDescriptor};
use crate::engine_channel::EngineChannelDriver as _;
use crate::message::MrcpMessage;
use crate::profile::{Profile, Resource as _};
use crate::server::{ChannelRef, DispatchMessage, SignalingAgent};
use crate::state_machine::{DeactivateStatus, MrcpStateMachine as _, SmSignal};
use crate::types::{MrcpVersion, SessionId, SessionStatus};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    /// No exchange in progress
    None,
    /// Building an offer (client-side sessions only; unused by the server)
    #[allow(dead_code)]
    GeneratingOffer,
    /// Processing an offer, assembling the answer
    Answering,
    /// Terminate received, state machines deactivating
    Deactivating,
    /// Channels and terminations being torn down
    Terminating,
}

/// A signaling message, as queued inside a session
#[derive(Debug)]
pub(crate) enum SignalingMessage {
    Offer(SessionDescriptor),
    Control {
        channel: Option<usize>,
        message: MrcpMessage,
    },
    Terminate,
}

impl SignalingMessage {
    fn label(&self) -> &'static str {
        match self {
            SignalingMessage::Offer(_) => "offer",
            SignalingMessage::Control { .. } => "control",
            SignalingMessage::Terminate => "terminate",
        }
    }
}

/// Session-table operations requested by a session, drained by the server loop
#[derive(Debug, Default)]
pub(crate) struct SessionOps {
    pub register: Option<SessionId>,
    pub unregister: bool,
    pub finished: bool,
}

pub(crate) struct ServerSession {
    slot: u64,
    id: Option<SessionId>,
    version: MrcpVersion,
    profile: Arc<Profile>,
    signaling: Arc<dyn SignalingAgent>,

    context: Option<ContextId>,
    channels: Vec<MrcpChannel>,
    terminations: Vec<TerminationSlot>,

    active_request: Option<&'static str>,
    request_queue: VecDeque<SignalingMessage>,

    offer: Option<SessionDescriptor>,
    answer: Option<SessionDescriptor>,

    task_buffer: TaskMessageBuffer,
    subrequests: usize,
    state: SessionState,

    max_terminations: usize,
    id_length: usize,

    dispatch_tx: mpsc::UnboundedSender<DispatchMessage>,
    engine_signal_tx: mpsc::UnboundedSender<EngineSignal>,
    ops: SessionOps,
}

impl ServerSession {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        slot: u64,
        version: MrcpVersion,
        profile: Arc<Profile>,
        signaling: Arc<dyn SignalingAgent>,
        dispatch_tx: mpsc::UnboundedSender<DispatchMessage>,
        engine_signal_tx: mpsc::UnboundedSender<EngineSignal>,
        max_terminations: usize,
        id_length: usize,
    ) -> Self {
        Self {
            slot,
            id: None,
            version,
            profile,
            signaling,
            context: None,
            channels: Vec::new(),
            terminations: Vec::new(),
            active_request: None,
            request_queue: VecDeque::new(),
            offer: None,
            answer: None,
            task_buffer: TaskMessageBuffer::new(),
            subrequests: 0,
            state: SessionState::None,
            max_terminations,
            id_length,
            dispatch_tx,
            engine_signal_tx,
            ops: SessionOps::default(),
        }
    }

    pub(crate) fn id(&self) -> Option<&SessionId> {
        self.id.as_ref()
    }

    pub(crate) fn take_ops(&mut self) -> SessionOps {
        std::mem::take(&mut self.ops)
    }

    fn sid(&self) -> &str {
        self.id.as_ref().map(|id| id.as_str()).unwrap_or("-")
    }

    // ------------------------------------------------------------------
    // Signaling serialisation: one active message, FIFO queue behind it
    // ------------------------------------------------------------------

    pub(crate) async fn process_signaling(&mut self, message: SignalingMessage) {
        if self.active_request.is_some() {
            debug!("<{}> Push {} request to queue", self.sid(), message.label());
            self.request_queue.push_back(message);
        } else {
            self.active_request = Some(message.label());
            self.dispatch(message).await;
        }
    }

    /// Dispatch the next queued message if nothing is active
    ///
    /// Returns whether a message was dispatched; the server loop keeps pumping
    /// until this returns false.
    pub(crate) async fn pump_next(&mut self) -> bool {
        if self.active_request.is_some() {
            return false;
        }
        let Some(message) = self.request_queue.pop_front() else {
            return false;
        };
        self.active_request = Some(message.label());
        self.dispatch(message).await;
        true
    }

    async fn dispatch(&mut self, message: SignalingMessage) {
        debug!("<{}> Dispatch {} message", self.sid(), message.label());
        match message {
            SignalingMessage::Offer(descriptor) => self.offer_process(descriptor).await,
            SignalingMessage::Control { channel, message } => {
                self.on_message_receive(channel, message).await
            }
            SignalingMessage::Terminate => self.deactivate().await,
        }
    }

    fn complete_active(&mut self) {
        self.active_request = None;
    }

    // ------------------------------------------------------------------
    // Sub-request ledger
    // ------------------------------------------------------------------

    fn state_set(&mut self, state: SessionState) {
        if self.subrequests != 0 {
            warn!(
                "<{}> Entering {:?} with {} sub-request(s) outstanding",
                self.sid(),
                state,
                self.subrequests
            );
            self.subrequests = 0;
        }
        self.state = state;
    }

    fn subrequest_add(&mut self) {
        self.subrequests += 1;
    }

    /// Returns true when the ledger just drained
    fn subrequest_remove(&mut self) -> bool {
        if self.subrequests == 0 {
            warn!("<{}> Sub-request ledger underflow", self.sid());
            return false;
        }
        self.subrequests -= 1;
        self.subrequests == 0
    }

    async fn check_drained(&mut self) {
        if self.subrequests != 0 {
            return;
        }
        match self.state {
            SessionState::Answering => self.answer_send().await,
            SessionState::Deactivating => self.terminate_process().await,
            SessionState::Terminating => self.terminate_send().await,
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Offer processing
    // ------------------------------------------------------------------

    async fn offer_process(&mut self, descriptor: SessionDescriptor) {
        if self.context.is_none() {
            if self.id.is_none() {
                let id = SessionId::generate(self.id_length);
                self.ops.register = Some(id.clone());
                self.id = Some(id);
            }
            match self.profile.media_engine.create_context(
                self.slot,
                self.max_terminations,
                self.engine_signal_tx.clone(),
            ) {
                Ok(context) => self.context = Some(context),
                Err(e) => {
                    warn!("<{}> Failed to create media context: {}", self.sid(), e);
                    let mut answer = descriptor.answer_template();
                    answer.status = SessionStatus::UnavailableResource;
                    self.signaling.answer(answer).await;
                    self.complete_active();
                    return;
                }
            }
        }
        let (c, a, v) = descriptor.arity();
        info!("<{}> Receive offer [c:{} a:{} v:{}]", self.sid(), c, a, v);

        self.answer = Some(descriptor.answer_template());
        self.offer = Some(descriptor);
        self.state_set(SessionState::Answering);

        let Some(context) = self.context else { return };
        self.task_buffer.reset_associations(context);
        self.subrequest_add();

        match self.version {
            MrcpVersion::V1 => {
                if self.resource_offer_process().await {
                    self.av_media_offer_process().await;
                } else if let Some(answer) = self.answer.as_mut() {
                    answer.resource_state = false;
                }
            }
            MrcpVersion::V2 => {
                self.control_media_offer_process().await;
                self.av_media_offer_process().await;
            }
        }

        self.task_buffer.apply_topology(context);
        self.subrequest_add();
        if let Err(e) = self.profile.media_engine.send(&mut self.task_buffer) {
            warn!("<{}> Failed to flush media task batch: {}", self.sid(), e);
        }

        if self.subrequests == 0 {
            self.answer_send().await;
        }
    }

    /// MRCPv1 resource form: at most one channel, named by the offer
    async fn resource_offer_process(&mut self) -> bool {
        let (resource_name, resource_state) = match self.offer.as_ref() {
            Some(offer) => (offer.resource_name.clone(), offer.resource_state),
            None => return false,
        };
        if !resource_state {
            // teardown form of the v1 offer; nothing to set up
            return true;
        }
        let name = resource_name.unwrap_or_default();
        if self.channel_find(&name).is_some() {
            // repeated offer of the same resource is idempotent
            return true;
        }
        let index = self.channels.len();
        let channel = self.channel_create(&name, index, index, 0).await;
        if channel.resource.is_none() {
            return false;
        }
        debug!("<{}> Add control channel [{}]", self.sid(), index);
        self.channels.push(channel);
        self.engine_channel_setup(index, true).await;
        true
    }

    /// MRCPv2 form: walk the offer's control media entries
    async fn control_media_offer_process(&mut self) {
        let control_media: Vec<Option<ControlMediaDescriptor>> = match self.offer.as_ref() {
            Some(offer) => offer.control_media.clone(),
            None => return,
        };
        let mut count = self.channels.len();
        if count > control_media.len() {
            warn!(
                "<{}> {} control channel(s) but only {} control media in offer",
                self.sid(),
                count,
                control_media.len()
            );
            count = control_media.len();
        }

        // update existing channels by position
        for (i, slot) in control_media.iter().enumerate().take(count) {
            self.channels[i].waiting_for_channel = false;
            let Some(descriptor) = slot else { continue };
            debug!("<{}> Modify control channel [{}]", self.sid(), i);
            let mut offer_descriptor = descriptor.clone();
            offer_descriptor.session_id = self.id.clone();
            let accepted = match &self.channels[i].control_channel {
                Some(control) => control.modify(offer_descriptor).await,
                None => false,
            };
            if accepted {
                self.channels[i].waiting_for_channel = true;
                self.subrequest_add();
            } else {
                self.reject_control_slot(i, descriptor);
            }
        }

        // append channels for the extra entries
        for (i, slot) in control_media.iter().enumerate().skip(count) {
            let Some(descriptor) = slot else { continue };
            let index = self.channels.len();
            let channel = self
                .channel_create(&descriptor.resource_name.clone(), i, index, descriptor.cmid)
                .await;
            debug!("<{}> Add control channel [{}]", self.sid(), i);
            self.channels.push(channel);

            let mut offer_descriptor = descriptor.clone();
            offer_descriptor.session_id = self.id.clone();
            let accepted = match &self.channels[index].control_channel {
                Some(control) => control.add(offer_descriptor).await,
                None => false,
            };
            if accepted {
                self.channels[index].waiting_for_channel = true;
                self.subrequest_add();
            } else {
                self.reject_control_slot(i, descriptor);
            }

            self.engine_channel_setup(index, false).await;
        }
    }

    /// Open a channel's engine leg and hand its termination to the context
    async fn engine_channel_setup(&mut self, index: usize, merge_stream_mode: bool) {
        let accepted = match &self.channels[index].engine_channel {
            Some(engine) => engine.driver().open().await,
            None => return,
        };
        if !accepted {
            return;
        }
        self.subrequest_add();

        let Some(context) = self.context else { return };
        let termination = self.channels[index]
            .engine_channel
            .as_mut()
            .and_then(|engine| engine.take_termination());
        if let Some(termination) = termination {
            let mode = termination.stream_mode();
            debug!(
                "<{}> Add channel termination {} for [{}]",
                self.sid(),
                termination.id(),
                index
            );
            self.task_buffer.add_termination(context, termination, None);
            self.channels[index].waiting_for_termination = true;
            self.subrequest_add();

            if merge_stream_mode && !mode.is_none() {
                // v1: widen the offered audio direction by what the engine
                // termination supports
                if let Some(offer) = self.offer.as_mut() {
                    if let Some(media) = offer.audio_media_get_mut(0) {
                        media.mode = media.mode | mode;
                    }
                }
            }
        }
    }

    fn reject_control_slot(&mut self, id: usize, descriptor: &ControlMediaDescriptor) {
        let reject = descriptor.reject_answer(self.id.clone());
        if let Some(answer) = self.answer.as_mut() {
            answer.control_media_set(id, reject);
        }
    }

    /// Create a channel; `id` is its SDP position, `index` its slot in the
    /// session's channel array (the two drift when an offer skips entries)
    async fn channel_create(
        &mut self,
        resource_name: &str,
        id: usize,
        index: usize,
        cmid: usize,
    ) -> MrcpChannel {
        let mut channel = MrcpChannel::new(resource_name, id, cmid);
        if resource_name.is_empty() {
            warn!("<{}> Offer carries no resource identifier", self.sid());
            self.answer_status_set(SessionStatus::NoSuchResource);
            return channel;
        }
        let Some(resource) = self.profile.resource_factory.get(resource_name) else {
            warn!("<{}> No such resource [{}]", self.sid(), resource_name);
            self.answer_status_set(SessionStatus::NoSuchResource);
            return channel;
        };
        channel.resource = Some(resource.clone());

        let channel_ref = ChannelRef::new(self.slot, index, self.dispatch_tx.clone());
        if self.version == MrcpVersion::V2 {
            channel.control_channel = Some(ControlChannel::new(
                self.profile.connection_agent.clone(),
                channel_ref.clone(),
            ));
        }
        channel.state_machine = Some(resource.create_state_machine(self.version));

        match self.profile.engine(resource_name) {
            Some(engine) => match engine.create_channel(channel_ref, self.version).await {
                Some(engine_channel) => channel.engine_channel = Some(engine_channel),
                None => {
                    warn!(
                        "<{}> Resource engine refused channel [{}]",
                        self.sid(),
                        resource_name
                    );
                    self.answer_status_set(SessionStatus::UnacceptableResource);
                }
            },
            None => {
                warn!(
                    "<{}> No resource engine for [{}]",
                    self.sid(),
                    resource_name
                );
                self.answer_status_set(SessionStatus::UnacceptableResource);
            }
        }
        channel
    }

    fn answer_status_set(&mut self, status: SessionStatus) {
        if let Some(answer) = self.answer.as_mut() {
            answer.status = status;
        }
    }

    /// Audio media processing: bind RTP legs and their associations
    async fn av_media_offer_process(&mut self) {
        let audio_media: Vec<Option<RtpMediaDescriptor>> = match self.offer.as_ref() {
            Some(offer) => offer.audio_media.clone(),
            None => return,
        };
        if audio_media.is_empty() {
            return;
        }
        let Some(context) = self.context else { return };

        let mut count = self.terminations.len();
        if count > audio_media.len() {
            warn!(
                "<{}> {} RTP termination(s) but only {} audio media in offer",
                self.sid(),
                count,
                audio_media.len()
            );
            count = audio_media.len();
        }

        // update existing RTP legs
        for i in 0..count {
            let Some(media) = audio_media
                .get(self.terminations[i].id)
                .cloned()
                .flatten()
            else {
                continue;
            };
            Self::bind_slot_channels(&self.channels, &mut self.terminations[i], &media);
            debug!("<{}> Modify RTP termination [{}]", self.sid(), i);
            let descriptor = RtpTerminationDescriptor::with_remote(media);
            self.task_buffer
                .modify_termination(context, self.terminations[i].termination, descriptor);
            self.terminations[i].waiting = true;
            self.subrequest_add();
            self.associations_set(i);
        }

        // create RTP legs for the extra audio media entries
        for (i, slot) in audio_media.iter().enumerate().skip(count) {
            let Some(media) = slot.clone() else { continue };
            let termination = match self.profile.rtp_factory.create() {
                Ok(termination) => termination,
                Err(e) => {
                    warn!("<{}> Failed to create RTP termination: {}", self.sid(), e);
                    self.answer_status_set(SessionStatus::UnavailableResource);
                    continue;
                }
            };
            debug!("<{}> Add RTP termination [{}]", self.sid(), i);
            let mut slot = TerminationSlot {
                termination: termination.id(),
                id: i,
                mid: 0,
                channels: Vec::new(),
                waiting: false,
            };
            Self::bind_slot_channels(&self.channels, &mut slot, &media);
            let descriptor = RtpTerminationDescriptor::with_remote(media);
            self.task_buffer
                .add_termination(context, termination, Some(descriptor));
            slot.waiting = true;
            self.subrequest_add();
            self.terminations.push(slot);
            self.associations_set(self.terminations.len() - 1);
        }
    }

    /// Record which channels share this RTP leg (`cmid == mid`)
    fn bind_slot_channels(
        channels: &[MrcpChannel],
        slot: &mut TerminationSlot,
        media: &RtpMediaDescriptor,
    ) {
        slot.mid = media.mid;
        slot.channels = channels
            .iter()
            .enumerate()
            .filter(|(_, channel)| channel.cmid == slot.mid)
            .map(|(i, _)| i)
            .collect();
    }

    /// Queue the association requests between one RTP leg and its channels
    fn associations_set(&mut self, slot_index: usize) {
        let Some(context) = self.context else { return };
        let slot_termination = self.terminations[slot_index].termination;
        let channel_indices = self.terminations[slot_index].channels.clone();
        for index in channel_indices {
            let Some(termination) = self.channels.get(index).and_then(|c| c.engine_termination_id())
            else {
                continue;
            };
            self.task_buffer
                .add_association(context, slot_termination, termination);
            self.subrequest_add();
        }
    }

    // ------------------------------------------------------------------
    // Answer emission
    // ------------------------------------------------------------------

    async fn answer_send(&mut self) {
        let Some(mut answer) = self.answer.take() else {
            return;
        };
        let offer = self.offer.take();
        // every slot ships non-null: unfilled ones become explicit rejections
        for (i, slot) in answer.control_media.iter_mut().enumerate() {
            if slot.is_none() {
                let from_offer = offer
                    .as_ref()
                    .and_then(|o| o.control_media_get(i))
                    .map(|cm| cm.reject_answer(self.id.clone()));
                *slot = from_offer;
            }
        }
        for (i, slot) in answer.audio_media.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(RtpMediaDescriptor::rejection(i));
            }
        }
        let (c, a, v) = answer.arity();
        info!(
            "<{}> Send answer [c:{} a:{} v:{}] status {}",
            self.sid(),
            c,
            a,
            v,
            answer.status
        );
        self.signaling.answer(answer).await;
        self.complete_active();
    }

    // ------------------------------------------------------------------
    // Control message routing
    // ------------------------------------------------------------------

    async fn on_message_receive(&mut self, channel: Option<usize>, message: MrcpMessage) {
        let index = match channel {
            Some(index) => index,
            None => match self.channel_find(&message.channel_id.resource) {
                Some(index) => index,
                None => {
                    warn!(
                        "<{}> No such channel [{}]",
                        self.sid(),
                        message.channel_id.resource
                    );
                    self.complete_active();
                    return;
                }
            },
        };
        let Some(channel) = self.channels.get_mut(index) else {
            warn!("<{}> Control message for unknown channel [{}]", self.sid(), index);
            self.complete_active();
            return;
        };
        if channel.resource.is_none() || channel.state_machine.is_none() {
            warn!("<{}> No resource on channel [{}]", self.sid(), index);
            self.complete_active();
            return;
        }
        let signals = channel
            .state_machine
            .as_mut()
            .map(|sm| sm.update(message))
            .unwrap_or_default();
        self.process_sm_signals(index, signals).await;
    }

    /// Resource-generated message arriving from the engine channel
    pub(crate) async fn on_engine_channel_message(&mut self, index: usize, message: MrcpMessage) {
        let Some(channel) = self.channels.get_mut(index) else {
            warn!("<{}> Engine message for unknown channel [{}]", self.sid(), index);
            return;
        };
        let signals = channel
            .state_machine
            .as_mut()
            .map(|sm| sm.update(message))
            .unwrap_or_default();
        self.process_sm_signals(index, signals).await;
    }

    async fn process_sm_signals(&mut self, index: usize, signals: Vec<SmSignal>) {
        for signal in signals {
            match signal {
                SmSignal::Dispatch(message) => {
                    if message.is_request() {
                        let accepted = match self.channels.get(index).and_then(|c| c.engine_channel.as_ref()) {
                            Some(engine) => engine.driver().request_process(message).await,
                            None => false,
                        };
                        if !accepted {
                            warn!("<{}> Engine channel refused request", self.sid());
                        }
                    } else {
                        let is_response = message.is_response();
                        self.send_to_client(index, message).await;
                        if is_response {
                            // the active control message is answered; let the
                            // next queued signaling message through
                            self.complete_active();
                        }
                    }
                }
                SmSignal::Deactivated => {
                    if self.subrequest_remove() {
                        self.check_drained().await;
                    }
                }
            }
        }
    }

    async fn send_to_client(&mut self, index: usize, message: MrcpMessage) {
        let sent = match self.channels.get(index).and_then(|c| c.control_channel.as_ref()) {
            // MRCPv2: over the control connection
            Some(control) => control.send_message(message).await,
            // MRCPv1: tunnelled back through the signaling leg
            None => {
                self.signaling.control_response(message).await;
                true
            }
        };
        if !sent {
            warn!("<{}> Failed to send control message", self.sid());
        }
    }

    fn channel_find(&self, resource_name: &str) -> Option<usize> {
        self.channels
            .iter()
            .position(|channel| channel.resource_name == resource_name)
    }

    // ------------------------------------------------------------------
    // Terminate handling
    // ------------------------------------------------------------------

    async fn deactivate(&mut self) {
        if matches!(
            self.state,
            SessionState::Deactivating | SessionState::Terminating
        ) {
            debug!("<{}> Terminate repeated, ignoring", self.sid());
            self.complete_active();
            return;
        }
        info!("<{}> Deactivate session", self.sid());
        self.state_set(SessionState::Deactivating);
        for channel in self.channels.iter_mut() {
            let Some(sm) = channel.state_machine.as_mut() else {
                continue;
            };
            if sm.deactivate() == DeactivateStatus::Pending {
                self.subrequests += 1;
            }
        }
        if self.subrequests == 0 {
            self.terminate_process().await;
        }
    }

    async fn terminate_process(&mut self) {
        info!("<{}> Receive terminate request", self.sid());
        self.state_set(SessionState::Terminating);

        if let Some(context) = self.context {
            self.task_buffer.reset_associations(context);
            self.subrequest_add();
        }

        for index in 0..self.channels.len() {
            debug!("<{}> Remove control channel [{}]", self.sid(), index);
            let accepted = match &self.channels[index].control_channel {
                Some(control) => control.remove().await,
                None => false,
            };
            if accepted {
                self.channels[index].waiting_for_channel = true;
                self.subrequest_add();
            }

            if let Some(context) = self.context {
                if let Some(termination) = self.channels[index].engine_termination_id() {
                    debug!("<{}> Subtract channel termination [{}]", self.sid(), index);
                    self.task_buffer.subtract_termination(context, termination);
                    self.channels[index].waiting_for_termination = true;
                    self.subrequest_add();
                }
            }

            let accepted = match &self.channels[index].engine_channel {
                Some(engine) => engine.driver().close().await,
                None => false,
            };
            if accepted {
                self.subrequest_add();
            }
        }

        if let Some(context) = self.context {
            let sid = self.sid().to_string();
            for slot in self.terminations.iter_mut() {
                debug!("<{}> Subtract RTP termination [{}]", sid, slot.id);
                self.task_buffer.subtract_termination(context, slot.termination);
                slot.waiting = true;
                self.subrequests += 1;
            }
            if let Err(e) = self.profile.media_engine.send(&mut self.task_buffer) {
                warn!("<{}> Failed to flush media task batch: {}", self.sid(), e);
            }
        }

        self.ops.unregister = true;

        if self.subrequests == 0 {
            self.terminate_send().await;
        }
    }

    async fn terminate_send(&mut self) {
        for channel in self.channels.iter_mut() {
            channel.control_channel = None;
            channel.engine_channel = None;
        }
        if let Some(context) = self.context.take() {
            if let Err(e) = self.profile.media_engine.destroy_context(context) {
                warn!("<{}> Failed to destroy media context: {}", self.sid(), e);
            }
        }
        info!("<{}> Send terminate response", self.sid());
        self.signaling.terminate_response().await;
        self.ops.finished = true;
        self.complete_active();
    }

    // ------------------------------------------------------------------
    // Asynchronous acknowledgements
    // ------------------------------------------------------------------

    pub(crate) async fn on_channel_modify_ack(
        &mut self,
        index: usize,
        answer: Option<ControlMediaDescriptor>,
        status: bool,
    ) {
        debug!("<{}> On control channel modify [{}] {}", self.sid(), index, status);
        let Some(channel) = self.channels.get_mut(index) else {
            return;
        };
        if !channel.waiting_for_channel {
            return;
        }
        channel.waiting_for_channel = false;
        let id = channel.id;
        if let Some(mut descriptor) = answer {
            descriptor.session_id = self.id.clone();
            if let Some(session_answer) = self.answer.as_mut() {
                session_answer.control_media_set(id, descriptor);
            }
        } else {
            warn!("<{}> Control channel modify returned no answer", self.sid());
        }
        if self.subrequest_remove() {
            self.check_drained().await;
        }
    }

    pub(crate) async fn on_channel_remove_ack(&mut self, index: usize, _status: bool) {
        debug!("<{}> On control channel remove [{}]", self.sid(), index);
        let Some(channel) = self.channels.get_mut(index) else {
            return;
        };
        if !channel.waiting_for_channel {
            return;
        }
        channel.waiting_for_channel = false;
        if self.subrequest_remove() {
            self.check_drained().await;
        }
    }

    pub(crate) async fn on_channel_disconnect(&mut self, index: usize) {
        debug!("<{}> Control connection dropped [{}]", self.sid(), index);
    }

    pub(crate) async fn on_engine_open_ack(&mut self, index: usize, ok: bool) {
        debug!(
            "<{}> On engine channel open [{}] {}",
            self.sid(),
            index,
            if ok { "ok" } else { "failed" }
        );
        if !ok {
            self.answer_status_set(SessionStatus::UnavailableResource);
        }
        if self.subrequest_remove() {
            self.check_drained().await;
        }
    }

    pub(crate) async fn on_engine_close_ack(&mut self, index: usize) {
        debug!("<{}> On engine channel close [{}]", self.sid(), index);
        if self.subrequest_remove() {
            self.check_drained().await;
        }
    }

    pub(crate) async fn on_engine_signal(&mut self, signal: EngineSignal) {
        match signal {
            EngineSignal::Response(response) => self.on_engine_response(response).await,
            EngineSignal::Event(event) => {
                debug!(
                    "<{}> Media event from {}: {:?}",
                    self.sid(),
                    event.termination,
                    event.event
                );
            }
        }
    }

    async fn on_engine_response(&mut self, response: EngineResponse) {
        match response.command {
            TaskKind::AddTermination | TaskKind::ModifyTermination => {
                self.on_termination_modify(response).await;
            }
            TaskKind::SubtractTermination => {
                self.on_termination_subtract(response).await;
            }
            _ => {
                if self.subrequest_remove() {
                    self.check_drained().await;
                }
            }
        }
    }

    async fn on_termination_modify(&mut self, response: EngineResponse) {
        let Some(termination) = response.termination else {
            return;
        };
        if !response.status {
            warn!(
                "<{}> Termination {} setup failed in media engine",
                self.sid(),
                termination
            );
            self.answer_status_set(SessionStatus::UnavailableResource);
        }
        if let Some(slot) = self
            .terminations
            .iter_mut()
            .find(|slot| slot.termination == termination)
        {
            // RTP termination
            if !slot.waiting {
                return;
            }
            slot.waiting = false;
            let slot_id = slot.id;
            if let Some(local) = response
                .descriptor
                .as_ref()
                .filter(|_| response.status)
                .and_then(|d| d.audio.local.clone())
            {
                if let Some(answer) = self.answer.as_mut() {
                    answer.ip = local.ip;
                    answer.ext_ip = local.ext_ip;
                    let mut media = local;
                    media.id = slot_id;
                    answer.audio_media_set(slot_id, media);
                }
            }
            if self.subrequest_remove() {
                self.check_drained().await;
            }
        } else if let Some(channel) = self
            .channels
            .iter_mut()
            .find(|c| c.engine_termination_id() == Some(termination))
        {
            // engine channel termination
            if !channel.waiting_for_termination {
                return;
            }
            channel.waiting_for_termination = false;
            if self.subrequest_remove() {
                self.check_drained().await;
            }
        }
    }

    async fn on_termination_subtract(&mut self, response: EngineResponse) {
        let Some(termination) = response.termination else {
            return;
        };
        if let Some(slot) = self
            .terminations
            .iter_mut()
            .find(|slot| slot.termination == termination)
        {
            if !slot.waiting {
                return;
            }
            slot.waiting = false;
            if self.subrequest_remove() {
                self.check_drained().await;
            }
        } else if let Some(channel) = self
            .channels
            .iter_mut()
            .find(|c| c.engine_termination_id() == Some(termination))
        {
            if !channel.waiting_for_termination {
                return;
            }
            channel.waiting_for_termination = false;
            if self.subrequest_remove() {
                self.check_drained().await;
            }
        }
    }
}
