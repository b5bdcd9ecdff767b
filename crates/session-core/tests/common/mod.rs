//! Shared mock collaborators for session integration tests
//!
//! Mocks follow the real collaborator contracts: operations return whether
//! they were accepted and post their acknowledgements back through the
//! channel reference, like the production agents do from their own loops.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use mrcpd_media_core::{
    CodecDescriptor, FrameBuffer, MediaEngine, MediaEngineConfig, MediaEngineHandle, StreamMode,
    Termination,
};
use mrcpd_media_core::stream::AudioStream;
use mrcpd_media_core::types::Codec;
use mrcpd_media_core::{RtpFactoryConfig, RtpTerminationFactory};

use mrcpd_session_core::{
    ChannelRef, ConnectionAgent, ControlMediaDescriptor, EngineChannel, EngineChannelDriver,
    MrcpMessage, Profile, RequestState, ResourceEngine, ResourceFactory, SessionDescriptor,
    SignalingAgent,
};
use mrcpd_session_core::types::MrcpVersion;

/// Everything the signaling agent observed, in order
#[derive(Debug, Clone)]
pub enum SignalEvent {
    Answer(SessionDescriptor),
    Response(MrcpMessage),
    TerminateResponse,
}

/// Recording signaling agent
#[derive(Default)]
pub struct MockSignaling {
    pub log: Mutex<Vec<SignalEvent>>,
}

impl MockSignaling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<SignalEvent> {
        self.log.lock().unwrap().clone()
    }

    pub fn answers(&self) -> Vec<SessionDescriptor> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SignalEvent::Answer(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    pub fn terminated(&self) -> bool {
        self.events()
            .iter()
            .any(|e| matches!(e, SignalEvent::TerminateResponse))
    }

    /// Poll until the log satisfies `predicate` or two seconds pass
    pub async fn wait_until<F>(&self, predicate: F) -> bool
    where
        F: Fn(&[SignalEvent]) -> bool,
    {
        for _ in 0..400 {
            if predicate(&self.log.lock().unwrap()) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    pub async fn wait_answer(&self) -> SessionDescriptor {
        assert!(
            self.wait_until(|log| log.iter().any(|e| matches!(e, SignalEvent::Answer(_))))
                .await,
            "no answer within 2s"
        );
        self.answers().remove(0)
    }
}

#[async_trait]
impl SignalingAgent for MockSignaling {
    async fn answer(&self, descriptor: SessionDescriptor) {
        self.log.lock().unwrap().push(SignalEvent::Answer(descriptor));
    }

    async fn terminate_response(&self) {
        self.log.lock().unwrap().push(SignalEvent::TerminateResponse);
    }

    async fn control_response(&self, message: MrcpMessage) {
        self.log.lock().unwrap().push(SignalEvent::Response(message));
    }
}

/// Connection agent that acknowledges everything from a spawned task
#[derive(Default)]
pub struct MockConnectionAgent {
    /// When false, add/modify are rejected synchronously
    pub accept: bool,
    next_port: AtomicU16,
    pub sent: Mutex<Vec<MrcpMessage>>,
}

impl MockConnectionAgent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            accept: true,
            next_port: AtomicU16::new(6000),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// An agent that rejects every add/modify synchronously
    pub fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            accept: false,
            next_port: AtomicU16::new(6000),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent_messages(&self) -> Vec<MrcpMessage> {
        self.sent.lock().unwrap().clone()
    }

    fn ack_with_answer(&self, channel: ChannelRef, descriptor: ControlMediaDescriptor) -> bool {
        if !self.accept {
            return false;
        }
        let port = self.next_port.fetch_add(1, Ordering::Relaxed);
        let answer = ControlMediaDescriptor {
            port,
            ..descriptor
        };
        tokio::spawn(async move {
            channel.modify_ack(Some(answer), true);
        });
        true
    }
}

#[async_trait]
impl ConnectionAgent for MockConnectionAgent {
    async fn channel_add(&self, channel: ChannelRef, descriptor: ControlMediaDescriptor) -> bool {
        self.ack_with_answer(channel, descriptor)
    }

    async fn channel_modify(
        &self,
        channel: ChannelRef,
        descriptor: ControlMediaDescriptor,
    ) -> bool {
        self.ack_with_answer(channel, descriptor)
    }

    async fn channel_remove(&self, channel: ChannelRef) -> bool {
        tokio::spawn(async move {
            channel.remove_ack(true);
        });
        true
    }

    async fn message_send(&self, _channel: ChannelRef, message: MrcpMessage) -> bool {
        self.sent.lock().unwrap().push(message);
        true
    }
}

/// What the engine saw for its most recent channel
pub struct EngineBinding {
    pub channel: ChannelRef,
    pub requests: Vec<MrcpMessage>,
}

/// Scriptable resource engine
pub struct MockEngine {
    pub mode: StreamMode,
    pub codec: CodecDescriptor,
    pub refuse_channel: bool,
    pub open_result: bool,
    pub respond: RequestState,
    pub binding: Arc<Mutex<Option<EngineBinding>>>,
}

impl MockEngine {
    pub fn new(mode: StreamMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            codec: CodecDescriptor::pcmu(),
            refuse_channel: false,
            open_result: true,
            respond: RequestState::Complete,
            binding: Arc::new(Mutex::new(None)),
        })
    }

    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            refuse_channel: true,
            ..Self::template()
        })
    }

    pub fn failing_open() -> Arc<Self> {
        Arc::new(Self {
            open_result: false,
            ..Self::template()
        })
    }

    pub fn in_progress(mode: StreamMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            respond: RequestState::InProgress,
            ..Self::template()
        })
    }

    fn template() -> Self {
        Self {
            mode: StreamMode::SEND_RECEIVE,
            codec: CodecDescriptor::pcmu(),
            refuse_channel: false,
            open_result: true,
            respond: RequestState::Complete,
            binding: Arc::new(Mutex::new(None)),
        }
    }

    pub fn requests_seen(&self) -> usize {
        self.binding
            .lock()
            .unwrap()
            .as_ref()
            .map(|b| b.requests.len())
            .unwrap_or(0)
    }

    /// Emit the final event for the last request, as a resource would on
    /// recognition completion
    pub fn complete_last(&self, event_name: &str) {
        let binding = self.binding.lock().unwrap();
        let Some(binding) = binding.as_ref() else {
            panic!("no engine channel bound");
        };
        let request = binding.requests.last().expect("no request to complete");
        let event = MrcpMessage::event_for(request, event_name, RequestState::Complete);
        binding.channel.engine_message(event);
    }
}

#[async_trait]
impl ResourceEngine for MockEngine {
    async fn create_channel(
        &self,
        channel: ChannelRef,
        _version: MrcpVersion,
    ) -> Option<EngineChannel> {
        if self.refuse_channel {
            return None;
        }
        *self.binding.lock().unwrap() = Some(EngineBinding {
            channel: channel.clone(),
            requests: Vec::new(),
        });
        let stream = AudioStream::with_codec(
            self.mode,
            Codec::passthrough(self.codec.clone()),
            FrameBuffer::shared(),
        );
        let termination = Termination::engine("engine", stream);
        let driver = MockDriver {
            channel,
            open_result: self.open_result,
            respond: self.respond,
            binding: self.binding.clone(),
        };
        Some(EngineChannel::new(Arc::new(driver), Some(termination)))
    }
}

struct MockDriver {
    channel: ChannelRef,
    open_result: bool,
    respond: RequestState,
    binding: Arc<Mutex<Option<EngineBinding>>>,
}

#[async_trait]
impl EngineChannelDriver for MockDriver {
    async fn open(&self) -> bool {
        let channel = self.channel.clone();
        let ok = self.open_result;
        tokio::spawn(async move {
            channel.open_ack(ok);
        });
        true
    }

    async fn close(&self) -> bool {
        let channel = self.channel.clone();
        tokio::spawn(async move {
            channel.close_ack();
        });
        true
    }

    async fn request_process(&self, message: MrcpMessage) -> bool {
        if let Some(binding) = self.binding.lock().unwrap().as_mut() {
            binding.requests.push(message.clone());
        }
        let response = MrcpMessage::response_to(&message, 200, self.respond);
        self.channel.engine_message(response);
        true
    }
}

/// Assemble a profile over fresh media infrastructure
pub fn build_profile(
    engines: Vec<(&str, Arc<MockEngine>)>,
    agent: Arc<MockConnectionAgent>,
) -> (Arc<Profile>, MediaEngineHandle) {
    let media_engine = MediaEngine::start(MediaEngineConfig::default());
    let rtp_factory = Arc::new(RtpTerminationFactory::new(RtpFactoryConfig::default()));
    let mut engine_table: std::collections::HashMap<String, Arc<dyn ResourceEngine>> =
        std::collections::HashMap::new();
    for (name, engine) in engines {
        engine_table.insert(name.to_string(), engine);
    }
    let profile = Arc::new(Profile {
        resource_factory: Arc::new(ResourceFactory::standard()),
        engine_table,
        connection_agent: agent,
        media_engine: media_engine.clone(),
        rtp_factory,
    });
    (profile, media_engine)
}
