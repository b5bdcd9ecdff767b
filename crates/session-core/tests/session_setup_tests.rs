//! Offer processing scenarios: v1 resource form, v2 control media, failures

mod common;

use std::sync::Arc;

use common::{build_profile, MockConnectionAgent, MockEngine, MockSignaling};

use mrcpd_media_core::{CodecDescriptor, RtpMediaDescriptor, StreamMode};
use mrcpd_session_core::{
    ControlMediaDescriptor, MrcpVersion, SessionDescriptor, SessionServer, SessionServerConfig,
    SessionStatus,
};

fn audio_offer(mid: usize, codec: CodecDescriptor) -> RtpMediaDescriptor {
    RtpMediaDescriptor {
        mid,
        ip: Some("192.0.2.10".parse().unwrap()),
        port: 40000,
        mode: StreamMode::SEND_RECEIVE,
        codec_list: vec![codec],
        ..RtpMediaDescriptor::new()
    }
}

#[tokio::test]
async fn v1_single_recognizer_setup() {
    let server = SessionServer::start(SessionServerConfig::default());
    let agent = MockConnectionAgent::new();
    let recog = MockEngine::new(StreamMode::SEND_RECEIVE);
    let (profile, _media) = build_profile(vec![("speechrecog", recog)], agent);

    let signaling = MockSignaling::new();
    let session = server
        .create_session(profile, MrcpVersion::V1, signaling.clone())
        .unwrap();

    let offer = SessionDescriptor::resource_offer(
        "speechrecog",
        vec![audio_offer(0, CodecDescriptor::pcmu())],
    );
    session.offer(offer).unwrap();

    let answer = signaling.wait_answer().await;
    assert_eq!(answer.status, SessionStatus::Ok);
    assert!(answer.resource_state);
    assert_eq!(answer.audio_media.len(), 1);
    let media = answer.audio_media[0].as_ref().expect("audio slot filled");
    assert!(media.port >= 40000, "local port allocated, got {}", media.port);
    assert!(answer.ip.is_some(), "answer carries the local bind ip");
}

#[tokio::test]
async fn v2_synthesizer_and_recognizer_share_one_rtp_leg() {
    let server = SessionServer::start(SessionServerConfig::default());
    let agent = MockConnectionAgent::new();
    let synth = MockEngine::new(StreamMode::SEND_RECEIVE);
    let recog = MockEngine::new(StreamMode::SEND_RECEIVE);
    let (profile, _media) = build_profile(
        vec![("speechsynth", synth), ("speechrecog", recog)],
        agent,
    );

    let signaling = MockSignaling::new();
    let session = server
        .create_session(profile, MrcpVersion::V2, signaling.clone())
        .unwrap();

    let mut offer = SessionDescriptor::new();
    offer
        .control_media
        .push(Some(ControlMediaDescriptor::new("speechsynth", 1, 9)));
    offer
        .control_media
        .push(Some(ControlMediaDescriptor::new("speechrecog", 1, 9)));
    offer
        .audio_media
        .push(Some(audio_offer(1, CodecDescriptor::pcmu())));
    session.offer(offer).unwrap();

    let answer = signaling.wait_answer().await;
    assert_eq!(answer.status, SessionStatus::Ok);
    assert_eq!(answer.arity(), (2, 1, 0));

    for slot in &answer.control_media {
        let control = slot.as_ref().expect("control slot filled");
        assert_ne!(control.port, 0, "channel accepted");
        let id = control.session_id.as_ref().expect("session id assigned");
        assert_eq!(id.as_str().len(), 16);
    }
    let media = answer.audio_media[0].as_ref().expect("audio slot filled");
    assert_ne!(media.port, 0);
}

#[tokio::test]
async fn unknown_resource_rejects_its_slot_and_keeps_the_rest() {
    let server = SessionServer::start(SessionServerConfig::default());
    let agent = MockConnectionAgent::new();
    let synth = MockEngine::new(StreamMode::SEND_RECEIVE);
    let (profile, _media) = build_profile(vec![("speechsynth", synth)], agent);

    let signaling = MockSignaling::new();
    let session = server
        .create_session(profile, MrcpVersion::V2, signaling.clone())
        .unwrap();

    let mut offer = SessionDescriptor::new();
    offer
        .control_media
        .push(Some(ControlMediaDescriptor::new("speechsynth", 1, 9)));
    offer
        .control_media
        .push(Some(ControlMediaDescriptor::new("unknown", 1, 9)));
    offer
        .audio_media
        .push(Some(audio_offer(1, CodecDescriptor::pcmu())));
    session.offer(offer).unwrap();

    let answer = signaling.wait_answer().await;
    assert_eq!(answer.status, SessionStatus::NoSuchResource);

    let good = answer.control_media[0].as_ref().expect("synth slot filled");
    assert_ne!(good.port, 0);
    let rejected = answer.control_media[1].as_ref().expect("rejection slot present");
    assert_eq!(rejected.port, 0);
    // the audio slot was still processed
    assert!(answer.audio_media[0].is_some());
}

#[tokio::test]
async fn missing_engine_marks_resource_unacceptable() {
    let server = SessionServer::start(SessionServerConfig::default());
    let agent = MockConnectionAgent::new();
    // resource is known, but no engine is configured for it
    let (profile, _media) = build_profile(vec![], agent);

    let signaling = MockSignaling::new();
    let session = server
        .create_session(profile, MrcpVersion::V1, signaling.clone())
        .unwrap();

    let offer = SessionDescriptor::resource_offer(
        "speechsynth",
        vec![audio_offer(0, CodecDescriptor::pcmu())],
    );
    session.offer(offer).unwrap();

    let answer = signaling.wait_answer().await;
    assert_eq!(answer.status, SessionStatus::UnacceptableResource);
}

#[tokio::test]
async fn engine_open_failure_marks_resource_unavailable() {
    let server = SessionServer::start(SessionServerConfig::default());
    let agent = MockConnectionAgent::new();
    let recog = MockEngine::failing_open();
    let (profile, _media) = build_profile(vec![("speechrecog", recog)], agent);

    let signaling = MockSignaling::new();
    let session = server
        .create_session(profile, MrcpVersion::V1, signaling.clone())
        .unwrap();

    let offer = SessionDescriptor::resource_offer(
        "speechrecog",
        vec![audio_offer(0, CodecDescriptor::pcmu())],
    );
    session.offer(offer).unwrap();

    let answer = signaling.wait_answer().await;
    assert_eq!(answer.status, SessionStatus::UnavailableResource);
}

#[tokio::test]
async fn refused_engine_channel_marks_resource_unacceptable() {
    let server = SessionServer::start(SessionServerConfig::default());
    let agent = MockConnectionAgent::new();
    let recog = MockEngine::refusing();
    let (profile, _media) = build_profile(vec![("speechrecog", recog)], agent);

    let signaling = MockSignaling::new();
    let session = server
        .create_session(profile, MrcpVersion::V1, signaling.clone())
        .unwrap();

    let offer = SessionDescriptor::resource_offer(
        "speechrecog",
        vec![audio_offer(0, CodecDescriptor::pcmu())],
    );
    session.offer(offer).unwrap();

    let answer = signaling.wait_answer().await;
    assert_eq!(answer.status, SessionStatus::UnacceptableResource);
}

#[tokio::test]
async fn context_capacity_exhaustion_marks_answer_unavailable() {
    // capacity 5, one recognizer termination plus six RTP legs cannot fit
    let server = SessionServer::start(SessionServerConfig::default());
    let agent = MockConnectionAgent::new();
    let (profile, _media) = build_profile(vec![], agent);

    let signaling = MockSignaling::new();
    let session = server
        .create_session(profile, MrcpVersion::V2, signaling.clone())
        .unwrap();

    let mut offer = SessionDescriptor::new();
    for _ in 0..6 {
        offer
            .audio_media
            .push(Some(audio_offer(0, CodecDescriptor::pcmu())));
    }
    session.offer(offer).unwrap();

    let answer = signaling.wait_answer().await;
    assert_eq!(answer.status, SessionStatus::UnavailableResource);
    assert_eq!(answer.audio_media.len(), 6);
}

#[tokio::test]
async fn synchronous_control_channel_rejection_yields_port_zero_slot() {
    let server = SessionServer::start(SessionServerConfig::default());
    let agent = MockConnectionAgent::rejecting();
    let synth = MockEngine::new(StreamMode::SEND_RECEIVE);
    let (profile, _media) = build_profile(vec![("speechsynth", synth)], agent);

    let signaling = MockSignaling::new();
    let session = server
        .create_session(profile, MrcpVersion::V2, signaling.clone())
        .unwrap();

    let mut offer = SessionDescriptor::new();
    offer
        .control_media
        .push(Some(ControlMediaDescriptor::new("speechsynth", 1, 9)));
    offer
        .audio_media
        .push(Some(audio_offer(1, CodecDescriptor::pcmu())));
    session.offer(offer).unwrap();

    let answer = signaling.wait_answer().await;
    // the session stays alive and the slot is an explicit rejection
    assert_eq!(answer.status, SessionStatus::Ok);
    let control = answer.control_media[0].as_ref().expect("rejection slot");
    assert_eq!(control.port, 0);
}

#[tokio::test]
async fn codec_rate_mismatch_still_answers_ok() {
    let server = SessionServer::start(SessionServerConfig::default());
    let agent = MockConnectionAgent::new();
    // the engine termination negotiates PCMU/8000 while the RTP leg offers
    // PCMU/16000; no bridge can be built but the session itself is fine
    let recog = MockEngine::new(StreamMode::SEND_RECEIVE);
    let (profile, _media) = build_profile(vec![("speechrecog", recog)], agent);

    let signaling = MockSignaling::new();
    let session = server
        .create_session(profile, MrcpVersion::V1, signaling.clone())
        .unwrap();

    let wideband = CodecDescriptor {
        sampling_rate: 16000,
        ..CodecDescriptor::pcmu()
    };
    let offer = SessionDescriptor::resource_offer("speechrecog", vec![audio_offer(0, wideband)]);
    session.offer(offer).unwrap();

    let answer = signaling.wait_answer().await;
    assert_eq!(answer.status, SessionStatus::Ok);
    assert!(answer.audio_media[0].is_some());
}
