//! Signaling serialisation and teardown scenarios

mod common;

use std::time::Duration;

use common::{build_profile, MockConnectionAgent, MockEngine, MockSignaling, SignalEvent};

use mrcpd_media_core::{CodecDescriptor, RtpMediaDescriptor, StreamMode};
use mrcpd_session_core::{
    MessageKind, MrcpMessage, MrcpVersion, SessionDescriptor, SessionServer, SessionServerConfig,
};

fn audio_offer() -> RtpMediaDescriptor {
    RtpMediaDescriptor {
        ip: Some("192.0.2.10".parse().unwrap()),
        port: 40000,
        mode: StreamMode::SEND_RECEIVE,
        codec_list: vec![CodecDescriptor::pcmu()],
        ..RtpMediaDescriptor::new()
    }
}

#[tokio::test]
async fn control_message_queued_behind_in_flight_offer() {
    let server = SessionServer::start(SessionServerConfig::default());
    let agent = MockConnectionAgent::new();
    let synth = MockEngine::new(StreamMode::SEND_RECEIVE);
    let (profile, _media) = build_profile(vec![("speechsynth", synth.clone())], agent);

    let signaling = MockSignaling::new();
    let session = server
        .create_session(profile, MrcpVersion::V1, signaling.clone())
        .unwrap();

    // offer and SPEAK land back to back; the SPEAK must wait for the answer
    let offer = SessionDescriptor::resource_offer("speechsynth", vec![audio_offer()]);
    session.offer(offer).unwrap();
    let speak = MrcpMessage::request(MrcpVersion::V1, "speechsynth", "SPEAK", 1);
    session.control(speak).unwrap();

    assert!(
        signaling
            .wait_until(|log| log
                .iter()
                .any(|e| matches!(e, SignalEvent::Response(_))))
            .await,
        "no SPEAK response within 2s"
    );

    let events = signaling.events();
    let answer_pos = events
        .iter()
        .position(|e| matches!(e, SignalEvent::Answer(_)))
        .expect("answer emitted");
    let response_pos = events
        .iter()
        .position(|e| matches!(e, SignalEvent::Response(_)))
        .expect("response emitted");
    assert!(
        answer_pos < response_pos,
        "answer must ship before the queued SPEAK is dispatched"
    );
    assert_eq!(synth.requests_seen(), 1, "SPEAK dispatched exactly once");
}

#[tokio::test]
async fn terminate_waits_for_recognition_complete() {
    let server = SessionServer::start(SessionServerConfig::default());
    let agent = MockConnectionAgent::new();
    let recog = MockEngine::in_progress(StreamMode::SEND_RECEIVE);
    let (profile, _media) = build_profile(vec![("speechrecog", recog.clone())], agent);

    let signaling = MockSignaling::new();
    let session = server
        .create_session(profile, MrcpVersion::V1, signaling.clone())
        .unwrap();

    let offer = SessionDescriptor::resource_offer("speechrecog", vec![audio_offer()]);
    session.offer(offer).unwrap();
    signaling.wait_answer().await;

    let recognize = MrcpMessage::request(MrcpVersion::V1, "speechrecog", "RECOGNIZE", 1);
    session.control(recognize).unwrap();
    assert!(
        signaling
            .wait_until(|log| log.iter().any(|e| matches!(
                e,
                SignalEvent::Response(m) if m.is_response()
            )))
            .await,
        "no IN-PROGRESS response within 2s"
    );

    // terminate with the RECOGNIZE still in flight
    session.terminate().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        !signaling.terminated(),
        "terminate response must wait for the final event"
    );

    // the recognizer wraps up, emitting its final event
    recog.complete_last("RECOGNITION-COMPLETE");

    assert!(
        signaling.wait_until(|log| log
            .iter()
            .any(|e| matches!(e, SignalEvent::TerminateResponse)))
            .await,
        "no terminate response within 2s"
    );

    let events = signaling.events();
    let complete_pos = events
        .iter()
        .position(|e| matches!(
            e,
            SignalEvent::Response(m) if matches!(
                &m.kind,
                MessageKind::Event { name, .. } if name == "RECOGNITION-COMPLETE"
            )
        ))
        .expect("final event forwarded to the client");
    let terminated_pos = events
        .iter()
        .position(|e| matches!(e, SignalEvent::TerminateResponse))
        .expect("terminate response emitted");
    assert!(
        complete_pos < terminated_pos,
        "final event must reach the client before the terminate response"
    );
}

#[tokio::test]
async fn terminate_is_idempotent() {
    let server = SessionServer::start(SessionServerConfig::default());
    let agent = MockConnectionAgent::new();
    let synth = MockEngine::new(StreamMode::SEND_RECEIVE);
    let (profile, _media) = build_profile(vec![("speechsynth", synth)], agent);

    let signaling = MockSignaling::new();
    let session = server
        .create_session(profile, MrcpVersion::V1, signaling.clone())
        .unwrap();

    let offer = SessionDescriptor::resource_offer("speechsynth", vec![audio_offer()]);
    session.offer(offer).unwrap();
    signaling.wait_answer().await;

    session.terminate().unwrap();
    session.terminate().unwrap();

    assert!(
        signaling
            .wait_until(|log| log
                .iter()
                .any(|e| matches!(e, SignalEvent::TerminateResponse)))
            .await,
        "no terminate response within 2s"
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    let responses = signaling
        .events()
        .iter()
        .filter(|e| matches!(e, SignalEvent::TerminateResponse))
        .count();
    assert_eq!(responses, 1, "exactly one terminate response");
}

#[tokio::test]
async fn terminate_without_offer_still_responds() {
    let server = SessionServer::start(SessionServerConfig::default());
    let agent = MockConnectionAgent::new();
    let (profile, _media) = build_profile(vec![], agent);

    let signaling = MockSignaling::new();
    let session = server
        .create_session(profile, MrcpVersion::V1, signaling.clone())
        .unwrap();

    session.terminate().unwrap();
    assert!(
        signaling
            .wait_until(|log| log
                .iter()
                .any(|e| matches!(e, SignalEvent::TerminateResponse)))
            .await,
        "no terminate response within 2s"
    );
}

#[tokio::test]
async fn control_for_unknown_channel_does_not_wedge_the_queue() {
    let server = SessionServer::start(SessionServerConfig::default());
    let agent = MockConnectionAgent::new();
    let synth = MockEngine::new(StreamMode::SEND_RECEIVE);
    let (profile, _media) = build_profile(vec![("speechsynth", synth)], agent);

    let signaling = MockSignaling::new();
    let session = server
        .create_session(profile, MrcpVersion::V1, signaling.clone())
        .unwrap();

    let offer = SessionDescriptor::resource_offer("speechsynth", vec![audio_offer()]);
    session.offer(offer).unwrap();
    signaling.wait_answer().await;

    // addressed to a resource this session never set up
    let stray = MrcpMessage::request(MrcpVersion::V1, "speechrecog", "RECOGNIZE", 1);
    session.control(stray).unwrap();

    // the queue keeps moving: a terminate behind the failed control completes
    session.terminate().unwrap();
    assert!(
        signaling
            .wait_until(|log| log
                .iter()
                .any(|e| matches!(e, SignalEvent::TerminateResponse)))
            .await,
        "no terminate response within 2s"
    );
}
