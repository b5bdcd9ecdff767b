//! Integration tests for the media engine loop
//!
//! Drives the engine the way a session does: batched task items in, ordered
//! responses out, with the tick stepping the materialised topology.

use std::time::Duration;

use tokio::sync::mpsc;

use mrcpd_media_core::{
    AudioFrame, Codec, CodecDescriptor, EngineSignal, FrameBuffer, MediaEngine, MediaEngineConfig,
    StreamMode, TaskKind, TaskMessageBuffer, Termination,
};
use mrcpd_media_core::stream::AudioStream;
use mrcpd_media_core::types::FrameData;

fn engine_term(mode: StreamMode) -> Termination {
    let stream = AudioStream::with_codec(
        mode,
        Codec::passthrough(CodecDescriptor::pcmu()),
        FrameBuffer::shared(),
    );
    Termination::engine("test", stream)
}

async fn next_response(
    rx: &mut mpsc::UnboundedReceiver<EngineSignal>,
) -> mrcpd_media_core::EngineResponse {
    loop {
        let signal = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("engine response within 1s")
            .expect("engine channel open");
        match signal {
            EngineSignal::Response(response) => return response,
            EngineSignal::Event(_) => continue,
        }
    }
}

#[tokio::test]
async fn batch_items_are_answered_in_order() {
    let handle = MediaEngine::start(MediaEngineConfig::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let ctx = handle.create_context(7, 5, tx).unwrap();

    let a = engine_term(StreamMode::SEND_RECEIVE);
    let b = engine_term(StreamMode::SEND_RECEIVE);
    let (a_id, b_id) = (a.id(), b.id());

    let mut buffer = TaskMessageBuffer::new();
    buffer.reset_associations(ctx);
    buffer.add_termination(ctx, a, None);
    buffer.add_termination(ctx, b, None);
    buffer.add_association(ctx, a_id, b_id);
    buffer.apply_topology(ctx);
    handle.send(&mut buffer).unwrap();
    assert!(buffer.is_empty());

    let expected = [
        TaskKind::ResetAssociations,
        TaskKind::AddTermination,
        TaskKind::AddTermination,
        TaskKind::AddAssociation,
        TaskKind::ApplyTopology,
    ];
    for kind in expected {
        let response = next_response(&mut rx).await;
        assert_eq!(response.command, kind);
        assert_eq!(response.owner, 7);
        assert!(response.status, "{:?} failed", kind);
    }

    let stats = handle.context_stats(ctx).await.unwrap().unwrap();
    assert_eq!(stats.termination_count, 2);
    assert_eq!(stats.association_count, 2);
    assert_eq!(stats.object_count, 2);
    assert!(stats.in_ring);
}

#[tokio::test]
async fn subtracting_last_termination_leaves_the_ring() {
    let handle = MediaEngine::start(MediaEngineConfig::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let ctx = handle.create_context(1, 5, tx).unwrap();

    let t = engine_term(StreamMode::SEND_RECEIVE);
    let t_id = t.id();
    let mut buffer = TaskMessageBuffer::new();
    buffer.add_termination(ctx, t, None);
    handle.send(&mut buffer).unwrap();
    next_response(&mut rx).await;

    assert!(handle.context_stats(ctx).await.unwrap().unwrap().in_ring);

    buffer.subtract_termination(ctx, t_id);
    handle.send(&mut buffer).unwrap();
    let response = next_response(&mut rx).await;
    assert_eq!(response.command, TaskKind::SubtractTermination);
    assert!(response.status);

    let stats = handle.context_stats(ctx).await.unwrap().unwrap();
    assert_eq!(stats.termination_count, 0);
    assert!(!stats.in_ring);

    handle.destroy_context(ctx).unwrap();
    assert!(handle.context_stats(ctx).await.unwrap().is_none());
}

#[tokio::test]
async fn tick_moves_frames_across_an_applied_topology() {
    let handle = MediaEngine::start(MediaEngineConfig {
        tick_interval: Duration::from_millis(2),
    });
    let (tx, mut rx) = mpsc::unbounded_channel();
    let ctx = handle.create_context(1, 5, tx).unwrap();

    // producer only receives (readable source), consumer only sends (writable sink)
    let producer_endpoint = FrameBuffer::shared();
    let producer = Termination::engine(
        "producer",
        AudioStream::with_codec(
            StreamMode::RECEIVE,
            Codec::passthrough(CodecDescriptor::pcmu()),
            producer_endpoint.clone(),
        ),
    );
    let consumer_endpoint = FrameBuffer::shared();
    let consumer = Termination::engine(
        "consumer",
        AudioStream::with_codec(
            StreamMode::SEND,
            Codec::passthrough(CodecDescriptor::pcmu()),
            consumer_endpoint.clone(),
        ),
    );
    let (producer_id, consumer_id) = (producer.id(), consumer.id());

    let mut buffer = TaskMessageBuffer::new();
    buffer.add_termination(ctx, producer, None);
    buffer.add_termination(ctx, consumer, None);
    buffer.add_association(ctx, producer_id, consumer_id);
    buffer.apply_topology(ctx);
    handle.send(&mut buffer).unwrap();
    for _ in 0..4 {
        next_response(&mut rx).await;
    }

    producer_endpoint
        .lock()
        .unwrap()
        .write_frame(AudioFrame::pcm(vec![42; 160], 8000, 1));

    let mut moved = None;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if let Some(frame) = consumer_endpoint.lock().unwrap().read_frame() {
            moved = Some(frame);
            break;
        }
    }
    let frame = moved.expect("tick moved the frame to the consumer");
    assert_eq!(frame.data, FrameData::Pcm(vec![42; 160]));
}
