//! End-to-end coverage for the session pump without a real WebRTC
//! negotiation, grounded in `transports/webrtc/tests/e2e_webrtc_test.rs`'s
//! convention of exercising the runtime loop directly rather than through
//! a live network stack.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use webrtc::api::APIBuilder;
use webrtc::peer_connection::configuration::RTCConfiguration;

use fastrtc_core::handler::{HandlerReadiness, StreamHandler};
use fastrtc_core::output_queue;
use fastrtc_core::types::{AdditionalOutputs, AudioFrame, EmitType, Layout};
use fastrtc_webrtc::media::pump::drive_audio;
use fastrtc_webrtc::media::track::{AudioCodec, LinearPcmCodec};
use fastrtc_webrtc::{HandlerFactory, SessionId, SessionManager};

struct TickingHandler {
    shutdown_called: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl StreamHandler for TickingHandler {
    fn expected_layout(&self) -> Layout {
        Layout::Mono
    }

    async fn receive(&mut self, _frame: AudioFrame) -> fastrtc_core::Result<()> {
        Ok(())
    }

    async fn emit(&mut self) -> fastrtc_core::Result<EmitType> {
        Ok(EmitType::Outputs(AdditionalOutputs::new(vec![serde_json::json!({"tick": true})])))
    }

    fn copy(&self) -> Box<dyn StreamHandler> {
        Box::new(TickingHandler {
            shutdown_called: self.shutdown_called.clone(),
        })
    }

    async fn shutdown(&mut self) {
        self.shutdown_called.store(true, Ordering::SeqCst);
    }
}

/// Covers "teardown drains queues": cancelling a session's token stops
/// the pump loop and runs the handler's shutdown hook, the same sequence
/// `SessionManager::clean_up` relies on to release a session's resources.
#[tokio::test]
async fn cancelling_a_session_shuts_its_handler_down() {
    let (_audio_tx, audio_rx) = mpsc::channel(4);
    let (sink_tx, _sink_rx) = mpsc::channel(4);
    let (output_tx, mut output_rx) = output_queue::default_channel();
    let cancel = CancellationToken::new();
    let shutdown_called = Arc::new(AtomicBool::new(false));

    let handler = Box::new(TickingHandler {
        shutdown_called: shutdown_called.clone(),
    });
    let (control_tx, _control_rx) = tokio::sync::mpsc::unbounded_channel();
    let task = tokio::spawn(drive_audio(
        handler,
        audio_rx,
        sink_tx,
        output_tx,
        control_tx,
        HandlerReadiness::new(),
        cancel.clone(),
    ));

    let first = tokio::time::timeout(Duration::from_secs(1), output_rx.recv())
        .await
        .expect("output queue should not time out while the pump is running")
        .expect("recv should not surface an internal error");
    assert!(first.is_some(), "the ticking handler should have produced an output");

    cancel.cancel();
    task.await.expect("pump task should exit cleanly on cancellation");

    assert!(shutdown_called.load(Ordering::SeqCst), "handler shutdown should run on teardown");
}

/// Covers "sample monotonicity" at the RTP codec boundary: encoding and
/// decoding a sequence of frames never reorders or drops samples within
/// a frame, which is what a monotonically advancing RTP timestamp
/// assumes of its payload.
#[test]
fn codec_round_trip_preserves_sample_order_across_frames() {
    let codec = LinearPcmCodec::new(48_000);
    let frames: Vec<Vec<i16>> = vec![
        (0..160).collect(),
        (-80..80).collect(),
        vec![i16::MIN, 0, i16::MAX],
    ];

    for frame in frames {
        let encoded = codec.encode(&frame);
        let decoded = codec.decode(&encoded);
        assert_eq!(decoded, frame, "frame samples must round-trip in order");
    }
}

struct NoopHandler;

#[async_trait::async_trait]
impl StreamHandler for NoopHandler {
    fn expected_layout(&self) -> Layout {
        Layout::Mono
    }
    async fn receive(&mut self, _frame: AudioFrame) -> fastrtc_core::Result<()> {
        Ok(())
    }
    async fn emit(&mut self) -> fastrtc_core::Result<EmitType> {
        Ok(EmitType::Empty)
    }
    fn copy(&self) -> Box<dyn StreamHandler> {
        Box::new(NoopHandler)
    }
}

fn noop_factory() -> Arc<dyn HandlerFactory> {
    Arc::new(|| -> fastrtc_core::Result<Box<dyn StreamHandler>> { Ok(Box::new(NoopHandler)) })
}

/// Covers "data-channel ordering": messages delivered to `SessionHandle`
/// one after another (the way `RTCDataChannel::on_message` hands them off,
/// one at a time, from its own internal reader) must land in that same
/// order rather than racing each other through the args mutex.
#[tokio::test]
async fn sequential_data_channel_messages_apply_in_order() {
    let manager = SessionManager::new(4, noop_factory());
    let api = APIBuilder::new().build();
    let pc = Arc::new(
        api.new_peer_connection(RTCConfiguration::default())
            .await
            .expect("peer connection should build with a default configuration"),
    );

    let handle = manager.insert(SessionId("ordering-test".into()), pc, None);

    for i in 0..50 {
        handle.set_args(serde_json::json!({ "seq": i })).await;
    }

    let args = handle.readiness.args().expect("args should be set");
    assert_eq!(args, serde_json::json!({ "seq": 49 }), "the last applied message must win");

    manager.clean_up(&SessionId("ordering-test".into())).await;
}
