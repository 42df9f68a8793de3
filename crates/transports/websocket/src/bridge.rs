//! Drives a [`StreamHandler`] over a telephony websocket connection
//! (§4.7), grounded in `websocket.py::handle_websocket`/`_emit_loop`: an
//! inbound JSON-event loop feeding `receive`, and an independent
//! fixed-interval timer draining `emit`, running regardless of whether
//! inbound traffic is flowing.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use fastrtc_core::codec::mulaw;
use fastrtc_core::handler::StreamHandler;
use fastrtc_core::resample::AudioResampler;
use fastrtc_core::types::{AudioFrame, Layout, Samples};

use crate::error::{Error, Result};
use crate::protocol::{InboundEvent, OutboundEvent};

pub const TELEPHONY_SAMPLE_RATE: u32 = 8000;
const EMIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Abstracts the websocket send half so this module doesn't depend on a
/// specific server framework's socket type.
#[async_trait::async_trait]
pub trait EventSink: Send {
    async fn send(&mut self, text: String) -> Result<()>;
}

/// Abstracts the websocket receive half.
#[async_trait::async_trait]
pub trait EventSource: Send {
    async fn recv(&mut self) -> Option<String>;
}

/// Resamples a handler's emitted audio to 8kHz mono before mu-law
/// encoding it for the wire; the handler's own rate otherwise has no
/// relationship to what the telephony carrier expects.
struct OutputMulawEncoder {
    resampler: AudioResampler,
}

impl OutputMulawEncoder {
    fn new() -> Self {
        Self {
            resampler: AudioResampler::new(TELEPHONY_SAMPLE_RATE, Layout::Mono),
        }
    }

    fn encode(&mut self, frame: &AudioFrame) -> fastrtc_core::Result<Vec<u8>> {
        let mut samples = Vec::new();
        for resampled in self.resampler.process(frame)? {
            samples.extend(resampled.samples.to_i16());
        }
        Ok(mulaw::encode(&samples))
    }
}

/// Runs one telephony session end to end: reads `start`/`media`/`stop`/
/// `ping` events from `source`, feeds decoded audio to `handler`, and on
/// an independent 20ms timer polls `handler.emit()` to push audio back
/// out as `media` events on `sink`. Returns once the call ends (`stop` or
/// the source closing) or the handler's emit side errors out.
pub async fn run_session(
    mut handler: Box<dyn StreamHandler>,
    mut source: impl EventSource,
    sink: std::sync::Arc<tokio::sync::Mutex<dyn EventSink>>,
) -> Result<()> {
    let mut stream_sid: Option<String> = None;
    let mut encoder = OutputMulawEncoder::new();

    let mut ticker = tokio::time::interval(EMIT_POLL_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = ticker.tick() => {
                if let Some(sid) = &stream_sid {
                    emit_once(handler.as_mut(), sid, &sink, &mut encoder).await;
                }
            }

            received = source.recv() => {
                let Some(text) = received else { break; };
                let event: InboundEvent = serde_json::from_str(&text).map_err(Error::Serialization)?;

                match event {
                    InboundEvent::Connected => {}
                    InboundEvent::Ping => {
                        if let Ok(json) = serde_json::to_string(&OutboundEvent::Pong) {
                            let mut sink = sink.lock().await;
                            let _ = sink.send(json).await;
                        }
                    }
                    InboundEvent::Start { start } => {
                        stream_sid = Some(start.stream_sid);
                        tracing::debug!("telephony stream started");
                    }
                    InboundEvent::Media { media } => {
                        let ulaw_bytes = BASE64
                            .decode(media.payload.as_bytes())
                            .map_err(|e| Error::Protocol(e.to_string()))?;
                        let samples = mulaw::decode(&ulaw_bytes);
                        let frame = AudioFrame {
                            sample_rate: TELEPHONY_SAMPLE_RATE,
                            samples: Samples::I16(samples),
                            layout: Layout::Mono,
                            pts: 0,
                        };
                        if let Err(e) = handler.receive(frame).await {
                            tracing::warn!(error = %e, "telephony handler receive failed");
                        }
                    }
                    InboundEvent::Stop => {
                        tracing::debug!("telephony stream stopped");
                        break;
                    }
                }
            }
        }
    }

    handler.shutdown().await;
    Ok(())
}

async fn emit_once(
    handler: &mut dyn StreamHandler,
    stream_sid: &str,
    sink: &std::sync::Arc<tokio::sync::Mutex<dyn EventSink>>,
    encoder: &mut OutputMulawEncoder,
) {
    match handler.emit().await {
        Ok(emit_type) => {
            let (media, _outputs) = emit_type.split();
            if let Some(frame) = media {
                match encoder.encode(&frame) {
                    Ok(mulaw_bytes) => {
                        let payload = BASE64.encode(mulaw_bytes);
                        let event = OutboundEvent::media(stream_sid.to_string(), payload);
                        if let Ok(json) = serde_json::to_string(&event) {
                            let mut sink = sink.lock().await;
                            let _ = sink.send(json).await;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "telephony output resampling failed"),
                }
            }
        }
        Err(e) => tracing::warn!(error = %e, "telephony handler emit failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fastrtc_core::types::EmitType;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    struct Echo {
        pending: Option<AudioFrame>,
    }

    #[async_trait::async_trait]
    impl StreamHandler for Echo {
        fn expected_layout(&self) -> Layout {
            Layout::Mono
        }
        async fn receive(&mut self, frame: AudioFrame) -> fastrtc_core::Result<()> {
            self.pending = Some(frame);
            Ok(())
        }
        async fn emit(&mut self) -> fastrtc_core::Result<EmitType> {
            Ok(match self.pending.take() {
                Some(f) => EmitType::Audio(f),
                None => EmitType::Empty,
            })
        }
        fn copy(&self) -> Box<dyn StreamHandler> {
            Box::new(Echo { pending: None })
        }
    }

    struct ScriptedSource {
        messages: std::vec::IntoIter<String>,
    }

    #[async_trait::async_trait]
    impl EventSource for ScriptedSource {
        async fn recv(&mut self) -> Option<String> {
            self.messages.next()
        }
    }

    struct RecordingSink {
        sent: Vec<String>,
    }

    #[async_trait::async_trait]
    impl EventSink for RecordingSink {
        async fn send(&mut self, text: String) -> Result<()> {
            self.sent.push(text);
            Ok(())
        }
    }

    #[tokio::test]
    async fn media_event_round_trips_through_mulaw() {
        let ulaw = mulaw::encode(&[1000i16; 160]);
        let payload = BASE64.encode(ulaw);

        let messages = vec![
            r#"{"event":"start","start":{"streamSid":"MZ1"}}"#.to_string(),
            format!(r#"{{"event":"media","media":{{"payload":"{payload}"}}}}"#),
            r#"{"event":"stop"}"#.to_string(),
        ];
        let source = ScriptedSource {
            messages: messages.into_iter(),
        };
        let recording = Arc::new(Mutex::new(RecordingSink { sent: Vec::new() }));
        let sink: Arc<Mutex<dyn EventSink>> = recording.clone();

        run_session(Box::new(Echo { pending: None }), source, sink)
            .await
            .unwrap();

        let sink = recording.lock().await;
        assert!(!sink.sent.is_empty(), "expected at least one media event echoed back");
        assert!(sink.sent.iter().any(|m| m.contains("\"event\":\"media\"") && m.contains("\"streamSid\":\"MZ1\"")));
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let messages = vec![r#"{"event":"ping"}"#.to_string(), r#"{"event":"stop"}"#.to_string()];
        let source = ScriptedSource {
            messages: messages.into_iter(),
        };
        let recording = Arc::new(Mutex::new(RecordingSink { sent: Vec::new() }));
        let sink: Arc<Mutex<dyn EventSink>> = recording.clone();

        run_session(Box::new(Echo { pending: None }), source, sink)
            .await
            .unwrap();

        let sink = recording.lock().await;
        assert!(sink.sent.iter().any(|m| m == r#"{"event":"pong"}"#));
    }
}
