//! Real RTP track and data-channel wiring between a negotiated
//! `RTCPeerConnection` and [`super::pump::drive_audio`]'s decoded
//! `AudioFrame` channels, grounded in `peer/connection.rs`'s
//! `add_audio_track`/`on_track` and `server_peer.rs`'s `on_data_channel`
//! registration sequence.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use webrtc::data_channel::RTCDataChannel;
use webrtc::media::Sample;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use fastrtc_core::types::{AudioFrame, ControlMessage, Layout, Samples};

use crate::error::{Error, Result};
use crate::session::{SessionHandle, SessionId, SessionManager};

/// Converts between decoded PCM samples and the bytes carried on an RTP
/// track. `webrtc-rs` ships no audio codec of its own, and the only Opus
/// binding in the pack is vendored from a git branch, not a registry
/// crate, so this seam advertises uncompressed `audio/L16` (RFC 3551)
/// instead: a real RTP payload format that needs no codec dependency at
/// all. A compressed codec can be dropped in behind this trait later
/// without touching the rest of the transport.
pub trait AudioCodec: Send + Sync {
    fn encode(&self, samples: &[i16]) -> Vec<u8>;
    fn decode(&self, payload: &[u8]) -> Vec<i16>;
    fn mime_type(&self) -> &'static str;
    fn clock_rate(&self) -> u32;
}

/// Uncompressed 16-bit PCM, big-endian, one channel, per RFC 3551's
/// `audio/L16`.
pub struct LinearPcmCodec {
    clock_rate: u32,
}

impl LinearPcmCodec {
    pub fn new(clock_rate: u32) -> Self {
        Self { clock_rate }
    }
}

impl AudioCodec for LinearPcmCodec {
    fn encode(&self, samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_be_bytes()).collect()
    }

    fn decode(&self, payload: &[u8]) -> Vec<i16> {
        payload
            .chunks_exact(2)
            .map(|pair| i16::from_be_bytes([pair[0], pair[1]]))
            .collect()
    }

    fn mime_type(&self) -> &'static str {
        "audio/L16"
    }

    fn clock_rate(&self) -> u32 {
        self.clock_rate
    }
}

/// Adds a send-only audio track to `pc`, returning the handle
/// [`run_outbound_audio`] writes samples into.
pub async fn add_outbound_audio_track(
    pc: &RTCPeerConnection,
    codec: &dyn AudioCodec,
    channels: u16,
    track_id: &str,
    stream_id: &str,
) -> Result<Arc<TrackLocalStaticSample>> {
    let track = Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: codec.mime_type().to_string(),
            clock_rate: codec.clock_rate(),
            channels,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
        track_id.to_string(),
        stream_id.to_string(),
    ));

    pc.add_track(track.clone() as Arc<dyn TrackLocal + Send + Sync>)
        .await
        .map_err(Error::PeerConnection)?;

    Ok(track)
}

/// Drains `rx` and writes each frame to `track` as an RTP sample until
/// `rx` closes, which happens when `drive_audio`'s session loop exits.
pub async fn run_outbound_audio(
    track: Arc<TrackLocalStaticSample>,
    codec: Arc<dyn AudioCodec>,
    mut rx: mpsc::Receiver<AudioFrame>,
) {
    while let Some(frame) = rx.recv().await {
        let duration = Duration::from_secs_f64(frame.duration_secs());
        let payload = codec.encode(&frame.samples.to_i16());
        if let Err(e) = track
            .write_sample(&Sample {
                data: payload.into(),
                duration,
                ..Default::default()
            })
            .await
        {
            tracing::warn!(error = %e, "failed to write outbound audio sample");
            break;
        }
    }
}

/// Registers the inbound-track handler: every RTP packet received on a
/// remote audio track is decoded and forwarded to `tx`, matching
/// `tracks.py::AudioCallback.recv` sitting just above the codec boundary.
pub fn register_inbound_audio(pc: &RTCPeerConnection, codec: Arc<dyn AudioCodec>, tx: mpsc::Sender<AudioFrame>) {
    pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
        let codec = codec.clone();
        let tx = tx.clone();
        Box::pin(async move {
            if track.kind() != RTPCodecType::Audio {
                return;
            }
            let sample_rate = codec.clock_rate();
            loop {
                let (packet, _) = match track.read_rtp().await {
                    Ok(packet) => packet,
                    Err(e) => {
                        tracing::debug!(error = %e, "inbound audio track ended");
                        break;
                    }
                };
                let samples = codec.decode(&packet.payload);
                if samples.is_empty() {
                    continue;
                }
                let frame = AudioFrame {
                    sample_rate,
                    samples: Samples::I16(samples),
                    layout: Layout::Mono,
                    pts: 0,
                };
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
        })
    }));
}

/// Tears a session down as soon as its connection fails or closes,
/// instead of relying solely on the time-limit watchdog.
pub fn register_connection_state_cleanup(pc: &RTCPeerConnection, sessions: Arc<SessionManager>, id: SessionId) {
    pc.on_peer_connection_state_change(Box::new(move |state| {
        let sessions = sessions.clone();
        let id = id.clone();
        Box::pin(async move {
            if matches!(
                state,
                RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed | RTCPeerConnectionState::Disconnected
            ) {
                sessions.clean_up(&id).await;
            }
        })
    }));
}

/// Stores the client-opened data channel on `handle` and routes inbound
/// JSON messages into the out-of-band args path, the same sink `POST
/// /webrtc/input_hook` feeds (`send_input`/`args_set` in the original).
pub fn register_data_channel(pc: &RTCPeerConnection, handle: Arc<SessionHandle>) {
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let handle = handle.clone();
        Box::pin(async move {
            *handle.data_channel.lock().await = Some(dc.clone());
            handle.readiness.mark_channel_set();

            let handle = handle.clone();
            dc.on_message(Box::new(move |msg| {
                let handle = handle.clone();
                Box::pin(async move {
                    let Ok(text) = String::from_utf8(msg.data.to_vec()) else {
                        return;
                    };
                    match serde_json::from_str::<serde_json::Value>(&text) {
                        Ok(value) => handle.set_args(value).await,
                        Err(e) => tracing::warn!(error = %e, "malformed data channel message"),
                    }
                })
            }));
        })
    }));
}

/// Waits for the session's data channel to open, then forwards every
/// handler-initiated [`ControlMessage`] queued on `control_rx` to the
/// client as a text frame, matching `send_message_sync` reaching across
/// to the asyncio event loop once `StreamHandlerBase.channel` is set.
/// Exits as soon as the session is cancelled or the queue's sender side
/// (owned by `drive_audio`) is dropped.
pub async fn forward_control_messages(
    handle: Arc<SessionHandle>,
    mut control_rx: mpsc::UnboundedReceiver<ControlMessage>,
) {
    tokio::select! {
        biased;
        _ = handle.cancel.cancelled() => return,
        _ = handle.readiness.wait_channel() => {}
    }

    let dc = handle.data_channel.lock().await.clone();
    let Some(dc) = dc else { return };

    loop {
        tokio::select! {
            biased;
            _ = handle.cancel.cancelled() => break,
            message = control_rx.recv() => {
                match message {
                    Some(message) => {
                        if dc.send_text(message.to_json()).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_pcm_round_trips_samples() {
        let codec = LinearPcmCodec::new(48_000);
        let samples = vec![0i16, 1, -1, 12345, -12345, i16::MAX, i16::MIN];
        let encoded = codec.encode(&samples);
        assert_eq!(encoded.len(), samples.len() * 2);
        assert_eq!(codec.decode(&encoded), samples);
    }

    #[test]
    fn linear_pcm_advertises_itself_as_l16() {
        let codec = LinearPcmCodec::new(16_000);
        assert_eq!(codec.mime_type(), "audio/L16");
        assert_eq!(codec.clock_rate(), 16_000);
    }

    #[test]
    fn decode_ignores_a_trailing_odd_byte() {
        let codec = LinearPcmCodec::new(48_000);
        let payload = vec![0x00, 0x01, 0xFF];
        assert_eq!(codec.decode(&payload), vec![1i16]);
    }
}
