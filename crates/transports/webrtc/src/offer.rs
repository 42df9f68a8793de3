//! SDP offer/answer negotiation (§4.1, §6), grounded in
//! `peer/connection.rs`'s `APIBuilder`/`RTCConfiguration` setup and
//! `webrtc_connection_mixin.py::handle_offer`.

use std::sync::Arc;
use std::time::Duration;

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::error::{Error, Result};
use crate::media::pump::{self, OUTPUT_LAYOUT, OUTPUT_SAMPLE_RATE};
use crate::media::track::{self, AudioCodec, LinearPcmCodec};
use crate::session::{SessionId, SessionManager};

/// RTP clock rate advertised for the `audio/L16` tracks this transport
/// negotiates. Matches [`OUTPUT_SAMPLE_RATE`], the rate `drive_audio`
/// resamples every outbound frame to, so the advertised clock and the
/// samples actually written to the track agree. See `media::track`'s
/// module doc for why L16 instead of Opus.
const AUDIO_CLOCK_RATE: u32 = OUTPUT_SAMPLE_RATE;
const TRACK_CHANNEL_CAPACITY: usize = 32;

/// STUN/TURN servers and per-session limits, matching the fields
/// `WebRtcTransportConfig` carries in the teacher crate.
#[derive(Debug, Clone)]
pub struct WebRtcTransportConfig {
    pub ice_servers: Vec<String>,
    pub time_limit: Option<Duration>,
}

impl Default for WebRtcTransportConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            time_limit: None,
        }
    }
}

/// The client's SDP offer, as received on `POST /webrtc/offer` (§6).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct OfferRequest {
    pub webrtc_id: String,
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
}

/// The server's SDP answer returned to the caller.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OfferResponse {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
}

async fn build_peer_connection(config: &WebRtcTransportConfig) -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(Error::PeerConnection)?;

    let mut registry = webrtc::interceptor::registry::Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine).map_err(Error::PeerConnection)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let ice_servers = vec![RTCIceServer {
        urls: config.ice_servers.clone(),
        ..Default::default()
    }];

    let rtc_config = RTCConfiguration {
        ice_servers,
        ..Default::default()
    };

    let pc = api.new_peer_connection(rtc_config).await.map_err(Error::PeerConnection)?;
    Ok(Arc::new(pc))
}

/// Accept an SDP offer: reserve a concurrency slot, build a peer
/// connection, wire its tracks and data channel, negotiate, and register
/// the new session. Returns `ConcurrencyExhausted` before any WebRTC
/// resource is allocated when the cap is already reached (§4.1, §8).
pub async fn handle_offer(
    sessions: &Arc<SessionManager>,
    config: &WebRtcTransportConfig,
    offer: OfferRequest,
) -> Result<OfferResponse> {
    let handler = sessions.reserve()?;

    let peer_connection = match build_peer_connection(config).await {
        Ok(pc) => pc,
        Err(e) => {
            sessions.release_slot();
            return Err(e);
        }
    };

    let id = SessionId(offer.webrtc_id.clone());
    let codec: Arc<dyn AudioCodec> = Arc::new(LinearPcmCodec::new(AUDIO_CLOCK_RATE));

    let outbound_track = match track::add_outbound_audio_track(
        &peer_connection,
        codec.as_ref(),
        OUTPUT_LAYOUT.channels() as u16,
        &format!("audio-{}", offer.webrtc_id),
        &format!("stream-{}", offer.webrtc_id),
    )
    .await
    {
        Ok(track) => track,
        Err(e) => {
            sessions.release_slot();
            return Err(e);
        }
    };

    let (inbound_tx, inbound_rx) = tokio::sync::mpsc::channel(TRACK_CHANNEL_CAPACITY);
    let (outbound_tx, outbound_rx) = tokio::sync::mpsc::channel(TRACK_CHANNEL_CAPACITY);

    // Track and data-channel handlers must be registered before the
    // remote description is set, so a client offering a data channel or
    // track in the same SDP doesn't race the registration.
    track::register_inbound_audio(&peer_connection, codec.clone(), inbound_tx);
    track::register_connection_state_cleanup(&peer_connection, sessions.clone(), id.clone());

    let remote_desc = RTCSessionDescription::offer(offer.sdp.clone()).map_err(|e| {
        sessions.release_slot();
        Error::InvalidOffer(e.to_string())
    })?;
    if let Err(e) = peer_connection.set_remote_description(remote_desc).await {
        sessions.release_slot();
        return Err(Error::PeerConnection(e));
    }

    let answer = match peer_connection.create_answer(None).await {
        Ok(answer) => answer,
        Err(e) => {
            sessions.release_slot();
            return Err(Error::PeerConnection(e));
        }
    };

    let mut gather_complete = peer_connection.gathering_complete_promise().await;
    if let Err(e) = peer_connection.set_local_description(answer).await {
        sessions.release_slot();
        return Err(Error::PeerConnection(e));
    }
    let _ = gather_complete.recv().await;

    let local_desc = peer_connection
        .local_description()
        .await
        .ok_or_else(|| Error::PeerConnection(webrtc::Error::ErrSDPDoesNotMatchOffer))?;

    let handle = sessions.insert(id, peer_connection.clone(), config.time_limit);
    track::register_data_channel(&peer_connection, handle.clone());

    let (control_tx, control_rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(track::forward_control_messages(handle.clone(), control_rx));

    tokio::spawn(pump::drive_audio(
        handler,
        inbound_rx,
        outbound_tx,
        handle.output_tx.clone(),
        control_tx,
        handle.readiness.clone(),
        handle.cancel.clone(),
    ));
    tokio::spawn(track::run_outbound_audio(outbound_track, codec, outbound_rx));

    Ok(OfferResponse {
        sdp: local_desc.sdp,
        sdp_type: local_desc.sdp_type.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_a_stun_server() {
        let config = WebRtcTransportConfig::default();
        assert!(!config.ice_servers.is_empty());
        assert!(config.time_limit.is_none());
    }
}
