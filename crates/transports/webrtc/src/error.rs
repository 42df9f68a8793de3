//! Error taxonomy for the WebRTC transport crate (§7).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The concurrency cap was already reached when an offer arrived;
    /// carries the configured limit for the HTTP 429 JSON body.
    #[error("concurrency limit reached: {limit}")]
    ConcurrencyExhausted { limit: usize },

    /// The requested handler's capability (VAD/STT model) could not be
    /// constructed; raised from handler construction, never in the hot
    /// path (§7).
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// webrtc-rs peer connection setup or negotiation failed.
    #[error("peer connection error: {0}")]
    PeerConnection(#[from] webrtc::Error),

    /// A malformed or unparsable SDP offer.
    #[error("invalid offer: {0}")]
    InvalidOffer(String),

    /// The session id referenced by a caller does not exist, or no
    /// longer does (already torn down).
    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error(transparent)]
    Core(#[from] fastrtc_core::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
