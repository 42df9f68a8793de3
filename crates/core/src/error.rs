//! Error types for the FastRTC media-plane core.

use thiserror::Error;

/// Result type alias for `fastrtc-core` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by all FastRTC crates (§7 of the spec).
#[derive(Debug, Error)]
pub enum Error {
    /// The concurrency cap was already reached when an offer arrived.
    #[error("concurrency limit reached: {limit}")]
    ConcurrencyExhausted {
        /// The configured concurrency limit.
        limit: usize,
    },

    /// An inbound media track ended.
    #[error("media stream closed: {0}")]
    MediaStreamClosed(String),

    /// A user handler invocation raised an exception.
    #[error("handler fault: {0}")]
    HandlerFault(String),

    /// `emit` exceeded its watchdog deadline.
    #[error("timeout waiting on {0}")]
    Timeout(String),

    /// A malformed offer or telephony event.
    #[error("protocol fault: {0}")]
    ProtocolFault(String),

    /// The VAD or STT capability could not be constructed.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Resampling failed.
    #[error("resample error: {0}")]
    Resample(String),

    /// Serialization/deserialization of a control message failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
