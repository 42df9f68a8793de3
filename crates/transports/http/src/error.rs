//! HTTP-layer error mapping (§7), matching `transports/http/src/server.rs`'s
//! `ErrorResponse`/`map_runtime_error` convention.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

/// `{"status": "failed", "meta": {...}}`, the envelope every error route
/// returns (§7). `meta.error` is a stable machine-readable code; `limit`
/// and `message` are populated only where they apply.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub meta: ErrorMeta,
}

#[derive(Debug, Serialize)]
pub struct ErrorMeta {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: "failed",
            meta: ErrorMeta {
                error: error.into(),
                limit: None,
                message: Some(message.into()),
            },
        }
    }

    /// `{"status":"failed","meta":{"error":"concurrency_limit_reached","limit":N}}`,
    /// with no `message` field: the limit alone is what a client backs off on.
    pub fn concurrency_limit_reached(limit: usize) -> Self {
        Self {
            status: "failed",
            meta: ErrorMeta {
                error: "concurrency_limit_reached".to_string(),
                limit: Some(limit),
                message: None,
            },
        }
    }
}

/// Maps a WebRTC transport error to the HTTP status and body the client
/// should see, per §7: `ConcurrencyExhausted` becomes 429, `ModelUnavailable`
/// and invalid offers become 4xx, everything else is a 500.
pub fn map_webrtc_error(e: fastrtc_webrtc::Error) -> (StatusCode, Json<ErrorResponse>) {
    use fastrtc_webrtc::Error::*;
    let (status, body) = match &e {
        ConcurrencyExhausted { limit } => {
            (StatusCode::TOO_MANY_REQUESTS, ErrorResponse::concurrency_limit_reached(*limit))
        }
        ModelUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, ErrorResponse::new("model_unavailable", e.to_string())),
        InvalidOffer(_) => (StatusCode::BAD_REQUEST, ErrorResponse::new("invalid_offer", e.to_string())),
        UnknownSession(_) => (StatusCode::NOT_FOUND, ErrorResponse::new("unknown_session", e.to_string())),
        PeerConnection(_) | Core(_) | Serialization(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::new("internal", e.to_string()))
        }
    };
    (status, Json(body))
}

pub struct ApiError(pub StatusCode, pub ErrorResponse);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(self.1)).into_response()
    }
}

impl From<fastrtc_webrtc::Error> for ApiError {
    fn from(e: fastrtc_webrtc::Error) -> Self {
        let (status, Json(body)) = map_webrtc_error(e);
        ApiError(status, body)
    }
}
