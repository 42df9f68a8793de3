//! Route-per-concern `axum::Router` wiring (§6), matching
//! `transports/http/src/server.rs`'s `build_router`/`ServerState` shape.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Json, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;

use fastrtc_webrtc::offer::{OfferRequest, WebRtcTransportConfig};
use fastrtc_webrtc::session::{SessionId, SessionManager};

use crate::error::ApiError;
use crate::telephony::{axum_event_sink, axum_event_source};

/// Shared handlers-and-config state threaded through every route.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub webrtc_config: Arc<WebRtcTransportConfig>,
    pub telephony_handler_factory:
        Arc<dyn Fn() -> fastrtc_core::Result<Box<dyn fastrtc_core::StreamHandler>> + Send + Sync>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/webrtc/offer", post(offer_handler))
        .route("/webrtc/input_hook", post(input_hook_handler))
        .route("/webrtc/output_stream", get(output_stream_handler))
        .route("/ws", get(telephony_handler))
        .with_state(state)
        .layer(
            tower::ServiceBuilder::new()
                .layer(tower_http::trace::TraceLayer::new_for_http())
                .layer(tower_http::cors::CorsLayer::permissive()),
        )
}

async fn offer_handler(
    State(state): State<AppState>,
    Json(request): Json<OfferRequest>,
) -> Result<Json<fastrtc_webrtc::offer::OfferResponse>, ApiError> {
    let answer = fastrtc_webrtc::offer::handle_offer(&state.sessions, &state.webrtc_config, request).await?;
    Ok(Json(answer))
}

#[derive(Debug, Deserialize)]
struct InputHookRequest {
    webrtc_id: String,
    body: serde_json::Value,
}

fn session_not_found(webrtc_id: &str) -> ApiError {
    ApiError(
        StatusCode::NOT_FOUND,
        crate::error::ErrorResponse::new("unknown_session", format!("no session for {webrtc_id}")),
    )
}

async fn input_hook_handler(
    State(state): State<AppState>,
    Json(request): Json<InputHookRequest>,
) -> Result<StatusCode, ApiError> {
    let session = state
        .sessions
        .get(&SessionId(request.webrtc_id.clone()))
        .ok_or_else(|| session_not_found(&request.webrtc_id))?;
    session.set_args(request.body).await;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct OutputStreamQuery {
    webrtc_id: String,
}

/// Streams `AdditionalOutputs` produced by a session's handler as
/// server-sent events until the queue closes or its 10s read timeout
/// fires, matching `webrtc_connection_mixin.py::output_stream`.
async fn output_stream_handler(
    State(state): State<AppState>,
    Query(query): Query<OutputStreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let session = state
        .sessions
        .get(&SessionId(query.webrtc_id.clone()))
        .ok_or_else(|| session_not_found(&query.webrtc_id))?;

    let mut receiver = session
        .output_rx
        .lock()
        .await
        .take()
        .ok_or_else(|| {
            ApiError(
                StatusCode::CONFLICT,
                crate::error::ErrorResponse::new(
                    "output_stream_already_open",
                    format!("output_stream already attached for {}", query.webrtc_id),
                ),
            )
        })?;

    let stream = futures::stream::unfold(receiver, |mut receiver| async move {
        match receiver.recv().await {
            Ok(Some(outputs)) => Some((outputs, receiver)),
            Ok(None) | Err(_) => None,
        }
    })
    .filter_map(|outputs| async move { serde_json::to_string(&outputs).ok() })
    .map(|json| Ok(Event::default().data(json)));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn telephony_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_telephony_socket(socket, state))
}

async fn handle_telephony_socket(socket: WebSocket, state: AppState) {
    if let Err(e) = state.sessions.reserve_slot() {
        tracing::warn!(error = %e, "telephony call rejected: concurrency limit reached");
        return;
    }

    let handler = match (state.telephony_handler_factory)() {
        Ok(h) => h,
        Err(e) => {
            tracing::warn!(error = %e, "telephony handler construction failed");
            state.sessions.release_slot();
            return;
        }
    };

    let (sink_half, source_half) = socket.split();
    let sink = axum_event_sink(sink_half);
    let source = axum_event_source(source_half);

    if let Err(e) = fastrtc_websocket::run_session(handler, source, sink).await {
        tracing::warn!(error = %e, "telephony session ended with an error");
    }
    state.sessions.release_slot();
}
