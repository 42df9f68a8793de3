//! Adapts `axum`'s split websocket halves to [`fastrtc_websocket`]'s
//! transport-agnostic `EventSink`/`EventSource` traits.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;

use fastrtc_websocket::{EventSink, EventSource};

struct AxumEventSink(SplitSink<WebSocket, Message>);

#[async_trait::async_trait]
impl EventSink for AxumEventSink {
    async fn send(&mut self, text: String) -> fastrtc_websocket::Result<()> {
        self.0
            .send(Message::Text(text))
            .await
            .map_err(|e| fastrtc_websocket::Error::Protocol(e.to_string()))
    }
}

struct AxumEventSource(SplitStream<WebSocket>);

#[async_trait::async_trait]
impl EventSource for AxumEventSource {
    async fn recv(&mut self) -> Option<String> {
        loop {
            match self.0.next().await? {
                Ok(Message::Text(text)) => return Some(text),
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }
}

pub fn axum_event_sink(sink: SplitSink<WebSocket, Message>) -> Arc<Mutex<dyn EventSink>> {
    Arc::new(Mutex::new(AxumEventSink(sink)))
}

pub fn axum_event_source(source: SplitStream<WebSocket>) -> impl EventSource {
    AxumEventSource(source)
}
