//! Session table (§4.1), collapsing `WebRTCConnectionMixin`'s four
//! parallel dicts (`connections`/`data_channels`/`additional_outputs`/
//! `handlers`) into one entry per session id (REDESIGN FLAG).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::RTCPeerConnection;

use fastrtc_core::handler::{HandlerReadiness, StreamHandler};
use fastrtc_core::output_queue::{self, OutputReceiver, OutputSender};

use crate::error::{Error, Result};

/// Client-supplied correlation id (`webrtc_id` in the original), wrapping
/// a plain `String` so session lookups can't be confused with any other
/// stringly-typed identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything one active peer connection needs, stored as a single table
/// entry instead of scattered across parallel maps.
pub struct SessionHandle {
    pub peer_connection: Arc<RTCPeerConnection>,
    pub data_channel: tokio::sync::Mutex<Option<Arc<RTCDataChannel>>>,
    pub output_tx: OutputSender,
    /// Taken exactly once by whichever task serves `GET
    /// /webrtc/output_stream` for this session.
    pub output_rx: tokio::sync::Mutex<Option<OutputReceiver>>,
    pub cancel: CancellationToken,
    pub created_at: std::time::Instant,
    pub time_limit: Option<Duration>,
    pub readiness: Arc<HandlerReadiness>,
}

/// Constructs handler instances for new sessions, matching §4.1's
/// `HandlerFactory` — called eagerly by `handle_offer` before any peer
/// connection resource is allocated, so a missing VAD/STT capability
/// surfaces as `ModelUnavailable` instead of a half-built session.
pub trait HandlerFactory: Send + Sync {
    fn build(&self) -> fastrtc_core::Result<Box<dyn StreamHandler>>;
}

impl<F> HandlerFactory for F
where
    F: Fn() -> fastrtc_core::Result<Box<dyn StreamHandler>> + Send + Sync,
{
    fn build(&self) -> fastrtc_core::Result<Box<dyn StreamHandler>> {
        self()
    }
}

impl SessionHandle {
    /// Stores the out-of-band arguments delivered via the input hook and
    /// wakes anything waiting on `args_set`. Delegates to `readiness`,
    /// which owns the args slot alongside the gate that guards it, the same
    /// way `StreamHandlerBase` keeps `self.latest_args`/`self.args_set` as
    /// sibling attributes on the handler itself.
    pub async fn set_args(&self, value: serde_json::Value) {
        self.readiness.set_args(value);
    }
}

/// Owns every live session and enforces the concurrency cap (§4.1, §8).
pub struct SessionManager {
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
    concurrency_limit: usize,
    active: AtomicI64,
    handler_factory: Arc<dyn HandlerFactory>,
}

impl SessionManager {
    pub fn new(concurrency_limit: usize, handler_factory: Arc<dyn HandlerFactory>) -> Self {
        Self {
            sessions: DashMap::new(),
            concurrency_limit,
            active: AtomicI64::new(0),
            handler_factory,
        }
    }

    /// Reserve a concurrency slot without building a handler, for
    /// transports (telephony) that construct their handler separately from
    /// the webrtc `HandlerFactory`. Callers must pair a successful
    /// reservation with exactly one `release_slot` on every exit path.
    pub fn reserve_slot(&self) -> Result<()> {
        let limit = self.concurrency_limit as i64;
        loop {
            let current = self.active.load(Ordering::Acquire);
            if current >= limit {
                return Err(Error::ConcurrencyExhausted {
                    limit: self.concurrency_limit,
                });
            }
            if self
                .active
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    /// Reserve a concurrency slot and build a fresh handler, or fail with
    /// `ConcurrencyExhausted`/`ModelUnavailable` before any WebRTC resource
    /// is allocated.
    pub fn reserve(&self) -> Result<Box<dyn StreamHandler>> {
        self.reserve_slot()?;
        match self.handler_factory.build() {
            Ok(handler) => Ok(handler),
            Err(e) => {
                self.release_slot();
                Err(Error::ModelUnavailable(e.to_string()))
            }
        }
    }

    pub fn release_slot(&self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn insert(
        &self,
        id: SessionId,
        peer_connection: Arc<RTCPeerConnection>,
        time_limit: Option<Duration>,
    ) -> Arc<SessionHandle> {
        let (output_tx, output_rx) = output_queue::default_channel();
        let handle = Arc::new(SessionHandle {
            peer_connection,
            data_channel: tokio::sync::Mutex::new(None),
            output_tx,
            output_rx: tokio::sync::Mutex::new(Some(output_rx)),
            cancel: CancellationToken::new(),
            created_at: std::time::Instant::now(),
            time_limit,
            readiness: HandlerReadiness::new(),
        });
        self.sessions.insert(id, handle.clone());
        handle
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Tear down a session, releasing its concurrency slot and removing
    /// it from the table. Idempotent: a second call for an id that is
    /// already gone is a no-op rather than an error (§8 "idempotent
    /// cleanup"), matching `clean_up`'s use of `dict.pop(id, None)`.
    /// Cancelling the token is what actually stops the session: the
    /// `drive_audio` pump task owns the handler and calls its `shutdown`
    /// on exit, so this doesn't touch the handler directly.
    pub async fn clean_up(&self, id: &SessionId) {
        let Some((_, handle)) = self.sessions.remove(id) else {
            return;
        };
        handle.cancel.cancel();
        handle.output_tx.close();
        let _ = handle.peer_connection.close().await;
        self.release_slot();
        tracing::info!(session = %id, "session cleaned up");
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Sessions whose configured time limit has elapsed, for the
    /// watchdog loop to tear down (§4.1 "wait_for_time_limit").
    pub fn expired(&self) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter_map(|entry| {
                let limit = entry.value().time_limit?;
                if entry.value().created_at.elapsed() >= limit {
                    Some(entry.key().clone())
                } else {
                    None
                }
            })
            .collect()
    }
}
