//! Bounded side-channel delivery for [`crate::types::AdditionalOutputs`]
//! (§4.3, §5). Python's `OutputQueue` dataclass wraps an unbounded
//! `asyncio.Queue` plus a `quit` event; the REDESIGN FLAG resolving Open
//! Question 1 makes this bounded and drops the oldest entry on overflow
//! instead of growing without bound.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio::time::{timeout, Duration};

use crate::error::{Error, Result};
use crate::types::AdditionalOutputs;

const DEFAULT_CAPACITY: usize = 100;
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

struct Shared {
    buffer: Mutex<VecDeque<AdditionalOutputs>>,
    capacity: usize,
    ready: Notify,
    closed: std::sync::atomic::AtomicBool,
}

/// Producer half, held by the handler-driving task.
#[derive(Clone)]
pub struct OutputSender {
    shared: Arc<Shared>,
}

/// Consumer half, held by the transport's output stream.
pub struct OutputReceiver {
    shared: Arc<Shared>,
}

/// Creates a bounded output queue with room for `capacity` pending
/// outputs; a full queue drops the oldest entry rather than blocking the
/// producer (half-duplex turn-taking must never stall on a slow consumer).
pub fn channel(capacity: usize) -> (OutputSender, OutputReceiver) {
    let shared = Arc::new(Shared {
        buffer: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        capacity: capacity.max(1),
        ready: Notify::new(),
        closed: std::sync::atomic::AtomicBool::new(false),
    });
    (
        OutputSender { shared: shared.clone() },
        OutputReceiver { shared },
    )
}

pub fn default_channel() -> (OutputSender, OutputReceiver) {
    channel(DEFAULT_CAPACITY)
}

impl OutputSender {
    /// Enqueue a value, dropping the oldest pending entry if the queue is
    /// already at capacity.
    pub fn push(&self, value: AdditionalOutputs) {
        if self.shared.closed.load(std::sync::atomic::Ordering::Acquire) {
            return;
        }
        let mut buffer = self.shared.buffer.lock().expect("output queue mutex poisoned");
        if buffer.len() >= self.shared.capacity {
            buffer.pop_front();
            tracing::warn!("output queue full, dropping oldest entry");
        }
        buffer.push_back(value);
        drop(buffer);
        self.shared.ready.notify_one();
    }

    /// Signal that no further values will be produced (the handler has
    /// been torn down).
    pub fn close(&self) {
        self.shared.closed.store(true, std::sync::atomic::Ordering::Release);
        self.shared.ready.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(std::sync::atomic::Ordering::Acquire)
    }
}

impl OutputReceiver {
    /// Wait for the next output, or [`Error::Timeout`] after 10 seconds of
    /// silence (`output_stream`'s polling loop in
    /// `webrtc_connection_mixin.py` uses the same deadline to notice a
    /// handler that has stopped producing), or `Ok(None)` once the sender
    /// has closed and the buffer has drained.
    pub async fn recv(&mut self) -> Result<Option<AdditionalOutputs>> {
        timeout(FETCH_TIMEOUT, self.recv_inner())
            .await
            .map_err(|_| Error::Timeout("output_stream".into()))
    }

    async fn recv_inner(&mut self) -> Option<AdditionalOutputs> {
        loop {
            {
                let mut buffer = self.shared.buffer.lock().expect("output queue mutex poisoned");
                if let Some(value) = buffer.pop_front() {
                    return Some(value);
                }
                if self.shared.closed.load(std::sync::atomic::Ordering::Acquire) {
                    return None;
                }
            }
            self.shared.ready.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_then_recv_round_trips() {
        let (tx, mut rx) = channel(4);
        tx.push(AdditionalOutputs::new(vec![serde_json::json!("a")]));
        let value = rx.recv().await.unwrap().unwrap();
        assert_eq!(value.0, vec![serde_json::json!("a")]);
    }

    #[tokio::test]
    async fn closed_sender_drains_then_yields_none() {
        let (tx, mut rx) = channel(4);
        tx.push(AdditionalOutputs::new(vec![serde_json::json!(1)]));
        tx.close();
        assert!(rx.recv().await.unwrap().is_some());
        assert!(rx.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overflow_drops_oldest_entry() {
        let (tx, mut rx) = channel(2);
        tx.push(AdditionalOutputs::new(vec![serde_json::json!(1)]));
        tx.push(AdditionalOutputs::new(vec![serde_json::json!(2)]));
        tx.push(AdditionalOutputs::new(vec![serde_json::json!(3)]));

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.0, vec![serde_json::json!(2)]);
        let second = rx.recv().await.unwrap().unwrap();
        assert_eq!(second.0, vec![serde_json::json!(3)]);
    }

    #[tokio::test]
    async fn recv_times_out_when_starved() {
        let (_tx, mut rx) = channel(4);
        let result = timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(result.is_err(), "recv should still be pending, not our 10s timeout");
    }
}
