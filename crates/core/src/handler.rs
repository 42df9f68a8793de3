//! The stream handler contract (§4.4). Python's `fastrtc.tracks` module
//! splits this into `StreamHandlerBase`, a sync `StreamHandler` and an
//! `AsyncStreamHandler`, each with audio/video/audio-video variants. Here
//! there is one async trait; a synchronous implementation wraps its blocking
//! work in `spawn_blocking` via [`BlockingHandler`] instead of duplicating
//! the trait (REDESIGN FLAG in the spec).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::Result;
use crate::types::{AudioFrame, ControlSink, EmitType};

/// Readiness gates a handler exposes to its transport, mirroring
/// `StreamHandlerBase`'s `_channel` and `_args` asyncio events.
///
/// Both gates are set-once, manual-reset flags rather than a queue: once
/// `mark_channel_set`/`set_args` fires, every past and future waiter
/// observes it, so a waiter that arrives after the fact never blocks. A
/// `Notify`-based implementation doesn't have this property (a
/// `notify_waiters` call with no one currently waiting is lost), which is
/// exactly the race this type exists to avoid.
pub struct HandlerReadiness {
    channel_set: watch::Sender<bool>,
    args_set: watch::Sender<bool>,
    args: Mutex<Option<serde_json::Value>>,
}

impl Default for HandlerReadiness {
    fn default() -> Self {
        Self {
            channel_set: watch::channel(false).0,
            args_set: watch::channel(false).0,
            args: Mutex::new(None),
        }
    }
}

impl HandlerReadiness {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mark_channel_set(&self) {
        let _ = self.channel_set.send(true);
    }

    /// Stores `value` as the latest out-of-band arguments and marks the
    /// gate set, waking every past and future `wait_args` caller.
    pub fn set_args(&self, value: serde_json::Value) {
        *self.args.lock().expect("args mutex poisoned") = Some(value);
        let _ = self.args_set.send(true);
    }

    /// The most recently stored arguments, if any have been set yet.
    pub fn args(&self) -> Option<serde_json::Value> {
        self.args.lock().expect("args mutex poisoned").clone()
    }

    pub async fn wait_channel(&self) {
        let mut rx = self.channel_set.subscribe();
        if *rx.borrow() {
            return;
        }
        let _ = rx.wait_for(|ready| *ready).await;
    }

    pub async fn wait_args(&self) {
        let mut rx = self.args_set.subscribe();
        if *rx.borrow() {
            return;
        }
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

/// The per-connection conversational contract: consume inbound audio,
/// decide when to produce a reply, and copy itself fresh for every new
/// peer connection (`StreamHandlerBase.copy` in the original).
#[async_trait]
pub trait StreamHandler: Send + Sync {
    /// Input/output sample rate this handler expects and produces.
    fn expected_layout(&self) -> crate::types::Layout;

    /// Feed one inbound audio frame. Implementations that are mid-reply
    /// should treat this as a no-op (half-duplex turn-taking, §8).
    async fn receive(&mut self, frame: AudioFrame) -> Result<()>;

    /// Produce the next tick of output, or [`EmitType::Empty`] if nothing
    /// is ready yet. Called repeatedly by the transport's output loop;
    /// never called concurrently with itself for the same handler
    /// (REDESIGN FLAG resolving Open Question 2).
    async fn emit(&mut self) -> Result<EmitType>;

    /// Produce a fresh instance for a new peer connection, carrying over
    /// configuration but not per-connection state.
    fn copy(&self) -> Box<dyn StreamHandler>;

    /// Release any held resources (models, buffers) on teardown. Default
    /// no-op; override when a handler owns something that needs draining.
    async fn shutdown(&mut self) {}

    /// Watchdog deadline for a single `emit` call (§5); handlers with
    /// slower models may override this.
    fn emit_timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    /// Gives the handler a sink for server-initiated control messages
    /// (`pause_detected`, `stopword`, ...), mirroring `StreamHandlerBase`
    /// gaining a `channel` once the data channel opens. Default no-op:
    /// most handlers never emit control messages.
    fn set_control_sink(&mut self, _sink: ControlSink) {}

    /// Gives the handler the session's readiness gates, so it can solicit
    /// and await out-of-band arguments (`wait_for_args_sync` in the
    /// original) before building a reply. Default no-op.
    fn set_readiness(&mut self, _readiness: Arc<HandlerReadiness>) {}
}

/// Adapts a handler whose `receive`/`emit` bodies are CPU-bound (VAD, STT)
/// by running them on `spawn_blocking`, instead of carrying a second,
/// duplicated trait for synchronous handlers as the original does.
pub trait BlockingStreamHandler: Send + Sync + 'static {
    fn expected_layout(&self) -> crate::types::Layout;
    fn receive_blocking(&mut self, frame: AudioFrame) -> Result<()>;
    fn emit_blocking(&mut self) -> Result<EmitType>;
    fn copy_blocking(&self) -> Box<dyn BlockingStreamHandler>;

    /// See [`StreamHandler::set_control_sink`]. Default no-op.
    fn set_control_sink(&mut self, _sink: ControlSink) {}

    /// See [`StreamHandler::set_readiness`]. Default no-op.
    fn set_readiness(&mut self, _readiness: Arc<HandlerReadiness>) {}
}

/// Wraps a [`BlockingStreamHandler`] so it satisfies [`StreamHandler`].
///
/// The inner handler moves onto a `spawn_blocking` task for the duration of
/// each call and is handed back afterwards; callers never see the thread
/// hop.
pub struct BlockingHandler<H: BlockingStreamHandler> {
    inner: Option<H>,
}

impl<H: BlockingStreamHandler> BlockingHandler<H> {
    pub fn new(inner: H) -> Self {
        Self { inner: Some(inner) }
    }
}

#[async_trait]
impl<H: BlockingStreamHandler> StreamHandler for BlockingHandler<H> {
    fn expected_layout(&self) -> crate::types::Layout {
        self.inner
            .as_ref()
            .expect("handler taken during in-flight call")
            .expected_layout()
    }

    async fn receive(&mut self, frame: AudioFrame) -> Result<()> {
        let mut inner = self.inner.take().expect("handler taken during in-flight call");
        let (inner, result) = tokio::task::spawn_blocking(move || {
            let result = inner.receive_blocking(frame);
            (inner, result)
        })
        .await
        .expect("blocking handler task panicked");
        self.inner = Some(inner);
        result
    }

    async fn emit(&mut self) -> Result<EmitType> {
        let mut inner = self.inner.take().expect("handler taken during in-flight call");
        let (inner, result) = tokio::task::spawn_blocking(move || {
            let result = inner.emit_blocking();
            (inner, result)
        })
        .await
        .expect("blocking handler task panicked");
        self.inner = Some(inner);
        result
    }

    fn copy(&self) -> Box<dyn StreamHandler> {
        let copied = self
            .inner
            .as_ref()
            .expect("handler taken during in-flight call")
            .copy_blocking();
        Box::new(BlockingHandlerBoxed { inner: Some(copied) })
    }

    fn set_control_sink(&mut self, sink: ControlSink) {
        if let Some(inner) = self.inner.as_mut() {
            inner.set_control_sink(sink);
        }
    }

    fn set_readiness(&mut self, readiness: Arc<HandlerReadiness>) {
        if let Some(inner) = self.inner.as_mut() {
            inner.set_readiness(readiness);
        }
    }
}

/// A [`BlockingHandler`] over a boxed trait object, used so `copy()` can
/// return another `BlockingHandler` without naming the concrete type.
struct BlockingHandlerBoxed {
    inner: Option<Box<dyn BlockingStreamHandler>>,
}

#[async_trait]
impl StreamHandler for BlockingHandlerBoxed {
    fn expected_layout(&self) -> crate::types::Layout {
        self.inner
            .as_ref()
            .expect("handler taken during in-flight call")
            .expected_layout()
    }

    async fn receive(&mut self, frame: AudioFrame) -> Result<()> {
        let mut inner = self.inner.take().expect("handler taken during in-flight call");
        let (inner, result) = tokio::task::spawn_blocking(move || {
            let result = inner.receive_blocking(frame);
            (inner, result)
        })
        .await
        .expect("blocking handler task panicked");
        self.inner = Some(inner);
        result
    }

    async fn emit(&mut self) -> Result<EmitType> {
        let mut inner = self.inner.take().expect("handler taken during in-flight call");
        let (inner, result) = tokio::task::spawn_blocking(move || {
            let result = inner.emit_blocking();
            (inner, result)
        })
        .await
        .expect("blocking handler task panicked");
        self.inner = Some(inner);
        result
    }

    fn copy(&self) -> Box<dyn StreamHandler> {
        let copied = self
            .inner
            .as_ref()
            .expect("handler taken during in-flight call")
            .copy_blocking();
        Box::new(BlockingHandlerBoxed { inner: Some(copied) })
    }

    fn set_control_sink(&mut self, sink: ControlSink) {
        if let Some(inner) = self.inner.as_mut() {
            inner.set_control_sink(sink);
        }
    }

    fn set_readiness(&mut self, readiness: Arc<HandlerReadiness>) {
        if let Some(inner) = self.inner.as_mut() {
            inner.set_readiness(readiness);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Layout;

    struct Echo {
        pending: Option<AudioFrame>,
    }

    #[async_trait]
    impl StreamHandler for Echo {
        fn expected_layout(&self) -> Layout {
            Layout::Mono
        }

        async fn receive(&mut self, frame: AudioFrame) -> Result<()> {
            self.pending = Some(frame);
            Ok(())
        }

        async fn emit(&mut self) -> Result<EmitType> {
            Ok(match self.pending.take() {
                Some(frame) => EmitType::Audio(frame),
                None => EmitType::Empty,
            })
        }

        fn copy(&self) -> Box<dyn StreamHandler> {
            Box::new(Echo { pending: None })
        }
    }

    #[tokio::test]
    async fn echo_handler_round_trips_one_frame() {
        let mut handler = Echo { pending: None };
        assert!(matches!(handler.emit().await.unwrap(), EmitType::Empty));

        let frame = AudioFrame::mono_i16(16000, vec![1, 2, 3]);
        handler.receive(frame).await.unwrap();
        match handler.emit().await.unwrap() {
            EmitType::Audio(f) => assert_eq!(f.samples.to_i16(), vec![1, 2, 3]),
            _ => panic!("expected audio"),
        }
    }

    struct BlockingEcho {
        pending: Option<AudioFrame>,
    }

    impl BlockingStreamHandler for BlockingEcho {
        fn expected_layout(&self) -> Layout {
            Layout::Mono
        }

        fn receive_blocking(&mut self, frame: AudioFrame) -> Result<()> {
            self.pending = Some(frame);
            Ok(())
        }

        fn emit_blocking(&mut self) -> Result<EmitType> {
            Ok(match self.pending.take() {
                Some(frame) => EmitType::Audio(frame),
                None => EmitType::Empty,
            })
        }

        fn copy_blocking(&self) -> Box<dyn BlockingStreamHandler> {
            Box::new(BlockingEcho { pending: None })
        }
    }

    #[tokio::test]
    async fn blocking_handler_adapter_round_trips() {
        let mut handler = BlockingHandler::new(BlockingEcho { pending: None });
        let frame = AudioFrame::mono_i16(16000, vec![4, 5, 6]);
        handler.receive(frame).await.unwrap();
        match handler.emit().await.unwrap() {
            EmitType::Audio(f) => assert_eq!(f.samples.to_i16(), vec![4, 5, 6]),
            _ => panic!("expected audio"),
        }
    }
}
