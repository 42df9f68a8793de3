//! Pause-triggered reply state machine (§4.5), grounded in
//! `reply_on_pause.py::ReplyOnPause`.

use std::sync::Arc;

use fastrtc_core::error::Result;
use fastrtc_core::handler::{BlockingStreamHandler, HandlerReadiness};
use fastrtc_core::resample::AudioResampler;
use fastrtc_core::types::{AudioFrame, ControlMessage, ControlSink, EmitType, Layout};

use crate::algo::AlgoOptions;
use crate::vad::SpeechDetector;

/// Produces the reply turn once a pause is detected. `start` receives the
/// full buffered caller utterance (resampled to 16kHz mono) plus any
/// out-of-band arguments solicited before the turn began; `next` is
/// polled until it returns `None`, mirroring the Python callback's
/// generator protocol (`StopIteration` ends the turn).
pub trait PauseReply: Send {
    /// Whether this reply needs out-of-band arguments before it can start
    /// (`_needs_additional_inputs` in the original, there derived from
    /// the callback's function signature). Default `false`: most replies
    /// need nothing beyond the utterance.
    fn needs_args(&self) -> bool {
        false
    }

    fn start(&mut self, utterance: AudioFrame, args: Option<serde_json::Value>);
    fn next(&mut self) -> Option<EmitType>;
}

/// Accumulated per-connection state, matching the fields Python tracks on
/// its `AppState` dataclass that are relevant to pause detection.
#[derive(Default)]
struct PauseState {
    buffer: Vec<i16>,
    started_talking: bool,
}

impl PauseState {
    fn reset(&mut self) {
        self.buffer.clear();
        self.started_talking = false;
    }
}

/// Half-duplex conversational handler: buffers caller audio, watches for a
/// pause after speech, then drains a [`PauseReply`] until it is exhausted
/// before accepting new input again.
pub struct ReplyOnPause<R: PauseReply> {
    options: AlgoOptions,
    resampler: AudioResampler,
    vad: SpeechDetector,
    state: PauseState,
    reply: R,
    responding: bool,
    /// `true` for handlers driven over the telephony bridge, where there
    /// is no interactive data channel to solicit arguments over
    /// (`phone_mode` in the original). Argument acquisition is skipped
    /// entirely rather than blocking forever waiting for a channel that
    /// will never open.
    phone_mode: bool,
    control: Option<ControlSink>,
    readiness: Option<Arc<HandlerReadiness>>,
}

impl<R: PauseReply> ReplyOnPause<R> {
    pub fn new(reply: R, options: AlgoOptions) -> Result<Self> {
        Ok(Self {
            options,
            resampler: AudioResampler::new(crate::vad::VAD_SAMPLE_RATE, Layout::Mono),
            vad: SpeechDetector::new()?,
            state: PauseState::default(),
            reply,
            responding: false,
            phone_mode: false,
            control: None,
            readiness: None,
        })
    }

    /// Marks this handler as driven over a telephony call rather than a
    /// browser data channel, skipping argument solicitation entirely.
    pub fn with_phone_mode(mut self, phone_mode: bool) -> Self {
        self.phone_mode = phone_mode;
        self
    }

    fn send_control(&self, message: ControlMessage) {
        if let Some(control) = &self.control {
            let _ = control.send(message);
        }
    }

    /// Append resampled audio to the rolling buffer and check whether the
    /// trailing window constitutes a pause after speech, matching
    /// `ReplyOnPause.determine_pause`.
    fn process_audio(&mut self, frame: AudioFrame) -> Result<bool> {
        for resampled in self.resampler.process(&frame)? {
            self.state.buffer.extend(resampled.samples.to_i16());
        }
        self.determine_pause()
    }

    fn determine_pause(&mut self) -> Result<bool> {
        let chunk_size = self.options.chunk_samples(crate::vad::VAD_SAMPLE_RATE);
        if self.state.buffer.len() < chunk_size {
            return Ok(false);
        }
        let window = &self.state.buffer[self.state.buffer.len() - chunk_size..];
        let speech_secs = self.vad.speech_duration_secs(window);

        if speech_secs >= self.options.started_talking_threshold {
            self.state.started_talking = true;
        }

        let pause_detected = self.state.started_talking && speech_secs < self.options.speech_threshold;
        Ok(pause_detected)
    }

    /// Solicits out-of-band arguments before a reply turn starts, mirroring
    /// `emit()`'s `wait_for_args_sync`/phone-mode branch in the original:
    /// browser sessions are asked via `send_input` and block on the
    /// readiness gate; phone sessions never ask, since there is nothing on
    /// the other end of a call to answer a `send_input` message.
    fn acquire_args(&self) -> Option<serde_json::Value> {
        if !self.reply.needs_args() || self.phone_mode {
            return None;
        }
        let readiness = self.readiness.clone()?;
        self.send_control(ControlMessage::send_input());
        tokio::runtime::Handle::current().block_on(readiness.wait_args());
        readiness.args()
    }
}

impl<R: PauseReply + Clone + 'static> BlockingStreamHandler for ReplyOnPause<R> {
    fn expected_layout(&self) -> Layout {
        Layout::Mono
    }

    fn receive_blocking(&mut self, frame: AudioFrame) -> Result<()> {
        // No-op while a reply is in flight: half-duplex turn-taking (§8).
        if self.responding {
            return Ok(());
        }

        if self.process_audio(frame)? {
            self.send_control(ControlMessage::log("pause_detected"));
            let utterance = AudioFrame::mono_i16(crate::vad::VAD_SAMPLE_RATE, std::mem::take(&mut self.state.buffer));
            self.state.reset();
            let args = self.acquire_args();
            self.reply.start(utterance, args);
            self.responding = true;
            self.send_control(ControlMessage::log("response_starting"));
        }
        Ok(())
    }

    fn emit_blocking(&mut self) -> Result<EmitType> {
        if !self.responding {
            return Ok(EmitType::Empty);
        }
        match self.reply.next() {
            Some(emit) => Ok(emit),
            None => {
                self.responding = false;
                Ok(EmitType::Empty)
            }
        }
    }

    fn copy_blocking(&self) -> Box<dyn BlockingStreamHandler> {
        Box::new(ReplyOnPause {
            options: self.options,
            resampler: AudioResampler::new(crate::vad::VAD_SAMPLE_RATE, Layout::Mono),
            vad: SpeechDetector::new().expect("VAD model available at startup"),
            state: PauseState::default(),
            reply: self.reply.clone(),
            responding: false,
            phone_mode: self.phone_mode,
            control: None,
            readiness: None,
        })
    }

    fn set_control_sink(&mut self, sink: ControlSink) {
        self.control = Some(sink);
    }

    fn set_readiness(&mut self, readiness: Arc<HandlerReadiness>) {
        self.readiness = Some(readiness);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct EchoReply {
        queued: Option<AudioFrame>,
    }

    impl PauseReply for EchoReply {
        fn start(&mut self, utterance: AudioFrame, _args: Option<serde_json::Value>) {
            self.queued = Some(utterance);
        }

        fn next(&mut self) -> Option<EmitType> {
            self.queued.take().map(EmitType::Audio)
        }
    }

    #[test]
    fn silence_never_triggers_a_reply() {
        let reply = EchoReply { queued: None };
        let mut handler = match ReplyOnPause::new(reply, AlgoOptions::default()) {
            Ok(h) => h,
            Err(_) => return, // VAD model unavailable in this environment
        };

        for _ in 0..5 {
            let frame = AudioFrame::mono_i16(16000, vec![0i16; 9600]);
            handler.receive_blocking(frame).unwrap();
        }
        assert!(matches!(handler.emit_blocking().unwrap(), EmitType::Empty));
    }

    #[test]
    fn receive_is_a_no_op_while_responding() {
        let reply = EchoReply {
            queued: Some(AudioFrame::mono_i16(16000, vec![9, 9, 9])),
        };
        let mut handler = match ReplyOnPause::new(reply, AlgoOptions::default()) {
            Ok(h) => h,
            Err(_) => return,
        };
        handler.responding = true;
        let before = handler.state.buffer.len();
        handler
            .receive_blocking(AudioFrame::mono_i16(16000, vec![1; 1000]))
            .unwrap();
        assert_eq!(handler.state.buffer.len(), before);
    }

    #[derive(Clone)]
    struct ArgsNeedingReply {
        seen_args: Option<serde_json::Value>,
    }

    impl PauseReply for ArgsNeedingReply {
        fn needs_args(&self) -> bool {
            true
        }

        fn start(&mut self, _utterance: AudioFrame, args: Option<serde_json::Value>) {
            self.seen_args = args;
        }

        fn next(&mut self) -> Option<EmitType> {
            None
        }
    }

    #[test]
    fn phone_mode_skips_argument_solicitation() {
        let reply = ArgsNeedingReply { seen_args: None };
        let mut handler = match ReplyOnPause::new(reply, AlgoOptions::default()) {
            Ok(h) => h,
            Err(_) => return,
        }
        .with_phone_mode(true);

        // acquire_args must return None synchronously, with no readiness
        // set and no tokio runtime required to await one.
        assert_eq!(handler.acquire_args(), None);
    }
}
