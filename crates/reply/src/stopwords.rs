//! Stopword-gated variant of the pause engine (§4.6), grounded in
//! `reply_on_stopwords.py::ReplyOnStopWords`.

use std::sync::Arc;

use regex::Regex;

use fastrtc_core::error::Result;
use fastrtc_core::handler::{BlockingStreamHandler, HandlerReadiness};
use fastrtc_core::resample::AudioResampler;
use fastrtc_core::types::{AudioFrame, ControlMessage, ControlSink, EmitType, Layout};

use crate::algo::AlgoOptions;
use crate::pause::PauseReply;
use crate::vad::SpeechDetector;

/// Seconds of rolling pre-stopword audio kept for transcription.
const PRE_STOPWORD_WINDOW_SECS: u32 = 2;

/// Runs audio through a speech-to-text model, returning a transcript.
/// Implementations typically wrap `whisper-rs`, dispatched from a
/// blocking context the same way the VAD model is.
pub trait Transcriber: Send {
    fn transcribe(&mut self, samples_16k: &[i16]) -> String;
}

/// Builds the same word-boundary regex `reply_on_stopwords.py` uses:
/// `\b` + escaped words joined by `\s+` + optional trailing punctuation.
fn compile_stop_word(phrase: &str) -> Regex {
    let escaped: Vec<String> = phrase.split_whitespace().map(regex::escape).collect();
    let pattern = format!(r"\b{}[.,!?]*\b", escaped.join(r"\s+"));
    Regex::new(&pattern).expect("stop word phrase compiles to a valid regex")
}

#[derive(Default)]
struct StopwordState {
    /// Rolling window of the most recent [`PRE_STOPWORD_WINDOW_SECS`] of
    /// resampled caller audio, scanned for the stop phrase. Capped rather
    /// than left to grow so transcription cost stays bounded regardless of
    /// how long the caller talks before saying it.
    pre_stopword_window: Vec<i16>,
    started_talking_pre_stop_word: bool,
    stop_word_detected: bool,
    /// Caller audio accumulated after the stop word fires, for the
    /// ordinary pause-after-speech trigger.
    post_stopword_buffer: Vec<i16>,
    started_talking: bool,
}

impl StopwordState {
    fn reset(&mut self) {
        *self = StopwordState::default();
    }
}

/// Like [`crate::pause::ReplyOnPause`], but the caller's utterance only
/// counts as a pause-worthy turn once a configured stop phrase has been
/// transcribed from the rolling buffer.
pub struct ReplyOnStopwords<R: PauseReply, T: Transcriber> {
    options: AlgoOptions,
    resampler: AudioResampler,
    vad: SpeechDetector,
    transcriber: T,
    stop_words: Vec<Regex>,
    state: StopwordState,
    reply: R,
    responding: bool,
    phone_mode: bool,
    control: Option<ControlSink>,
    readiness: Option<Arc<HandlerReadiness>>,
}

impl<R: PauseReply, T: Transcriber> ReplyOnStopwords<R, T> {
    pub fn new(reply: R, transcriber: T, stop_words: &[&str], options: AlgoOptions) -> Result<Self> {
        Ok(Self {
            options,
            resampler: AudioResampler::new(crate::vad::VAD_SAMPLE_RATE, Layout::Mono),
            vad: SpeechDetector::new()?,
            transcriber,
            stop_words: stop_words.iter().map(|w| compile_stop_word(w)).collect(),
            state: StopwordState::default(),
            reply,
            responding: false,
            phone_mode: false,
            control: None,
            readiness: None,
        })
    }

    pub fn with_phone_mode(mut self, phone_mode: bool) -> Self {
        self.phone_mode = phone_mode;
        self
    }

    fn send_control(&self, message: ControlMessage) {
        if let Some(control) = &self.control {
            let _ = control.send(message);
        }
    }

    fn acquire_args(&self) -> Option<serde_json::Value> {
        if !self.reply.needs_args() || self.phone_mode {
            return None;
        }
        let readiness = self.readiness.clone()?;
        self.send_control(ControlMessage::send_input());
        tokio::runtime::Handle::current().block_on(readiness.wait_args());
        readiness.args()
    }

    /// Transcribes only the speech-classified portions of the rolling
    /// pre-stopword window, matching `get_speech_timestamps(...,
    /// return_chunks=True)` feeding speech-only sub-chunks to the STT
    /// model rather than the whole window including silence.
    fn detect_stop_word(&mut self) -> bool {
        let speech_only = self.vad.speech_chunks(&self.state.pre_stopword_window);
        if speech_only.is_empty() {
            return false;
        }
        let transcript = self.transcriber.transcribe(&speech_only);
        self.stop_words.iter().any(|re| re.is_match(&transcript))
    }

    /// Mirrors `ReplyOnStopWords.determine_pause`: before a stop word has
    /// fired, only watch for the phrase; afterwards, fall back to the
    /// parent class's silence-after-speech logic on the post-stop-word
    /// buffer.
    fn determine_pause(&mut self) -> bool {
        let chunk_size = self.options.chunk_samples(crate::vad::VAD_SAMPLE_RATE);

        if !self.state.stop_word_detected {
            if self.state.pre_stopword_window.len() < chunk_size {
                return false;
            }
            let window = &self.state.pre_stopword_window[self.state.pre_stopword_window.len() - chunk_size..];
            let speech_secs = self.vad.speech_duration_secs(window);
            if speech_secs >= self.options.started_talking_threshold {
                self.state.started_talking_pre_stop_word = true;
            }
            if self.state.started_talking_pre_stop_word && self.detect_stop_word() {
                self.state.stop_word_detected = true;
                self.send_control(ControlMessage::stopword());
                tracing::debug!("stop_word_detected");
            }
            return false;
        }

        if self.state.post_stopword_buffer.len() < chunk_size {
            return false;
        }
        let window = &self.state.post_stopword_buffer[self.state.post_stopword_buffer.len() - chunk_size..];
        let speech_secs = self.vad.speech_duration_secs(window);
        if speech_secs >= self.options.started_talking_threshold {
            self.state.started_talking = true;
        }
        self.state.started_talking && speech_secs < self.options.speech_threshold
    }
}

impl<R: PauseReply + Clone + 'static, T: Transcriber + Clone + 'static> BlockingStreamHandler
    for ReplyOnStopwords<R, T>
{
    fn expected_layout(&self) -> Layout {
        Layout::Mono
    }

    fn receive_blocking(&mut self, frame: AudioFrame) -> Result<()> {
        if self.responding {
            return Ok(());
        }

        for resampled in self.resampler.process(&frame)? {
            let samples = resampled.samples.to_i16();
            if self.state.stop_word_detected {
                self.state.post_stopword_buffer.extend_from_slice(&samples);
            } else {
                self.state.pre_stopword_window.extend_from_slice(&samples);
                let max_len = (PRE_STOPWORD_WINDOW_SECS * crate::vad::VAD_SAMPLE_RATE) as usize;
                if self.state.pre_stopword_window.len() > max_len {
                    let excess = self.state.pre_stopword_window.len() - max_len;
                    self.state.pre_stopword_window.drain(..excess);
                }
            }
        }

        if self.determine_pause() {
            self.send_control(ControlMessage::log("pause_detected"));
            let utterance = AudioFrame::mono_i16(
                crate::vad::VAD_SAMPLE_RATE,
                std::mem::take(&mut self.state.post_stopword_buffer),
            );
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
        Box::new(ReplyOnStopwords {
            options: self.options,
            resampler: AudioResampler::new(crate::vad::VAD_SAMPLE_RATE, Layout::Mono),
            vad: SpeechDetector::new().expect("VAD model available at startup"),
            transcriber: self.transcriber.clone(),
            stop_words: self.stop_words.clone(),
            state: StopwordState::default(),
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

    #[test]
    fn stop_word_regex_matches_word_boundary_with_punctuation() {
        let re = compile_stop_word("all done");
        assert!(re.is_match("okay i think we are all done."));
        assert!(!re.is_match("alldone"));
        assert!(re.is_match("all   done"));
    }

    #[test]
    fn stop_word_regex_does_not_match_substring_of_longer_word() {
        let re = compile_stop_word("stop");
        assert!(!re.is_match("nonstop"));
        assert!(re.is_match("please stop!"));
    }

    #[derive(Clone)]
    struct FixedTranscript(String);

    impl Transcriber for FixedTranscript {
        fn transcribe(&mut self, _samples_16k: &[i16]) -> String {
            self.0.clone()
        }
    }

    #[derive(Clone)]
    struct NoopReply;

    impl PauseReply for NoopReply {
        fn start(&mut self, _utterance: AudioFrame, _args: Option<serde_json::Value>) {}
        fn next(&mut self) -> Option<EmitType> {
            None
        }
    }

    #[test]
    fn no_reply_before_stop_word_is_transcribed() {
        let mut handler = match ReplyOnStopwords::new(
            NoopReply,
            FixedTranscript("still talking".into()),
            &["goodbye"],
            AlgoOptions::default(),
        ) {
            Ok(h) => h,
            Err(_) => return,
        };
        for _ in 0..5 {
            handler
                .receive_blocking(AudioFrame::mono_i16(16000, vec![0i16; 9600]))
                .unwrap();
        }
        assert!(!handler.state.stop_word_detected);
    }

    #[test]
    fn pre_stopword_window_is_capped_at_two_seconds() {
        let mut handler = match ReplyOnStopwords::new(
            NoopReply,
            FixedTranscript("still talking".into()),
            &["goodbye"],
            AlgoOptions::default(),
        ) {
            Ok(h) => h,
            Err(_) => return,
        };
        // Feed 5 seconds of audio at 16kHz; the rolling window must never
        // exceed 2 seconds' worth of samples.
        for _ in 0..50 {
            handler
                .receive_blocking(AudioFrame::mono_i16(16000, vec![1i16; 1600]))
                .unwrap();
        }
        assert!(handler.state.pre_stopword_window.len() <= 2 * 16000);
    }
}
