//! Silero VAD wrapper (§4.5), matching the teacher's `SileroVADNode` in
//! using the `voice_activity_detector` crate rather than a raw `ort`
//! session.

use voice_activity_detector::VoiceActivityDetector;

use fastrtc_core::error::{Error, Result};

/// Fixed chunk size the Silero model expects at 16kHz, matching
/// `core/src/nodes/silero_vad.rs`'s configured chunk size.
pub const VAD_CHUNK_SIZE: usize = 512;
pub const VAD_SAMPLE_RATE: u32 = 16000;

/// Duration, in seconds, one [`VAD_CHUNK_SIZE`]-sample window covers at
/// [`VAD_SAMPLE_RATE`].
const WINDOW_DURATION_SECS: f32 = VAD_CHUNK_SIZE as f32 / VAD_SAMPLE_RATE as f32;

/// Per-window speech probability above which Silero itself calls a window
/// "speech", matching `SileroVadOptions.threshold`'s default in
/// `vad.py`. This is distinct from `AlgoOptions`'s duration thresholds:
/// this one decides whether a single window counts at all; those decide
/// what to do with the resulting seconds-of-speech count.
const SPEECH_PROBABILITY_THRESHOLD: f32 = 0.5;

/// Stateful speech duration estimator over a stream of 16kHz PCM16
/// chunks. The model is recurrent, so probabilities depend on history;
/// build a fresh one per connection (`get_vad_model` in
/// `reply_on_pause.py` returns a shared instance with no persistent
/// sequential state across calls other than model weights, but the Rust
/// binding keeps internal state across `predict` calls).
pub struct SpeechDetector {
    inner: VoiceActivityDetector,
}

impl SpeechDetector {
    pub fn new() -> Result<Self> {
        let inner = VoiceActivityDetector::builder()
            .sample_rate(VAD_SAMPLE_RATE)
            .chunk_size(VAD_CHUNK_SIZE)
            .build()
            .map_err(|e| Error::ModelUnavailable(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Seconds of detected speech within `samples`, matching
    /// `SileroVADModel.vad`'s `duration_after_vad` (the total duration of
    /// the speech timestamps `get_speech_timestamps` returns): split into
    /// [`VAD_CHUNK_SIZE`]-sample windows, classify each window against
    /// [`SPEECH_PROBABILITY_THRESHOLD`], and sum the duration of the
    /// windows that cross it. A trailing partial window is ignored the
    /// same way Python's Silero wrapper skips an under-sized tail chunk.
    pub fn speech_duration_secs(&mut self, samples: &[i16]) -> f32 {
        self.speech_window_count(samples) as f32 * WINDOW_DURATION_SECS
    }

    /// Concatenates only the [`VAD_CHUNK_SIZE`]-sample windows classified
    /// as speech, matching `get_speech_timestamps(..., return_chunks=True)`
    /// extracting speech-only sub-chunks ahead of transcription.
    pub fn speech_chunks(&mut self, samples: &[i16]) -> Vec<i16> {
        let mut out = Vec::new();
        for window in samples.chunks_exact(VAD_CHUNK_SIZE) {
            if self.inner.predict(window.iter().copied()) >= SPEECH_PROBABILITY_THRESHOLD {
                out.extend_from_slice(window);
            }
        }
        out
    }

    fn speech_window_count(&mut self, samples: &[i16]) -> usize {
        samples
            .chunks_exact(VAD_CHUNK_SIZE)
            .filter(|window| self.inner.predict(window.iter().copied()) >= SPEECH_PROBABILITY_THRESHOLD)
            .count()
    }
}
