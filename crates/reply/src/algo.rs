//! Pause-detection tunables, matching `AlgoOptions` in `reply_on_pause.py`.

/// Thresholds governing when a span of silence counts as a conversational
/// pause. Defaults match the Python dataclass exactly.
#[derive(Debug, Clone, Copy)]
pub struct AlgoOptions {
    /// Size, in seconds, of the sliding window examined on each
    /// `determine_pause` call.
    pub audio_chunk_duration: f64,
    /// Minimum seconds of detected speech within a window before the
    /// caller is considered to have started talking.
    pub started_talking_threshold: f32,
    /// Seconds of detected speech below which, once talking has started,
    /// the window counts as silence.
    pub speech_threshold: f32,
}

impl Default for AlgoOptions {
    fn default() -> Self {
        Self {
            audio_chunk_duration: 0.6,
            started_talking_threshold: 0.2,
            speech_threshold: 0.1,
        }
    }
}

impl AlgoOptions {
    pub fn chunk_samples(&self, sample_rate: u32) -> usize {
        (self.audio_chunk_duration * sample_rate as f64).round() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_thresholds() {
        let options = AlgoOptions::default();
        assert_eq!(options.audio_chunk_duration, 0.6);
        assert_eq!(options.started_talking_threshold, 0.2);
        assert_eq!(options.speech_threshold, 0.1);
    }

    #[test]
    fn chunk_samples_scales_with_rate() {
        let options = AlgoOptions::default();
        assert_eq!(options.chunk_samples(16000), 9600);
    }
}
