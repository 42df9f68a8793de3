//! Data model shared by the media pipelines and the reply engines (§3).

use serde::{Deserialize, Serialize};

/// Channel layout of an [`AudioFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Layout {
    Mono,
    Stereo,
}

impl Layout {
    /// Number of interleaved channels implied by this layout.
    pub fn channels(self) -> usize {
        match self {
            Layout::Mono => 1,
            Layout::Stereo => 2,
        }
    }
}

/// Raw sample storage for an [`AudioFrame`].
///
/// Mirrors the Python side's `signed-16 or float32` union (§3): a frame is
/// either PCM16 or float32, never both, and callers branch on the variant
/// instead of the pipeline silently upcasting.
#[derive(Debug, Clone)]
pub enum Samples {
    I16(Vec<i16>),
    F32(Vec<f32>),
}

impl Samples {
    pub fn len(&self) -> usize {
        match self {
            Samples::I16(v) => v.len(),
            Samples::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert to float32 in `[-1.0, 1.0]`, matching `audio_to_float32` in
    /// `fastrtc/utils.py`.
    pub fn to_f32(&self) -> Vec<f32> {
        match self {
            Samples::I16(v) => v.iter().map(|s| *s as f32 / 32768.0).collect(),
            Samples::F32(v) => v.clone(),
        }
    }

    /// Convert to signed 16-bit PCM, saturating rather than wrapping.
    pub fn to_i16(&self) -> Vec<i16> {
        match self {
            Samples::I16(v) => v.clone(),
            Samples::F32(v) => v
                .iter()
                .map(|s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                .collect(),
        }
    }
}

/// One chunk of audio flowing through a pipeline: `(sample_rate, samples)`
/// shaped `[channels, n]` per §3, stored as a flat buffer with an explicit
/// channel count rather than a 2D array.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub samples: Samples,
    pub layout: Layout,
    /// Cumulative sample count at `sample_rate` since the start of the
    /// outbound stream this frame belongs to (time base `1 / sample_rate`).
    /// Zero for frames that don't participate in pts tracking, such as raw
    /// inbound audio.
    pub pts: i64,
}

impl AudioFrame {
    pub fn mono_i16(sample_rate: u32, samples: Vec<i16>) -> Self {
        Self {
            sample_rate,
            samples: Samples::I16(samples),
            layout: Layout::Mono,
            pts: 0,
        }
    }

    pub fn mono_f32(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            samples: Samples::F32(samples),
            layout: Layout::Mono,
            pts: 0,
        }
    }

    /// Number of samples per channel.
    pub fn frame_size(&self) -> usize {
        let channels = self.layout.channels().max(1);
        self.samples.len() / channels
    }

    pub fn duration_secs(&self) -> f64 {
        self.frame_size() as f64 / self.sample_rate as f64
    }
}

/// A decoded video frame in BGR24, with a presentation timestamp and time
/// base rational (§3). `pts` is monotonically non-decreasing per track.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// BGR24 pixel data, row-major, `width * height * 3` bytes.
    pub data: Vec<u8>,
    pub pts: i64,
    /// `(numerator, denominator)`, e.g. `(1, 90000)`.
    pub time_base: (i32, i32),
}

/// An opaque tuple of user values produced alongside media, delivered
/// out-of-band through the [`crate::output_queue::OutputQueue`] (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdditionalOutputs(pub Vec<serde_json::Value>);

impl AdditionalOutputs {
    pub fn new(values: Vec<serde_json::Value>) -> Self {
        Self(values)
    }
}

/// The value a handler's `emit` may produce in one tick (§4.3's EmitType).
#[derive(Debug, Clone)]
pub enum EmitType {
    /// Nothing to emit this tick.
    Empty,
    /// Media only.
    Audio(AudioFrame),
    /// Media plus a side-channel payload.
    AudioWithOutputs(AudioFrame, AdditionalOutputs),
    /// Side-channel payload only, no media.
    Outputs(AdditionalOutputs),
}

impl EmitType {
    /// Split into `(media, outputs)`, mirroring `split_output` in
    /// `fastrtc/utils.py`.
    pub fn split(self) -> (Option<AudioFrame>, Option<AdditionalOutputs>) {
        match self {
            EmitType::Empty => (None, None),
            EmitType::Audio(f) => (Some(f), None),
            EmitType::AudioWithOutputs(f, o) => (Some(f), Some(o)),
            EmitType::Outputs(o) => (None, Some(o)),
        }
    }
}

/// Tagged control-channel message (§3, §6). The Open Questions in §9
/// resolve the `Warning`/`Error` payload shape to the uniform `{type,
/// data}` form used here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlMessage {
    pub r#type: ControlMessageType,
    pub data: ControlData,
}

/// Delivers handler-initiated, server-to-client control messages once a
/// session's data channel is open, mirroring `StreamHandlerBase.channel`/
/// `send_message_sync` reaching across to the asyncio event loop. A plain
/// unbounded `mpsc` sender is enough here: sends never block, and anything
/// queued before the channel opens is simply delivered once a consumer
/// starts draining it.
pub type ControlSink = tokio::sync::mpsc::UnboundedSender<ControlMessage>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMessageType {
    SendInput,
    FetchOutput,
    Stopword,
    Error,
    Warning,
    Log,
}

/// Untagged so that `data` can be a bare string (`log`/`stopword`/
/// `error`/`warning`) or a list of positional values (`send_input`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlData {
    Text(String),
    List(Vec<serde_json::Value>),
}

impl ControlMessage {
    pub fn log(message: impl Into<String>) -> Self {
        Self {
            r#type: ControlMessageType::Log,
            data: ControlData::Text(message.into()),
        }
    }

    pub fn send_input() -> Self {
        Self {
            r#type: ControlMessageType::SendInput,
            data: ControlData::List(Vec::new()),
        }
    }

    pub fn fetch_output() -> Self {
        Self {
            r#type: ControlMessageType::FetchOutput,
            data: ControlData::List(Vec::new()),
        }
    }

    pub fn stopword() -> Self {
        Self {
            r#type: ControlMessageType::Stopword,
            data: ControlData::Text(String::new()),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            r#type: ControlMessageType::Warning,
            data: ControlData::Text(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            r#type: ControlMessageType::Error,
            data: ControlData::Text(message.into()),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("ControlMessage always serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_channel_counts() {
        assert_eq!(Layout::Mono.channels(), 1);
        assert_eq!(Layout::Stereo.channels(), 2);
    }

    #[test]
    fn samples_round_trip_i16_f32() {
        let s = Samples::I16(vec![0, 16384, -16384, 32767]);
        let f = s.to_f32();
        assert!((f[1] - 0.5).abs() < 0.01);
        assert!((f[2] + 0.5).abs() < 0.01);
    }

    #[test]
    fn emit_type_split_matches_split_output() {
        let frame = AudioFrame::mono_i16(16000, vec![1, 2, 3]);
        let (media, outputs) = EmitType::Audio(frame).split();
        assert!(media.is_some());
        assert!(outputs.is_none());

        let outputs_only = EmitType::Outputs(AdditionalOutputs::new(vec![serde_json::json!(1)]));
        let (media, outputs) = outputs_only.split();
        assert!(media.is_none());
        assert!(outputs.is_some());
    }

    #[test]
    fn control_message_json_shape() {
        let msg = ControlMessage::log("pause_detected");
        let json = msg.to_json();
        assert!(json.contains("\"type\":\"log\""));
        assert!(json.contains("\"data\":\"pause_detected\""));
    }
}
