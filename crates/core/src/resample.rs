//! Lazily-instantiated audio resampler (§4.3: "Resampler is lazily
//! instantiated on first frame and preserves frame-size").

use rubato::{FftFixedIn, Resampler as _};

use crate::error::{Error, Result};
use crate::types::{AudioFrame, Layout, Samples};

/// Resamples mono or stereo audio to a target rate/layout/format, building
/// its `rubato` resampler on first use from the observed input frame size
/// (mirrors `av.AudioResampler` being constructed from `frame.samples` in
/// `StreamHandlerBase.resample`).
pub struct AudioResampler {
    target_rate: u32,
    target_layout: Layout,
    inner: Option<FftFixedIn<f32>>,
    input_rate: u32,
    input_channels: usize,
}

impl AudioResampler {
    pub fn new(target_rate: u32, target_layout: Layout) -> Self {
        Self {
            target_rate,
            target_layout,
            inner: None,
            input_rate: 0,
            input_channels: 0,
        }
    }

    /// Resample one frame, returning zero or more output frames (a `rubato`
    /// `FftFixedIn` resampler consumes fixed-size chunks, so partial input
    /// is buffered internally and may yield no output on the first call).
    pub fn process(&mut self, frame: &AudioFrame) -> Result<Vec<AudioFrame>> {
        let channels = frame.layout.channels();
        let frame_size = frame.frame_size();
        if frame_size == 0 {
            return Ok(Vec::new());
        }

        if self.inner.is_none() || self.input_rate != frame.sample_rate || self.input_channels != channels {
            let resampler = FftFixedIn::<f32>::new(
                frame.sample_rate as usize,
                self.target_rate as usize,
                frame_size,
                1,
                channels,
            )
            .map_err(|e| Error::Resample(e.to_string()))?;
            self.inner = Some(resampler);
            self.input_rate = frame.sample_rate;
            self.input_channels = channels;
        }

        let resampler = self.inner.as_mut().expect("just initialized");
        let interleaved = frame.samples.to_f32();
        let mut per_channel: Vec<Vec<f32>> = vec![Vec::with_capacity(frame_size); channels];
        for (i, sample) in interleaved.iter().enumerate() {
            per_channel[i % channels].push(*sample);
        }

        let out = resampler
            .process(&per_channel, None)
            .map_err(|e| Error::Resample(e.to_string()))?;

        if out.is_empty() || out[0].is_empty() {
            return Ok(Vec::new());
        }

        let out_channels = self.target_layout.channels();
        let out_len = out[0].len();
        let mut interleaved_out = Vec::with_capacity(out_len * out_channels);
        for i in 0..out_len {
            for c in 0..out_channels {
                let src_channel = c.min(out.len().saturating_sub(1));
                interleaved_out.push(out[src_channel][i]);
            }
        }

        Ok(vec![AudioFrame {
            sample_rate: self.target_rate,
            samples: Samples::F32(interleaved_out),
            layout: self.target_layout,
            pts: 0,
        }])
    }
}
