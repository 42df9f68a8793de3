//! Normalizes a handler's emitted audio into fixed-size output frames with
//! a monotonic pts (§4.3 steps 1-4), grounded in `tracks.py::AudioCallback`
//! resampling every handler frame to `output_sample_rate`/`output_frame_size`
//! before it reaches the track.

use crate::error::Result;
use crate::resample::AudioResampler;
use crate::types::{AudioFrame, Layout, Samples};

/// Resamples handler output to a fixed rate/layout and rechunks it into
/// exactly `frame_size`-sample frames, stamping each with a cumulative
/// sample-count pts so `pts_k - pts_{k-1} == frame_size` always holds.
pub struct OutputFramer {
    resampler: AudioResampler,
    target_rate: u32,
    target_layout: Layout,
    frame_size: usize,
    carry: Vec<f32>,
    next_pts: i64,
}

impl OutputFramer {
    pub fn new(target_rate: u32, target_layout: Layout, frame_size: usize) -> Self {
        Self {
            resampler: AudioResampler::new(target_rate, target_layout),
            target_rate,
            target_layout,
            frame_size,
            carry: Vec::new(),
            next_pts: 0,
        }
    }

    /// Resample `frame` and split the result into zero or more fixed-size
    /// frames. A `rubato`-backed resampler rarely lines up with
    /// `frame_size` exactly, so partial output is carried over to the next
    /// call instead of being dropped or emitted short.
    pub fn process(&mut self, frame: &AudioFrame) -> Result<Vec<AudioFrame>> {
        let channels = self.target_layout.channels();
        let mut out = Vec::new();

        for resampled in self.resampler.process(frame)? {
            self.carry.extend(resampled.samples.to_f32());

            let chunk_len = self.frame_size * channels;
            while self.carry.len() >= chunk_len {
                let chunk: Vec<f32> = self.carry.drain(..chunk_len).collect();
                out.push(AudioFrame {
                    sample_rate: self.target_rate,
                    samples: Samples::F32(chunk),
                    layout: self.target_layout,
                    pts: self.next_pts,
                });
                self.next_pts += self.frame_size as i64;
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pts_advances_by_exactly_one_frame_size_per_chunk() {
        let mut framer = OutputFramer::new(24_000, Layout::Stereo, 480);
        let mut pts_seen = Vec::new();

        for _ in 0..20 {
            let frame = AudioFrame::mono_i16(48_000, vec![100i16; 960]);
            for out in framer.process(&frame).unwrap() {
                pts_seen.push(out.pts);
                assert_eq!(out.layout, Layout::Stereo);
                assert_eq!(out.frame_size(), 480);
            }
        }

        assert!(!pts_seen.is_empty());
        for pair in pts_seen.windows(2) {
            assert_eq!(pair[1] - pair[0], 480, "pts must advance by exactly one frame size");
        }
        assert_eq!(pts_seen[0], 0);
    }
}
