//! Streaming mono resampler.
//!
//! Wraps Rubato's streaming sinc resampler for a single channel. Filter
//! memory is carried between calls, so feeding consecutive chunks converts
//! them as one continuous signal with no boundary artifacts. The final,
//! short chunk of a stream goes through the same call via `partial_len`.

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    calculate_cutoff, Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

use crate::error::{Error, Result};

/// Stateful mono sample-rate converter.
///
/// Consumes input in fixed chunks of `chunk_frames` samples (fewer on the
/// final call) and produces band-limited output at the target rate. A
/// construction or processing failure is fatal to the pipeline; neither is
/// retried.
pub struct StreamResampler {
    inner: Box<dyn Resampler<f32>>,
    chunk_frames: usize,
    output_capacity: usize,
    indexing: Indexing,
}

impl StreamResampler {
    /// Create a converter from `input_rate` to `output_rate` Hz.
    pub fn new(input_rate: u32, output_rate: u32, chunk_frames: usize) -> Result<Self> {
        if input_rate == 0 || output_rate == 0 || chunk_frames == 0 {
            return Err(Error::Config(format!(
                "invalid resampler setup: {input_rate} Hz -> {output_rate} Hz, chunk {chunk_frames}"
            )));
        }

        let f_ratio = output_rate as f64 / input_rate as f64;

        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };

        let inner: Box<dyn Resampler<f32>> =
            match Async::<f32>::new_sinc(f_ratio, 1.1, &params, chunk_frames, 1, FixedAsync::Input)
            {
                Ok(r) => Box::new(r),
                Err(e) => return Err(Error::Resample(e.to_string())),
            };

        // Worst case per call: one full chunk scaled by the ratio, plus
        // rounding slop.
        let output_capacity = (chunk_frames as f64 * f_ratio).ceil() as usize + 16;

        Ok(Self {
            inner,
            chunk_frames,
            output_capacity,
            indexing: Indexing {
                input_offset: 0,
                output_offset: 0,
                active_channels_mask: None,
                partial_len: None,
            },
        })
    }

    /// Input chunk size the converter was built for, in samples.
    pub fn chunk_frames(&self) -> usize {
        self.chunk_frames
    }

    /// Upper bound on samples a single `process` call can produce.
    pub fn output_capacity_hint(&self) -> usize {
        self.output_capacity
    }

    /// Resample `input` into `output`, returning the produced sample count.
    ///
    /// `input` must not exceed [`chunk_frames`](Self::chunk_frames); a
    /// shorter slice is processed as a partial (tail) chunk. `output` must
    /// have room for [`output_capacity_hint`](Self::output_capacity_hint)
    /// samples.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<usize> {
        let frames = input.len();
        if frames > self.chunk_frames {
            return Err(Error::Config(format!(
                "input chunk of {frames} samples exceeds converter chunk size {}",
                self.chunk_frames
            )));
        }

        let input_adapter = InterleavedSlice::new(input, 1, frames)
            .map_err(|e| Error::Resample(e.to_string()))?;

        let out_len = output.len();
        let mut output_adapter = InterleavedSlice::new_mut(output, 1, out_len)
            .map_err(|e| Error::Resample(e.to_string()))?;

        self.indexing.input_offset = 0;
        self.indexing.output_offset = 0;
        self.indexing.partial_len = (frames < self.chunk_frames).then_some(frames);

        let (_consumed, produced) = self
            .inner
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&self.indexing))
            .map_err(|e| Error::Resample(e.to_string()))?;

        Ok(produced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_setup() {
        assert!(StreamResampler::new(0, 228_000, 1024).is_err());
        assert!(StreamResampler::new(192_000, 0, 1024).is_err());
        assert!(StreamResampler::new(192_000, 228_000, 0).is_err());
    }

    #[test]
    fn produces_output_for_a_full_chunk() {
        let mut rs = StreamResampler::new(192_000, 228_000, 1024).unwrap();
        let input = vec![0.5f32; 1024];
        let mut output = vec![0.0f32; rs.output_capacity_hint()];

        let produced = rs.process(&input, &mut output).unwrap();
        assert!(produced > 0);
        assert!(produced <= rs.output_capacity_hint());
    }

    #[test]
    fn accepts_a_partial_tail_chunk() {
        let mut rs = StreamResampler::new(192_000, 228_000, 1024).unwrap();
        let full = vec![0.5f32; 1024];
        let mut output = vec![0.0f32; rs.output_capacity_hint()];
        rs.process(&full, &mut output).unwrap();

        let tail = vec![0.5f32; 100];
        let produced = rs.process(&tail, &mut output).unwrap();
        assert!(produced <= rs.output_capacity_hint());
    }

    #[test]
    fn rejects_oversized_input() {
        let mut rs = StreamResampler::new(192_000, 228_000, 256).unwrap();
        let input = vec![0.0f32; 512];
        let mut output = vec![0.0f32; rs.output_capacity_hint() * 2];
        assert!(rs.process(&input, &mut output).is_err());
    }
}
