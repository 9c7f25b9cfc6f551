//! Streaming sample-rate conversion by the pitch ratio.
//!
//! Playing `n` input frames as `n / r` output frames at the same sample
//! rate scales every frequency by `r`. The resampler therefore runs with a
//! rubato resample ratio of `1 / r`, which also stretches the duration by
//! `1 / r`; the time-stretch stage that follows restores it.

use rubato::{FastFixedIn, PolynomialDegree, Resampler as _};

use crate::error::{DspError, ProcessFault};
use crate::fifo::FrameFifo;

pub const MIN_SAMPLE_RATE: u32 = 8_000;
pub const MAX_SAMPLE_RATE: u32 = 192_000;
pub const MIN_RATIO: f64 = 0.5;
pub const MAX_RATIO: f64 = 2.0;

/// Input frames handed to rubato per call
pub const CHUNK_FRAMES: usize = 64;

/// Headroom rubato reserves for later ratio changes
const MAX_RELATIVE_RATIO: f64 = 1.1;

/// Streaming resampler by a fixed pitch ratio.
///
/// Input arrives in host-sized blocks and is accumulated until a whole
/// rubato chunk is available. Staging buffers are deinterleaved and sized
/// once at construction.
pub struct Resampler {
    inner: FastFixedIn<f32>,
    ratio: f64,
    channels: usize,
    pending: FrameFifo,
    stage_in: Vec<Vec<f32>>,
    stage_out: Vec<Vec<f32>>,
}

impl Resampler {
    /// Check a sample rate and pitch ratio before building anything
    pub fn check_supported(sample_rate: u32, ratio: f64) -> Result<(), DspError> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
            return Err(DspError::UnsupportedSampleRate {
                sample_rate,
                min: MIN_SAMPLE_RATE,
                max: MAX_SAMPLE_RATE,
            });
        }
        if !ratio.is_finite() {
            return Err(DspError::NonFinite("pitch ratio"));
        }
        if !(MIN_RATIO..=MAX_RATIO).contains(&ratio) {
            return Err(DspError::UnsupportedRatio(ratio));
        }
        Ok(())
    }

    pub fn new(
        sample_rate: u32,
        channels: usize,
        ratio: f64,
        max_block_frames: usize,
    ) -> Result<Self, DspError> {
        Self::check_supported(sample_rate, ratio)?;
        if channels == 0 {
            return Err(DspError::UnsupportedChannels(channels));
        }

        let inner = FastFixedIn::<f32>::new(
            1.0 / ratio,
            MAX_RELATIVE_RATIO,
            PolynomialDegree::Cubic,
            CHUNK_FRAMES,
            channels,
        )
        .map_err(|e| DspError::Resampler(e.to_string()))?;

        let out_max = inner.output_frames_max();
        Ok(Self {
            inner,
            ratio,
            channels,
            pending: FrameFifo::new(channels, CHUNK_FRAMES + max_block_frames),
            stage_in: vec![vec![0.0; CHUNK_FRAMES]; channels],
            stage_out: vec![vec![0.0; out_max]; channels],
        })
    }

    /// Pitch ratio this resampler was built for
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Upper bound on frames produced from one block of `block_frames`
    pub fn max_output_frames(ratio: f64, block_frames: usize) -> usize {
        let chunks = (block_frames + CHUNK_FRAMES) / CHUNK_FRAMES + 1;
        let per_chunk = (CHUNK_FRAMES as f64 * MAX_RELATIVE_RATIO / ratio).ceil() as usize + 2;
        chunks * per_chunk
    }

    /// Resample one interleaved block, appending the result to `output`.
    ///
    /// Returns the number of frames appended.
    pub fn process(&mut self, input: &[f32], output: &mut FrameFifo) -> Result<usize, ProcessFault> {
        self.pending.push(input)?;

        let ch = self.channels;
        let mut produced = 0;
        while self.pending.len() >= self.inner.input_frames_next() {
            let chunk = self.inner.input_frames_next();
            let src = self.pending.samples();
            for (c, lane) in self.stage_in.iter_mut().enumerate() {
                for (i, s) in lane[..chunk].iter_mut().enumerate() {
                    *s = src[i * ch + c];
                }
            }

            let (_, written) = self
                .inner
                .process_into_buffer(&self.stage_in, &mut self.stage_out, None)
                .map_err(|_| ProcessFault::Resampler)?;
            self.pending.consume(chunk);

            let dst = output.extend_zeroed(written)?;
            for (c, lane) in self.stage_out.iter().enumerate() {
                for (i, &s) in lane[..written].iter().enumerate() {
                    dst[i * ch + c] = s;
                }
            }
            produced += written;
        }
        Ok(produced)
    }

    /// Drop buffered input and filter history
    pub fn reset(&mut self) {
        self.inner.reset();
        self.pending.clear();
    }
}
