//! Streaming pitch shifter: resampler followed by a time-stretch stage.

use std::time::{Duration, Instant};

use crate::error::{DspError, ProcessFault};
use crate::fifo::FrameFifo;
use crate::profile::PitchProfile;
use crate::resampler::{Resampler, CHUNK_FRAMES};
use crate::stretch::{StretchStage, TimeStretchKernel};

/// Largest block the core accepts, in frames
pub const MAX_BLOCK_FRAMES: usize = 8192;
pub const MAX_CHANNELS: usize = 8;

/// Smoothing factor of the processing-latency average
const LATENCY_EMA_ALPHA: f32 = 0.1;

/// Stream shape the core is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreConfig {
    pub sample_rate: u32,
    pub channels: usize,
    pub max_block_frames: usize,
}

impl CoreConfig {
    pub fn validate(&self) -> Result<(), DspError> {
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(DspError::UnsupportedChannels(self.channels));
        }
        if self.max_block_frames == 0 || self.max_block_frames > MAX_BLOCK_FRAMES {
            return Err(DspError::InvalidBlockSize(self.max_block_frames));
        }
        Ok(())
    }
}

/// What a call to [`PitchShiftCore::process`] did with the block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Output holds pitch-shifted audio
    Shifted,
    /// Pipeline is still filling; output holds silence
    Priming,
    /// A fault was detected; output is a copy of the input
    Bypassed(ProcessFault),
}

/// Render-path counters. Plain integers: only the render thread writes them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoreStats {
    pub blocks: u64,
    pub frames: u64,
    pub faults: u64,
    pub underruns: u64,
}

/// Real-time pitch shifter.
///
/// Built once per stream configuration; `process` never allocates, never
/// blocks and never panics on bad input. Faults are absorbed by copying
/// input to output and restarting the pipeline from silence.
pub struct PitchShiftCore<S: StretchStage = TimeStretchKernel> {
    config: CoreConfig,
    ratio: f64,
    resampler: Resampler,
    stretch: S,
    stretched_in: FrameFifo,
    out: FrameFifo,
    largest_block: usize,
    primed: bool,
    latency_ms: Option<f32>,
    stats: CoreStats,
}

impl PitchShiftCore<TimeStretchKernel> {
    /// Preallocate every buffer for `config` and the given pitch ratio
    pub fn initialize(config: CoreConfig, ratio: f64, profile: PitchProfile) -> Result<Self, DspError> {
        config.validate()?;
        Resampler::check_supported(config.sample_rate, ratio)?;
        let stretch = TimeStretchKernel::new(config.sample_rate, config.channels, 1.0 / ratio, profile)?;
        Self::with_stretch(config, ratio, stretch)
    }
}

impl<S: StretchStage> PitchShiftCore<S> {
    /// Build a core around a caller-supplied stretch stage
    pub fn with_stretch(config: CoreConfig, ratio: f64, stretch: S) -> Result<Self, DspError> {
        config.validate()?;
        let resampler = Resampler::new(config.sample_rate, config.channels, ratio, config.max_block_frames)?;

        let block = config.max_block_frames;
        let resampled = Resampler::max_output_frames(ratio, block);
        let backlog = stretch.max_backlog();
        let burst = stretch.max_burst();
        let ceiling = prime_base(backlog, burst, ratio);

        Ok(Self {
            config,
            ratio,
            resampler,
            stretched_in: FrameFifo::new(config.channels, backlog + resampled + block),
            out: FrameFifo::new(config.channels, 2 * (ceiling + burst + block)),
            stretch,
            largest_block: 0,
            primed: false,
            latency_ms: None,
            stats: CoreStats::default(),
        })
    }

    pub fn config(&self) -> CoreConfig {
        self.config
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn stats(&self) -> CoreStats {
        self.stats
    }

    pub fn stretch(&self) -> &S {
        &self.stretch
    }

    /// Algorithmic delay between input and output, in frames, for the
    /// active profile (or the one being swapped to) and the largest block
    /// seen so far
    pub fn latency_frames(&self) -> usize {
        prime_base(self.stretch.backlog(), self.stretch.burst(), self.ratio) + self.largest_block
    }

    /// Smoothed wall-clock time spent inside `process`, in milliseconds
    pub fn processing_latency_ms(&self) -> f32 {
        self.latency_ms.unwrap_or(0.0)
    }

    pub fn active_profile(&self) -> PitchProfile {
        self.stretch.active_profile()
    }

    /// Queue a profile change; applied at the next safe splice
    pub fn request_profile(&mut self, profile: PitchProfile) -> Result<(), DspError> {
        self.stretch.request_profile(profile)
    }

    /// Drop all buffered audio and restart from silence
    pub fn reset(&mut self) {
        self.resampler.reset();
        self.stretch.reset();
        self.stretched_in.clear();
        self.out.clear();
        self.primed = false;
    }

    pub fn reset_stats(&mut self) {
        self.stats = CoreStats::default();
        self.latency_ms = None;
    }

    /// Pitch-shift one interleaved block. `output` must match `input` in size.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> ProcessOutcome {
        let started = Instant::now();
        let outcome = match self.render(input, output) {
            Ok(outcome) => outcome,
            Err(fault) => {
                bypass(input, output);
                self.stats.faults += 1;
                self.reset();
                ProcessOutcome::Bypassed(fault)
            }
        };
        self.stats.blocks += 1;
        self.stats.frames += (input.len() / self.config.channels) as u64;
        self.record_latency(started.elapsed());
        outcome
    }

    fn render(&mut self, input: &[f32], output: &mut [f32]) -> Result<ProcessOutcome, ProcessFault> {
        if input.len() != output.len() || input.len() % self.config.channels != 0 {
            return Err(ProcessFault::BlockSizeMismatch);
        }
        let frames = input.len() / self.config.channels;
        if frames > self.config.max_block_frames {
            return Err(ProcessFault::BlockTooLarge);
        }
        self.largest_block = self.largest_block.max(frames);

        self.resampler.process(input, &mut self.stretched_in)?;
        self.stretch.process(&mut self.stretched_in, &mut self.out)?;

        if !self.primed {
            if self.out.len() < self.latency_frames() {
                output.fill(0.0);
                return Ok(ProcessOutcome::Priming);
            }
            self.primed = true;
            self.stretch.anchor_latency();
        }

        let frames = self.out.pop_into(output);
        let written = frames * self.config.channels;
        if written < output.len() {
            output[written..].fill(0.0);
            self.stats.underruns += 1;
        }

        if output.iter().any(|s| !s.is_finite()) {
            return Err(ProcessFault::NonFiniteOutput);
        }
        Ok(ProcessOutcome::Shifted)
    }

    fn record_latency(&mut self, elapsed: Duration) {
        let sample = elapsed.as_secs_f32() * 1000.0;
        self.latency_ms = Some(match self.latency_ms {
            Some(avg) => avg + LATENCY_EMA_ALPHA * (sample - avg),
            None => sample,
        });
    }
}

/// Output level needed before playback starts, excluding the block itself.
/// Once the level reaches this plus one block it stays above one block,
/// whatever the stretch backlog does afterwards.
fn prime_base(backlog: usize, burst: usize, ratio: f64) -> usize {
    (backlog as f64 * ratio).ceil() as usize + 2 * CHUNK_FRAMES + burst
}

/// Copy input to output, zero-filling any length mismatch
pub fn bypass(input: &[f32], output: &mut [f32]) {
    let n = input.len().min(output.len());
    output[..n].copy_from_slice(&input[..n]);
    output[n..].fill(0.0);
}
