//! AudioShift DSP - real-time 440 Hz to 432 Hz pitch shifting
//!
//! Features:
//! - Fixed 432/440 pitch ratio with semitone and cent conversions
//! - Streaming polynomial resampler (rubato) by the pitch ratio
//! - WSOLA time stretching with switchable media and voice-call profiles
//! - Allocation-free render path with bypass-on-fault
//! - PCM16 conversion helpers

mod error;
mod fifo;
mod pcm;
mod pitch;
mod profile;
mod resampler;
mod stretch;
pub mod ratio;

pub use error::{DspError, ProcessFault};
pub use fifo::FrameFifo;
pub use pcm::{f32_to_pcm16, pcm16_to_f32};
pub use pitch::{bypass, CoreConfig, CoreStats, PitchShiftCore, ProcessOutcome, MAX_BLOCK_FRAMES, MAX_CHANNELS};
pub use profile::{PitchProfile, ProfileKind, StretchGeometry};
pub use resampler::{Resampler, CHUNK_FRAMES, MAX_RATIO, MAX_SAMPLE_RATE, MIN_RATIO, MIN_SAMPLE_RATE};
pub use stretch::{StretchLimits, StretchStage, TimeStretchKernel};
