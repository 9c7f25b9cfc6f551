//! Error types for the AudioShift DSP crate

use thiserror::Error;

/// Configuration-time errors (never raised from inside `process`)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DspError {
    #[error("non-finite value for {0}")]
    NonFinite(&'static str),
    #[error("unsupported sample rate {sample_rate} Hz (supported {min}..={max} Hz)")]
    UnsupportedSampleRate { sample_rate: u32, min: u32, max: u32 },
    #[error("pitch ratio {0} outside supported range [0.5, 2.0]")]
    UnsupportedRatio(f64),
    #[error("unsupported channel count {0} (supported 1..=8)")]
    UnsupportedChannels(usize),
    #[error("invalid maximum block size {0} frames")]
    InvalidBlockSize(usize),
    #[error("invalid profile '{label}': {reason}")]
    InvalidProfile {
        label: &'static str,
        reason: &'static str,
    },
    #[error("profile '{0}' exceeds the preallocated stretch window")]
    ProfileTooLarge(&'static str),
    #[error("resampler setup failed: {0}")]
    Resampler(String),
}

/// Faults detected on the render path.
///
/// These are recovered by bypass-on-fault inside [`crate::PitchShiftCore`]
/// and only surface as counters and outcome values.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessFault {
    #[error("input and output buffer sizes differ")]
    BlockSizeMismatch,
    #[error("block is larger than the preallocated maximum")]
    BlockTooLarge,
    #[error("non-finite sample in output")]
    NonFiniteOutput,
    #[error("internal FIFO overflow")]
    FifoOverflow,
    #[error("resampler rejected the block")]
    Resampler,
}
