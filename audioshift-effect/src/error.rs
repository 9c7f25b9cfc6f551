//! Error types for the effect lifecycle and configuration surface

use std::io;
use std::path::PathBuf;

use audioshift_dsp::DspError;
use thiserror::Error;

use crate::lifecycle::EffectState;

/// Errors returned by [`crate::Effect`] operations
#[derive(Error, Debug)]
pub enum EffectError {
    #[error("operation '{operation}' is not valid in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: EffectState,
    },
    #[error("invalid stream configuration: {0}")]
    InvalidConfig(#[source] DspError),
    #[error("unsupported sample rate {0} Hz, passing audio through unmodified")]
    UnsupportedSampleRate(u32),
    #[error("invalid pitch ratio {0}")]
    InvalidRatio(f64),
    #[error("DSP setup failed: {0}")]
    Dsp(#[from] DspError),
}

impl EffectError {
    /// Negative errno reported across the C ABI
    pub fn errno(&self) -> i32 {
        match self {
            EffectError::InvalidState { .. } => crate::ffi::INVALID_STATE,
            _ => crate::ffi::BAD_VALUE,
        }
    }
}

/// Errors from configuration stores
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed value '{value}' for key '{key}'")]
    Malformed { key: String, value: String },
}
