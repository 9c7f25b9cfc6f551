//! Pitch ratio math for the 440 Hz -> 432 Hz retune.
//!
//! The ratio is a compile-time constant. Conversions between ratio,
//! semitones and cents are pure functions that reject non-finite values.

use crate::error::DspError;

/// Concert pitch the source material is assumed to be tuned to
pub const SOURCE_REFERENCE_HZ: f64 = 440.0;

/// Concert pitch the output is retuned to
pub const TARGET_REFERENCE_HZ: f64 = 432.0;

/// Frequency ratio applied to every component (432/440)
pub const PITCH_RATIO: f64 = TARGET_REFERENCE_HZ / SOURCE_REFERENCE_HZ;

/// 12 * log2(432/440), rounded to four places (-31.77 cents)
pub const PITCH_SEMITONES: f64 = -0.3177;

/// The fixed pitch ratio
#[inline]
pub fn ratio() -> f64 {
    PITCH_RATIO
}

/// The fixed pitch shift in semitones (negative: pitch is lowered)
#[inline]
pub fn semitones() -> f64 {
    12.0 * PITCH_RATIO.log2()
}

/// Convert a semitone offset into a frequency ratio (2^(s/12))
pub fn ratio_from_semitones(semitones: f64) -> Result<f64, DspError> {
    if !semitones.is_finite() {
        return Err(DspError::NonFinite("semitones"));
    }
    let ratio = 2.0f64.powf(semitones / 12.0);
    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(DspError::NonFinite("ratio"));
    }
    Ok(ratio)
}

/// Convert a frequency ratio into semitones (12 * log2(r))
pub fn semitones_from_ratio(ratio: f64) -> Result<f64, DspError> {
    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(DspError::NonFinite("ratio"));
    }
    Ok(12.0 * ratio.log2())
}

/// Convert a frequency ratio into cents (1200 * log2(r))
pub fn cents_from_ratio(ratio: f64) -> Result<f64, DspError> {
    semitones_from_ratio(ratio).map(|s| s * 100.0)
}

/// Convert cents into a frequency ratio
pub fn ratio_from_cents(cents: f64) -> Result<f64, DspError> {
    ratio_from_semitones(cents / 100.0)
}
