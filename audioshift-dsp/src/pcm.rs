//! PCM16 <-> f32 sample conversion for hosts that deliver 16-bit audio.

const SCALE: f32 = 32768.0;

/// Convert signed 16-bit samples to floats in [-1.0, 1.0).
///
/// Converts `min(src.len(), dst.len())` samples.
pub fn pcm16_to_f32(src: &[i16], dst: &mut [f32]) {
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = s as f32 / SCALE;
    }
}

/// Convert floats back to 16-bit samples, saturating out-of-range values.
///
/// Non-finite samples are written as silence.
pub fn f32_to_pcm16(src: &[f32], dst: &mut [i16]) {
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = if s.is_finite() {
            (s * SCALE).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
        } else {
            0
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm16_to_f32_range() {
        let src = [i16::MIN, -16384, 0, 16384, i16::MAX];
        let mut dst = [0.0f32; 5];
        pcm16_to_f32(&src, &mut dst);
        assert_eq!(dst[0], -1.0);
        assert_eq!(dst[1], -0.5);
        assert_eq!(dst[2], 0.0);
        assert_eq!(dst[3], 0.5);
        assert!(dst[4] < 1.0 && dst[4] > 0.9999);
    }

    #[test]
    fn test_f32_to_pcm16_saturates() {
        let src = [2.0f32, -2.0, 0.5, -0.5, 0.0];
        let mut dst = [0i16; 5];
        f32_to_pcm16(&src, &mut dst);
        assert_eq!(dst, [i16::MAX, i16::MIN, 16384, -16384, 0]);
    }

    #[test]
    fn test_non_finite_becomes_silence() {
        let src = [f32::NAN, f32::INFINITY, f32::NEG_INFINITY];
        let mut dst = [7i16; 3];
        f32_to_pcm16(&src, &mut dst);
        assert_eq!(dst, [0, 0, 0]);
    }

    #[test]
    fn test_conversion_is_lossless_for_pcm16() {
        let src: Vec<i16> = (-32768..=32767).step_by(97).map(|v| v as i16).collect();
        let mut floats = vec![0.0f32; src.len()];
        let mut back = vec![0i16; src.len()];
        pcm16_to_f32(&src, &mut floats);
        f32_to_pcm16(&floats, &mut back);
        assert_eq!(src, back);
    }
}
