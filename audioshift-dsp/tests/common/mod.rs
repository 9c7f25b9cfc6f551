#![allow(dead_code)]

use std::f32::consts::PI;

use audioshift_dsp::{CoreConfig, PitchShiftCore, ProcessOutcome};
use rustfft::{num_complex::Complex, FftPlanner};

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: usize = 2;
/// 10 ms at 48 kHz
pub const BLOCK_FRAMES: usize = 480;

pub fn core_config() -> CoreConfig {
    CoreConfig {
        sample_rate: SAMPLE_RATE,
        channels: CHANNELS,
        max_block_frames: BLOCK_FRAMES,
    }
}

/// Interleaved sine with the same value on every channel
pub fn gen_sine(freq_hz: f32, sr: u32, frames: usize, channels: usize, amp: f32) -> Vec<f32> {
    let mut out = Vec::with_capacity(frames * channels);
    for i in 0..frames {
        let s = amp * (2.0 * PI * freq_hz * i as f32 / sr as f32).sin();
        out.extend(std::iter::repeat(s).take(channels));
    }
    out
}

/// Feed `input` through the core block by block; the output has the same length
pub fn run_blocks<F>(core: &mut PitchShiftCore, input: &[f32], mut before_block: F) -> Vec<f32>
where
    F: FnMut(&mut PitchShiftCore, usize),
{
    let block = BLOCK_FRAMES * CHANNELS;
    let mut output = vec![0.0f32; input.len()];
    for (i, (src, dst)) in input.chunks(block).zip(output.chunks_mut(block)).enumerate() {
        before_block(core, i);
        let outcome = core.process(src, dst);
        assert!(
            !matches!(outcome, ProcessOutcome::Bypassed(_)),
            "block {i} bypassed: {outcome:?}"
        );
    }
    output
}

/// First channel of an interleaved buffer
pub fn channel(samples: &[f32], channels: usize, index: usize) -> Vec<f32> {
    samples.iter().skip(index).step_by(channels).copied().collect()
}

/// Frequency of the strongest spectral peak above 20 Hz.
///
/// Hann window, 4x zero padding, parabolic interpolation on magnitudes.
pub fn dominant_frequency(signal: &[f32], sr: u32) -> f32 {
    let n = signal.len();
    let fft_len = (n * 4).next_power_of_two();
    let mut buffer: Vec<Complex<f32>> = vec![Complex::new(0.0, 0.0); fft_len];
    for (i, (&s, slot)) in signal.iter().zip(buffer.iter_mut()).enumerate() {
        let w = 0.5 - 0.5 * (2.0 * PI * i as f32 / (n - 1) as f32).cos();
        *slot = Complex::new(s * w, 0.0);
    }

    let mut planner = FftPlanner::new();
    planner.plan_fft_forward(fft_len).process(&mut buffer);

    let mags: Vec<f32> = buffer[..fft_len / 2].iter().map(|c| c.norm()).collect();
    let bin_hz = sr as f32 / fft_len as f32;
    let lo = (20.0 / bin_hz).ceil() as usize;
    let (peak, _) = mags
        .iter()
        .enumerate()
        .skip(lo)
        .take(mags.len() - lo - 1)
        .fold((lo, 0.0f32), |best, (i, &m)| if m > best.1 { (i, m) } else { best });

    let (a, b, c) = (mags[peak - 1], mags[peak], mags[peak + 1]);
    let denom = a - 2.0 * b + c;
    let delta = if denom.abs() > f32::EPSILON {
        0.5 * (a - c) / denom
    } else {
        0.0
    };
    (peak as f32 + delta) * bin_hz
}

/// Largest absolute difference between consecutive samples
pub fn max_jump(signal: &[f32]) -> f32 {
    signal
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .fold(0.0, f32::max)
}

pub fn rms(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    (signal.iter().map(|s| s * s).sum::<f32>() / signal.len() as f32).sqrt()
}
