mod common;

use audioshift_dsp::{ratio, CoreConfig, PitchProfile, PitchShiftCore};
use common::*;

fn shift_and_measure(profile: PitchProfile, freq: f32, seconds: usize) -> (Vec<f32>, f32) {
    let mut core = PitchShiftCore::initialize(core_config(), ratio::ratio(), profile).unwrap();
    let frames = SAMPLE_RATE as usize * seconds;
    let input = gen_sine(freq, SAMPLE_RATE, frames, CHANNELS, 0.5);
    let output = run_blocks(&mut core, &input, |_, _| {});
    assert_eq!(output.len(), input.len());
    assert_eq!(core.stats().underruns, 0);

    // analyse the last two seconds, well past priming
    let left = channel(&output, CHANNELS, 0);
    let tail = &left[left.len() - 2 * SAMPLE_RATE as usize..];
    (output, dominant_frequency(tail, SAMPLE_RATE))
}

#[test]
fn a440_becomes_a432_with_media_profile() {
    let (_, freq) = shift_and_measure(PitchProfile::MEDIA, 440.0, 4);
    assert!((freq - 432.0).abs() < 0.5, "measured {freq} Hz");
}

#[test]
fn a440_becomes_a432_with_voice_profile() {
    let (_, freq) = shift_and_measure(PitchProfile::VOICE_CALL, 440.0, 4);
    assert!((freq - 432.0).abs() < 0.5, "measured {freq} Hz");
}

#[test]
fn every_frequency_scales_by_the_ratio() {
    let (_, freq) = shift_and_measure(PitchProfile::MEDIA, 1000.0, 4);
    let expected = 1000.0 * ratio::ratio() as f32;
    assert!((freq - expected).abs() < 1.0, "measured {freq} Hz, expected {expected}");
}

#[test]
fn level_is_preserved() {
    let (output, _) = shift_and_measure(PitchProfile::MEDIA, 440.0, 3);
    let left = channel(&output, CHANNELS, 0);
    let tail = &left[left.len() - SAMPLE_RATE as usize..];
    let expected = 0.5 / 2f32.sqrt();
    let level = rms(tail);
    assert!((level - expected).abs() < 0.05 * expected, "rms {level}, expected {expected}");
}

#[test]
fn shifted_sine_has_no_clicks() {
    let (output, _) = shift_and_measure(PitchProfile::MEDIA, 440.0, 3);
    let left = channel(&output, CHANNELS, 0);
    let tail = &left[SAMPLE_RATE as usize / 2..];
    // natural step of a 0.5 amplitude 432 Hz sine is about 0.028
    assert!(max_jump(tail) < 0.1, "jump {}", max_jump(tail));
}

#[test]
fn mono_at_44100_is_shifted() {
    let config = CoreConfig {
        sample_rate: 44_100,
        channels: 1,
        max_block_frames: 441,
    };
    let mut core = PitchShiftCore::initialize(config, ratio::ratio(), PitchProfile::MEDIA).unwrap();
    let input = gen_sine(440.0, 44_100, 44_100 * 4, 1, 0.5);
    let mut output = vec![0.0f32; input.len()];
    for (src, dst) in input.chunks(441).zip(output.chunks_mut(441)) {
        core.process(src, dst);
    }
    let tail = &output[output.len() - 2 * 44_100..];
    let freq = dominant_frequency(tail, 44_100);
    assert!((freq - 432.0).abs() < 0.5, "measured {freq} Hz");
}
