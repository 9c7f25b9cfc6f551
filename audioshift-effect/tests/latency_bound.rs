//! Processing latency under a 48 kHz stereo, 10 ms block workload

use std::f32::consts::PI;
use std::sync::Arc;

use audioshift_dsp::ProfileKind;
use audioshift_effect::{Effect, MemoryStore, ProcessStatus, StreamConfig, DEFAULT_LATENCY_THRESHOLD_MS};

const SAMPLE_RATE: u32 = 48_000;
const CHANNELS: usize = 2;
const BLOCK_FRAMES: usize = 480;
const BLOCKS: usize = 600;

fn effect(kind: ProfileKind) -> Effect {
    let mut effect = Effect::create(Arc::new(MemoryStore::new())).unwrap();
    effect
        .initialize(StreamConfig {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            max_block_frames: BLOCK_FRAMES,
        })
        .unwrap();
    effect.activate().unwrap();
    effect.controller().request_profile(kind);
    effect
}

fn block(index: usize) -> Vec<f32> {
    (0..BLOCK_FRAMES * CHANNELS)
        .map(|n| {
            let t = (index * BLOCK_FRAMES + n / CHANNELS) as f32 / SAMPLE_RATE as f32;
            0.5 * (2.0 * PI * 440.0 * t).sin()
        })
        .collect()
}

#[test]
fn test_latency_below_threshold_and_voice_faster() {
    let mut media = effect(ProfileKind::Media);
    let mut voice = effect(ProfileKind::VoiceCall);
    let mut output = vec![0.0f32; BLOCK_FRAMES * CHANNELS];

    // Interleave so both profiles see the same machine load
    let (mut media_total, mut voice_total) = (0.0f64, 0.0f64);
    for i in 0..BLOCKS {
        let input = block(i);

        let status = media.process(&input, &mut output).unwrap();
        assert!(!matches!(status, ProcessStatus::Bypassed(_)));
        let status = voice.process(&input, &mut output).unwrap();
        assert!(!matches!(status, ProcessStatus::Bypassed(_)));

        if i >= BLOCKS / 4 {
            media_total += media.controller().telemetry().latency_ms as f64;
            voice_total += voice.controller().telemetry().latency_ms as f64;
        }
    }

    let samples = (BLOCKS - BLOCKS / 4) as f64;
    let media_avg = media_total / samples;
    let voice_avg = voice_total / samples;
    println!("media {:.4} ms, voice {:.4} ms", media_avg, voice_avg);

    assert!(media_avg < DEFAULT_LATENCY_THRESHOLD_MS as f64);
    assert!(voice_avg < DEFAULT_LATENCY_THRESHOLD_MS as f64);
    assert!(voice_avg < media_avg);

    assert!(voice.controller().telemetry().voice_active);
    assert!(!media.controller().telemetry().voice_active);
    assert_eq!(media.controller().telemetry().underruns, 0);
    assert_eq!(voice.controller().telemetry().underruns, 0);
}

#[test]
fn test_voice_profile_delivers_shorter_delay() {
    let mut media = effect(ProfileKind::Media);
    let mut voice = effect(ProfileKind::VoiceCall);
    let mut output = vec![0.0f32; BLOCK_FRAMES * CHANNELS];

    let mut first_audio = [None, None];
    for i in 0..200 {
        let input = block(i);
        for (slot, effect) in first_audio.iter_mut().zip([&mut media, &mut voice]) {
            let status = effect.process(&input, &mut output).unwrap();
            if slot.is_none() && status == ProcessStatus::Shifted {
                *slot = Some(i);
            }
        }
    }

    let media_delay = media.latency_frames().unwrap();
    let voice_delay = voice.latency_frames().unwrap();
    assert!(voice_delay < media_delay, "voice {voice_delay} media {media_delay}");
    assert!(voice_delay * 1000 < 70 * SAMPLE_RATE as usize, "voice delay {voice_delay}");

    let [media_at, voice_at] = first_audio.map(|at| at.expect("effect never primed"));
    assert!(voice_at < media_at, "voice primed at block {voice_at}, media at {media_at}");
}
