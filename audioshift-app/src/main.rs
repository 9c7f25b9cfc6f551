//! AudioShift - host simulator
//!
//! Plays a 440 Hz tone through one effect instance in real time while a
//! scripted timeline switches the platform audio mode into a call and back.

use std::env;
use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use crossbeam_channel::{Receiver, Sender};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use audioshift_dsp::ratio;
use audioshift_effect::{
    AudioMode, ControlLoop, Effect, EffectController, MemoryStore, ModeMonitor, ProcessStatus, StreamConfig,
    TelemetryPublisher, TelemetrySnapshot, DEFAULT_POLL_INTERVAL, DEFAULT_PUBLISH_INTERVAL,
};

const SAMPLE_RATE: u32 = 48_000;
const CHANNELS: usize = 2;
/// 10 ms blocks
const BLOCK_FRAMES: usize = 480;
const TONE_HZ: f32 = 440.0;
const DEFAULT_SECONDS: u64 = 6;

/// Reports from the render thread
#[derive(Debug)]
enum HostEvent {
    Progress {
        blocks: u64,
        priming: u64,
        bypassed: u64,
        telemetry: TelemetrySnapshot,
    },
    Finished {
        blocks: u64,
        overruns: u64,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let seconds = match env::args().nth(1) {
        Some(arg) => arg
            .parse::<u64>()
            .with_context(|| format!("invalid duration '{}'", arg))?,
        None => DEFAULT_SECONDS,
    };
    let total = Duration::from_secs(seconds.max(1));

    info!(
        "AudioShift: {} Hz -> {} Hz (ratio {:.6}, {:+.4} semitones)",
        ratio::SOURCE_REFERENCE_HZ,
        ratio::TARGET_REFERENCE_HZ,
        ratio::ratio(),
        ratio::semitones()
    );

    let store = Arc::new(MemoryStore::new());
    let mut effect = Effect::create(store.clone())?;
    effect.initialize(StreamConfig {
        sample_rate: SAMPLE_RATE,
        channels: CHANNELS,
        max_block_frames: BLOCK_FRAMES,
    })?;
    effect.activate()?;

    let controller = effect.controller();
    let monitor = ModeMonitor::new(controller.mode_signal(), controller.selector(), DEFAULT_POLL_INTERVAL);
    let publisher = TelemetryPublisher::new(controller.clone(), store, DEFAULT_PUBLISH_INTERVAL);
    let mut control = ControlLoop::spawn(monitor, publisher, DEFAULT_POLL_INTERVAL)
        .context("failed to start control loop")?;

    let (evt_tx, evt_rx) = crossbeam_channel::unbounded();
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_render = shutdown.clone();
    let render = thread::Builder::new()
        .name("audioshift-render".to_string())
        .spawn(move || run_render_thread(effect, evt_tx, shutdown_render))
        .context("failed to start render thread")?;

    run_timeline(&controller, &evt_rx, total);

    shutdown.store(true, Ordering::SeqCst);
    let mut effect = render
        .join()
        .map_err(|_| anyhow::anyhow!("render thread panicked"))?;
    for event in evt_rx.try_iter() {
        report(event);
    }

    control.stop();
    effect.release()?;

    let telemetry = controller.telemetry();
    info!(
        "Done: {} frames, {} profile swaps, {} faults, {} underruns, last latency {:.3} ms",
        telemetry.frames, telemetry.swaps, telemetry.faults, telemetry.underruns, telemetry.latency_ms
    );
    Ok(())
}

/// Drive the audio mode: media, then a call through the middle third
fn run_timeline(controller: &EffectController, events: &Receiver<HostEvent>, total: Duration) {
    let started = Instant::now();
    let call_start = total / 3;
    let call_end = total * 2 / 3;
    let mut in_call = false;

    while started.elapsed() < total {
        let elapsed = started.elapsed();
        let want_call = elapsed >= call_start && elapsed < call_end;
        if want_call != in_call {
            in_call = want_call;
            let mode = if in_call {
                AudioMode::InCall
            } else {
                AudioMode::Normal
            };
            info!("[{:>5.2}s] host audio mode -> {:?}", elapsed.as_secs_f32(), mode);
            controller.set_audio_mode(mode);
        }

        if let Ok(event) = events.recv_timeout(Duration::from_millis(50)) {
            report(event);
        }
    }
}

fn report(event: HostEvent) {
    match event {
        HostEvent::Progress {
            blocks,
            priming,
            bypassed,
            telemetry,
        } => {
            info!(
                "{} blocks ({} priming, {} bypassed): latency {:.3} ms, cpu {:.1}%, profile {}",
                blocks,
                priming,
                bypassed,
                telemetry.latency_ms,
                telemetry.cpu_percent,
                if telemetry.voice_active { "voice_call" } else { "media" }
            );
        }
        HostEvent::Finished { blocks, overruns } => {
            if overruns > 0 {
                warn!("Render thread missed {} of {} block deadlines", overruns, blocks);
            }
            info!("Render thread finished after {} blocks", blocks);
        }
    }
}

/// Host audio thread: one block per period, like a device callback
fn run_render_thread(mut effect: Effect, evt_tx: Sender<HostEvent>, shutdown: Arc<AtomicBool>) -> Effect {
    let period = Duration::from_secs_f64(BLOCK_FRAMES as f64 / SAMPLE_RATE as f64);
    let controller = effect.controller();

    // Pre-allocate so the loop itself never allocates
    let mut input = vec![0.0f32; BLOCK_FRAMES * CHANNELS];
    let mut output = vec![0.0f32; BLOCK_FRAMES * CHANNELS];
    let phase_step = 2.0 * PI * TONE_HZ / SAMPLE_RATE as f32;
    let mut phase = 0.0f32;

    let (mut blocks, mut priming, mut bypassed, mut overruns) = (0u64, 0u64, 0u64, 0u64);
    let mut next = Instant::now();

    while !shutdown.load(Ordering::Relaxed) {
        for frame in input.chunks_mut(CHANNELS) {
            frame.fill(0.5 * phase.sin());
            phase = (phase + phase_step) % (2.0 * PI);
        }

        match effect.process(&input, &mut output) {
            Ok(ProcessStatus::Priming) => priming += 1,
            Ok(ProcessStatus::Bypassed(_)) => bypassed += 1,
            Ok(_) => {}
            Err(e) => {
                let _ = evt_tx.send(HostEvent::Finished { blocks, overruns });
                warn!("Render stopped: {}", e);
                return effect;
            }
        }
        blocks += 1;

        if blocks % 100 == 0 {
            let _ = evt_tx.send(HostEvent::Progress {
                blocks,
                priming,
                bypassed,
                telemetry: controller.telemetry(),
            });
        }

        next += period;
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        } else {
            overruns += 1;
            next = now;
        }
    }

    let _ = evt_tx.send(HostEvent::Finished { blocks, overruns });
    effect
}
