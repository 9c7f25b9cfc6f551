//! State shared between the render thread and the control plane.
//!
//! Everything here is atomic. The render thread only stores; readers on
//! the control path may see values that are one block stale.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use atomic_float::AtomicF32;
use audioshift_dsp::ProfileKind;

use crate::mode::{AudioMode, SharedModeSignal};
use crate::selector::ProfileSelector;

/// Live counters published by the render thread
#[derive(Debug, Default)]
pub struct Telemetry {
    latency_ms: AtomicF32,
    cpu_percent: AtomicF32,
    frames: AtomicU64,
    faults: AtomicU64,
    underruns: AtomicU64,
    swaps: AtomicU64,
    voice_active: AtomicBool,
    live_buffers: AtomicUsize,
    sample_rate: AtomicU32,
    block_frames: AtomicU32,
}

/// Point-in-time copy of [`Telemetry`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetrySnapshot {
    pub latency_ms: f32,
    pub cpu_percent: f32,
    pub frames: u64,
    pub faults: u64,
    pub underruns: u64,
    pub swaps: u64,
    pub voice_active: bool,
    pub live_buffers: usize,
}

impl Telemetry {
    /// Publish the core's counters after one processed block
    pub fn record_block(&self, latency_ms: f32, block_frames: usize, frames: u64, faults: u64, underruns: u64) {
        self.latency_ms.store(latency_ms, Ordering::Relaxed);
        self.block_frames.store(block_frames as u32, Ordering::Relaxed);
        let rate = self.sample_rate.load(Ordering::Relaxed);
        if rate > 0 && block_frames > 0 {
            let block_ms = block_frames as f32 * 1000.0 / rate as f32;
            self.cpu_percent.store(latency_ms / block_ms * 100.0, Ordering::Relaxed);
        }
        self.frames.store(frames, Ordering::Relaxed);
        self.faults.store(faults, Ordering::Relaxed);
        self.underruns.store(underruns, Ordering::Relaxed);
    }

    pub fn record_swap(&self, kind: ProfileKind) {
        self.swaps.fetch_add(1, Ordering::Relaxed);
        self.voice_active
            .store(kind == ProfileKind::VoiceCall, Ordering::Relaxed);
    }

    pub fn set_stream(&self, sample_rate: u32, block_frames: usize) {
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
        self.block_frames.store(block_frames as u32, Ordering::Relaxed);
    }

    pub fn add_buffers(&self, count: usize) {
        self.live_buffers.fetch_add(count, Ordering::Relaxed);
    }

    pub fn remove_buffers(&self, count: usize) {
        self.live_buffers.fetch_sub(count, Ordering::Relaxed);
    }

    /// Duration of the most recent block, used as the debounce period
    pub fn block_period(&self) -> Option<Duration> {
        let rate = self.sample_rate.load(Ordering::Relaxed);
        let frames = self.block_frames.load(Ordering::Relaxed);
        if rate == 0 || frames == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(frames as f64 / rate as f64))
    }

    /// Zero the statistics; buffer accounting and stream shape are kept
    pub fn reset_stats(&self) {
        self.latency_ms.store(0.0, Ordering::Relaxed);
        self.cpu_percent.store(0.0, Ordering::Relaxed);
        self.frames.store(0, Ordering::Relaxed);
        self.faults.store(0, Ordering::Relaxed);
        self.underruns.store(0, Ordering::Relaxed);
        self.swaps.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            latency_ms: self.latency_ms.load(Ordering::Relaxed),
            cpu_percent: self.cpu_percent.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            swaps: self.swaps.load(Ordering::Relaxed),
            voice_active: self.voice_active.load(Ordering::Relaxed),
            live_buffers: self.live_buffers.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct SharedState {
    pub(crate) enabled: AtomicBool,
    pub(crate) selector: ProfileSelector,
    pub(crate) mode: SharedModeSignal,
    pub(crate) telemetry: Telemetry,
}

/// Clonable control handle for one effect instance.
///
/// `Send + Sync`; every method is wait-free.
#[derive(Debug, Clone)]
pub struct EffectController {
    shared: Arc<SharedState>,
}

impl EffectController {
    pub(crate) fn new(shared: Arc<SharedState>) -> Self {
        Self { shared }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.shared.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    /// Ask the render thread to switch profile at its next block
    pub fn request_profile(&self, kind: ProfileKind) {
        self.shared.selector.request(kind);
    }

    pub fn selector(&self) -> ProfileSelector {
        self.shared.selector.clone()
    }

    pub fn set_audio_mode(&self, mode: AudioMode) {
        self.shared.mode.set(mode);
    }

    pub fn audio_mode(&self) -> AudioMode {
        self.shared.mode.get()
    }

    pub fn mode_signal(&self) -> SharedModeSignal {
        self.shared.mode.clone()
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.shared.telemetry.snapshot()
    }

    pub fn block_period(&self) -> Option<Duration> {
        self.shared.telemetry.block_period()
    }
}
