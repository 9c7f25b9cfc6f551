//! Effect lifecycle state machine.
//!
//! ```text
//! Created --initialize--> Initialized --activate--> Active <--> Bypassed
//!    \                          \                     |           |
//!     +-----------------------release----------------+-----------+--> Released
//! ```
//!
//! `initialize` may run again from any live state and always lands in
//! `Initialized`. `Bypassed` is entered when the core reports a fault and
//! left on the next block that processes cleanly.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use audioshift_dsp::{
    bypass, ratio, CoreConfig, PitchProfile, PitchShiftCore, ProcessFault, ProcessOutcome, ProfileKind, Resampler,
    MAX_BLOCK_FRAMES, MAX_RATIO, MIN_RATIO,
};
use tracing::{debug, error, info, warn};

use crate::config::{ConfigSnapshot, ConfigStore};
use crate::error::EffectError;
use crate::mode::AudioMode;
use crate::shared::{EffectController, SharedState, TelemetrySnapshot};

/// Preallocated buffers owned by one pitch-shift core (two FIFOs, the
/// resampler staging and the stretch scratch)
const CORE_BUFFERS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectState {
    Created,
    Initialized,
    Active,
    Bypassed,
    Released,
}

/// Stream shape negotiated with the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub sample_rate: u32,
    pub channels: usize,
    pub max_block_frames: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            max_block_frames: MAX_BLOCK_FRAMES,
        }
    }
}

/// Control commands accepted by [`Effect::command`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EffectCommand {
    Enable,
    Disable,
    /// Drop buffered audio; the next blocks prime again
    Reset,
    SetPitchRatio(f64),
    SetAudioMode(AudioMode),
    GetPitchRatio,
    GetLatencyMs,
    GetCpuUsage,
    GetFaultCount,
    GetTelemetry,
    ResetStats,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandReply {
    Done,
    PitchRatio(f64),
    LatencyMs(f32),
    CpuPercent(f32),
    FaultCount(u64),
    Telemetry(TelemetrySnapshot),
}

/// What happened to one block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Shifted,
    /// Pipeline still filling, output is silence
    Priming,
    /// Disabled or no usable core; output is a copy of the input
    PassThrough,
    /// Fault inside the core; output is a copy of the input
    Bypassed(ProcessFault),
}

/// One effect instance
pub struct Effect {
    state: EffectState,
    shared: Arc<SharedState>,
    store: Arc<dyn ConfigStore>,
    stream: Option<StreamConfig>,
    ratio: f64,
    core: Option<PitchShiftCore>,
    /// Profile the core is converging on; new cores start with it
    requested: ProfileKind,
    /// Profile last reported to telemetry
    published: ProfileKind,
    was_enabled: bool,
}

impl Effect {
    pub fn create(store: Arc<dyn ConfigStore>) -> Result<Self, EffectError> {
        let snapshot = ConfigSnapshot::load(store.as_ref());
        let shared = Arc::new(SharedState::default());
        shared.enabled.store(snapshot.enabled, Ordering::Release);
        info!("AudioShift effect created (enabled={})", snapshot.enabled);
        Ok(Self {
            state: EffectState::Created,
            shared,
            store,
            stream: None,
            ratio: snapshot.pitch_ratio,
            core: None,
            requested: ProfileKind::Media,
            published: ProfileKind::Media,
            was_enabled: snapshot.enabled,
        })
    }

    pub fn state(&self) -> EffectState {
        self.state
    }

    pub fn stream(&self) -> Option<StreamConfig> {
        self.stream
    }

    pub fn pitch_ratio(&self) -> f64 {
        self.ratio
    }

    /// Profile the core is splicing with. A requested swap shows up here
    /// only once the core has applied it.
    pub fn active_profile(&self) -> PitchProfile {
        self.core
            .as_ref()
            .map_or(self.requested.profile(), PitchShiftCore::active_profile)
    }

    /// Algorithmic delay of the current core, in frames
    pub fn latency_frames(&self) -> Option<usize> {
        self.core.as_ref().map(PitchShiftCore::latency_frames)
    }

    pub fn controller(&self) -> EffectController {
        EffectController::new(self.shared.clone())
    }

    /// Build the processing core for `stream`.
    ///
    /// An unsupported sample rate is reported as an error but still leaves
    /// the effect `Initialized`, passing audio through unmodified.
    pub fn initialize(&mut self, stream: StreamConfig) -> Result<(), EffectError> {
        self.ensure_live("initialize")?;
        let core_config = CoreConfig {
            sample_rate: stream.sample_rate,
            channels: stream.channels,
            max_block_frames: stream.max_block_frames,
        };
        core_config.validate().map_err(EffectError::InvalidConfig)?;

        let snapshot = ConfigSnapshot::load(self.store.as_ref());
        self.ratio = snapshot.pitch_ratio;
        self.shared
            .enabled
            .store(snapshot.enabled, Ordering::Release);
        self.was_enabled = snapshot.enabled;
        self.stream = Some(stream);
        self.state = EffectState::Initialized;
        self.shared
            .telemetry
            .set_stream(stream.sample_rate, stream.max_block_frames);

        if Resampler::check_supported(stream.sample_rate, self.ratio).is_err() {
            self.install_core(None);
            error!(
                "Sample rate {} Hz not supported, effect will pass audio through",
                stream.sample_rate
            );
            return Err(EffectError::UnsupportedSampleRate(stream.sample_rate));
        }

        match PitchShiftCore::initialize(core_config, self.ratio, self.requested.profile()) {
            Ok(core) => {
                info!(
                    "Initialized: {} Hz, {} ch, max block {} frames, ratio {:.6}, profile {}, latency {} frames",
                    stream.sample_rate,
                    stream.channels,
                    stream.max_block_frames,
                    self.ratio,
                    self.requested.label(),
                    core.latency_frames()
                );
                self.install_core(Some(core));
                Ok(())
            }
            Err(e) => {
                self.install_core(None);
                error!("Failed to build pitch shifter: {}", e);
                Err(EffectError::Dsp(e))
            }
        }
    }

    /// Start processing. Idempotent once active.
    pub fn activate(&mut self) -> Result<(), EffectError> {
        match self.state {
            EffectState::Initialized => {
                self.state = EffectState::Active;
                info!("Effect activated");
                Ok(())
            }
            EffectState::Active | EffectState::Bypassed => Ok(()),
            state => Err(EffectError::InvalidState {
                operation: "activate",
                state,
            }),
        }
    }

    /// Process one interleaved block.
    ///
    /// Wait-free and allocation-free. On a core fault the output is a copy
    /// of the input and the effect is `Bypassed` until a block succeeds.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<ProcessStatus, EffectError> {
        match self.state {
            EffectState::Active | EffectState::Bypassed => {}
            state => {
                return Err(EffectError::InvalidState {
                    operation: "process",
                    state,
                })
            }
        }

        if let Some(kind) = self.shared.selector.take() {
            self.apply_profile(kind);
        }

        let enabled = self.shared.enabled.load(Ordering::Acquire);
        if !enabled {
            self.was_enabled = false;
            bypass(input, output);
            return Ok(ProcessStatus::PassThrough);
        }

        let Some(core) = self.core.as_mut() else {
            bypass(input, output);
            return Ok(ProcessStatus::PassThrough);
        };

        if !self.was_enabled {
            // re-enabled: start from silence instead of stale audio
            core.reset();
            self.was_enabled = true;
        }

        let outcome = core.process(input, output);
        let live = ProfileKind::of(core.active_profile());
        let stats = core.stats();
        let channels = core.config().channels;
        self.shared.telemetry.record_block(
            core.processing_latency_ms(),
            input.len() / channels,
            stats.frames,
            stats.faults,
            stats.underruns,
        );
        if let Some(kind) = live {
            self.publish_profile(kind);
        }

        Ok(match outcome {
            ProcessOutcome::Shifted => {
                self.state = EffectState::Active;
                ProcessStatus::Shifted
            }
            ProcessOutcome::Priming => {
                self.state = EffectState::Active;
                ProcessStatus::Priming
            }
            ProcessOutcome::Bypassed(fault) => {
                self.state = EffectState::Bypassed;
                ProcessStatus::Bypassed(fault)
            }
        })
    }

    pub fn command(&mut self, command: EffectCommand) -> Result<CommandReply, EffectError> {
        self.ensure_live("command")?;
        debug!("Command {:?}", command);
        let controller = self.controller();
        match command {
            EffectCommand::Enable => {
                controller.set_enabled(true);
                info!("Pitch shift enabled");
            }
            EffectCommand::Disable => {
                controller.set_enabled(false);
                info!("Pitch shift disabled");
            }
            EffectCommand::Reset => {
                if let Some(core) = self.core.as_mut() {
                    core.reset();
                }
            }
            EffectCommand::SetPitchRatio(ratio) => self.set_pitch_ratio(ratio)?,
            EffectCommand::SetAudioMode(mode) => {
                debug!("Host reports audio mode {:?}", mode);
                controller.set_audio_mode(mode);
            }
            EffectCommand::GetPitchRatio => return Ok(CommandReply::PitchRatio(self.ratio)),
            EffectCommand::GetLatencyMs => return Ok(CommandReply::LatencyMs(controller.telemetry().latency_ms)),
            EffectCommand::GetCpuUsage => return Ok(CommandReply::CpuPercent(controller.telemetry().cpu_percent)),
            EffectCommand::GetFaultCount => return Ok(CommandReply::FaultCount(controller.telemetry().faults)),
            EffectCommand::GetTelemetry => return Ok(CommandReply::Telemetry(controller.telemetry())),
            EffectCommand::ResetStats => {
                if let Some(core) = self.core.as_mut() {
                    core.reset_stats();
                }
                self.shared.telemetry.reset_stats();
            }
        }
        Ok(CommandReply::Done)
    }

    /// Free all buffers. Every later call fails with `InvalidState`.
    pub fn release(&mut self) -> Result<(), EffectError> {
        self.ensure_live("release")?;
        let frames = self.shared.telemetry.snapshot().frames;
        self.install_core(None);
        self.state = EffectState::Released;
        info!("Effect released after {} frames", frames);
        Ok(())
    }

    fn ensure_live(&self, operation: &'static str) -> Result<(), EffectError> {
        if self.state == EffectState::Released {
            return Err(EffectError::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    fn set_pitch_ratio(&mut self, requested: f64) -> Result<(), EffectError> {
        if !requested.is_finite() || !(MIN_RATIO..=MAX_RATIO).contains(&requested) {
            warn!("Rejected pitch ratio {}", requested);
            return Err(EffectError::InvalidRatio(requested));
        }
        let Some(stream) = self.stream else {
            self.ratio = requested;
            return Ok(());
        };
        let core_config = CoreConfig {
            sample_rate: stream.sample_rate,
            channels: stream.channels,
            max_block_frames: stream.max_block_frames,
        };
        let core = PitchShiftCore::initialize(core_config, requested, self.requested.profile())?;
        info!(
            "Pitch ratio {:.6} -> {:.6} ({:+.2} cents)",
            self.ratio,
            requested,
            ratio::cents_from_ratio(requested).unwrap_or(0.0)
        );
        self.ratio = requested;
        self.install_core(Some(core));
        Ok(())
    }

    fn apply_profile(&mut self, kind: ProfileKind) {
        if kind == self.requested {
            return;
        }
        match self.core.as_mut() {
            Some(core) => {
                if core.request_profile(kind.profile()).is_err() {
                    return;
                }
            }
            // nothing to splice, so nothing to wait for
            None => self.publish_profile(kind),
        }
        self.requested = kind;
    }

    fn publish_profile(&mut self, kind: ProfileKind) {
        if kind != self.published {
            self.published = kind;
            self.shared.telemetry.record_swap(kind);
        }
    }

    fn install_core(&mut self, core: Option<PitchShiftCore>) {
        if self.core.take().is_some() {
            self.shared.telemetry.remove_buffers(CORE_BUFFERS);
        }
        if let Some(core) = core.as_ref() {
            self.shared.telemetry.add_buffers(CORE_BUFFERS);
            if let Some(kind) = ProfileKind::of(core.active_profile()) {
                self.publish_profile(kind);
            }
        }
        self.core = core;
    }
}

impl Drop for Effect {
    fn drop(&mut self) {
        if self.state != EffectState::Released {
            let _ = self.release();
        }
    }
}
