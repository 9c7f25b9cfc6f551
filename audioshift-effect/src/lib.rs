//! AudioShift effect - host-facing wrapper around the pitch shifter
//!
//! This crate provides:
//! - Effect: lifecycle state machine driving one pitch-shift core
//! - Profile hot-swap between media and voice-call settings, triggered
//!   from the host's audio mode
//! - Control loop publishing telemetry to a key/value config store
//! - C ABI (`ffi`) for audio frameworks that load effects as shared libraries

mod config;
mod control;
mod descriptor;
mod error;
mod lifecycle;
mod mode;
mod selector;
mod shared;
pub mod ffi;

pub use config::{keys, parse_bool, ConfigSnapshot, ConfigStore, FileStore, MemoryStore, DEFAULT_LATENCY_THRESHOLD_MS};
pub use control::{ControlLoop, ControlMessage, TelemetryPublisher, DEFAULT_POLL_INTERVAL, DEFAULT_PUBLISH_INTERVAL};
pub use descriptor::{descriptor, EffectDescriptor, EffectUuid, DESCRIPTOR, IMPL_UUID, TYPE_UUID};
pub use error::{ConfigError, EffectError};
pub use lifecycle::{CommandReply, Effect, EffectCommand, EffectState, ProcessStatus, StreamConfig};
pub use mode::{AudioMode, ModeMonitor, ModeSource, SharedModeSignal};
pub use selector::ProfileSelector;
pub use shared::{EffectController, TelemetrySnapshot};
