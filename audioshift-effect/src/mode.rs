//! Platform audio-mode tracking with debounce.
//!
//! [`ModeMonitor`] runs on the control thread. A mode change is committed
//! only after it has been observed continuously for at least one buffer
//! period; shorter flickers never reach the render path.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use audioshift_dsp::ProfileKind;
use tracing::{debug, info};

use crate::selector::ProfileSelector;

/// Platform audio mode, numbered as the host framework numbers them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum AudioMode {
    #[default]
    Normal = 0,
    Ringtone = 1,
    InCall = 2,
    InCommunication = 3,
}

impl AudioMode {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(AudioMode::Normal),
            1 => Some(AudioMode::Ringtone),
            2 => Some(AudioMode::InCall),
            3 => Some(AudioMode::InCommunication),
            _ => None,
        }
    }

    /// Telephony and VoIP favour latency; everything else favours quality
    pub fn profile(self) -> ProfileKind {
        match self {
            AudioMode::InCall | AudioMode::InCommunication => ProfileKind::VoiceCall,
            AudioMode::Normal | AudioMode::Ringtone => ProfileKind::Media,
        }
    }
}

/// Source of the current platform audio mode
pub trait ModeSource: Send {
    fn observe(&self) -> AudioMode;
}

/// Mode cell written by the host (or a test) and read by the monitor
#[derive(Debug, Clone, Default)]
pub struct SharedModeSignal {
    mode: Arc<AtomicU8>,
}

impl SharedModeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, mode: AudioMode) {
        self.mode.store(mode as u8, Ordering::Release);
    }

    pub fn get(&self) -> AudioMode {
        AudioMode::from_raw(self.mode.load(Ordering::Acquire) as i32).unwrap_or_default()
    }
}

impl ModeSource for SharedModeSignal {
    fn observe(&self) -> AudioMode {
        self.get()
    }
}

/// Debounces mode changes and forwards profile requests to the selector
pub struct ModeMonitor<S: ModeSource> {
    source: S,
    selector: ProfileSelector,
    min_hold: Duration,
    committed: AudioMode,
    candidate: Option<(AudioMode, Instant)>,
    requests: u64,
}

impl<S: ModeSource> ModeMonitor<S> {
    /// `min_hold` is the shortest time a new mode must persist, normally
    /// one buffer period
    pub fn new(source: S, selector: ProfileSelector, min_hold: Duration) -> Self {
        Self {
            source,
            selector,
            min_hold,
            committed: AudioMode::Normal,
            candidate: None,
            requests: 0,
        }
    }

    pub fn set_min_hold(&mut self, min_hold: Duration) {
        self.min_hold = min_hold;
    }

    pub fn min_hold(&self) -> Duration {
        self.min_hold
    }

    pub fn committed(&self) -> AudioMode {
        self.committed
    }

    /// Profile requests published so far
    pub fn requests(&self) -> u64 {
        self.requests
    }

    pub fn poll(&mut self) -> Option<ProfileKind> {
        self.poll_at(Instant::now())
    }

    /// Observe the source once. Returns the profile requested, if any.
    pub fn poll_at(&mut self, now: Instant) -> Option<ProfileKind> {
        let observed = self.source.observe();
        if observed == self.committed {
            if let Some((flicker, _)) = self.candidate.take() {
                debug!("Ignoring {:?} flicker shorter than {:?}", flicker, self.min_hold);
            }
            return None;
        }

        match self.candidate {
            Some((mode, since)) if mode == observed => {
                if now.saturating_duration_since(since) >= self.min_hold {
                    self.commit(observed)
                } else {
                    None
                }
            }
            _ => {
                self.candidate = Some((observed, now));
                None
            }
        }
    }

    fn commit(&mut self, mode: AudioMode) -> Option<ProfileKind> {
        let previous = self.committed;
        self.committed = mode;
        self.candidate = None;

        let target = mode.profile();
        if target == previous.profile() {
            debug!("Audio mode {:?} -> {:?}, profile unchanged", previous, mode);
            return None;
        }
        info!(
            "Audio mode {:?} -> {:?}, requesting {} profile",
            previous,
            mode,
            target.label()
        );
        self.selector.request(target);
        self.requests += 1;
        Some(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOLD: Duration = Duration::from_millis(10);

    fn monitor() -> (SharedModeSignal, ProfileSelector, ModeMonitor<SharedModeSignal>) {
        let signal = SharedModeSignal::new();
        let selector = ProfileSelector::new();
        let monitor = ModeMonitor::new(signal.clone(), selector.clone(), HOLD);
        (signal, selector, monitor)
    }

    #[test]
    fn test_mode_mapping() {
        assert_eq!(AudioMode::Normal.profile(), ProfileKind::Media);
        assert_eq!(AudioMode::Ringtone.profile(), ProfileKind::Media);
        assert_eq!(AudioMode::InCall.profile(), ProfileKind::VoiceCall);
        assert_eq!(AudioMode::InCommunication.profile(), ProfileKind::VoiceCall);
        assert_eq!(AudioMode::from_raw(2), Some(AudioMode::InCall));
        assert_eq!(AudioMode::from_raw(-1), None);
        assert_eq!(AudioMode::from_raw(7), None);
    }

    #[test]
    fn test_sustained_change_requests_voice() {
        let (signal, selector, mut monitor) = monitor();
        let t0 = Instant::now();
        signal.set(AudioMode::InCall);

        assert_eq!(monitor.poll_at(t0), None);
        assert_eq!(monitor.poll_at(t0 + Duration::from_millis(5)), None);
        assert_eq!(
            monitor.poll_at(t0 + Duration::from_millis(12)),
            Some(ProfileKind::VoiceCall)
        );
        assert_eq!(selector.take(), Some(ProfileKind::VoiceCall));
        assert_eq!(monitor.committed(), AudioMode::InCall);
        assert_eq!(monitor.requests(), 1);

        // steady state does not re-request
        assert_eq!(monitor.poll_at(t0 + Duration::from_millis(50)), None);
        assert_eq!(selector.take(), None);
    }

    #[test]
    fn test_flicker_shorter_than_hold_is_ignored() {
        let (signal, selector, mut monitor) = monitor();
        let t0 = Instant::now();

        for i in 0..20u64 {
            let base = t0 + Duration::from_millis(i * 6);
            signal.set(AudioMode::InCall);
            monitor.poll_at(base);
            monitor.poll_at(base + Duration::from_millis(3));
            signal.set(AudioMode::Normal);
            monitor.poll_at(base + Duration::from_millis(4));
        }
        assert_eq!(monitor.requests(), 0);
        assert_eq!(selector.take(), None);
        assert_eq!(monitor.committed(), AudioMode::Normal);
    }

    #[test]
    fn test_switch_between_voice_modes_keeps_profile() {
        let (signal, selector, mut monitor) = monitor();
        let t0 = Instant::now();
        signal.set(AudioMode::InCall);
        monitor.poll_at(t0);
        monitor.poll_at(t0 + HOLD);
        assert_eq!(selector.take(), Some(ProfileKind::VoiceCall));

        signal.set(AudioMode::InCommunication);
        monitor.poll_at(t0 + Duration::from_millis(20));
        assert_eq!(monitor.poll_at(t0 + Duration::from_millis(40)), None);
        assert_eq!(monitor.committed(), AudioMode::InCommunication);
        assert_eq!(selector.take(), None);
        assert_eq!(monitor.requests(), 1);
    }

    #[test]
    fn test_call_end_returns_to_media() {
        let (signal, selector, mut monitor) = monitor();
        let t0 = Instant::now();
        signal.set(AudioMode::InCall);
        monitor.poll_at(t0);
        monitor.poll_at(t0 + HOLD);
        signal.set(AudioMode::Normal);
        monitor.poll_at(t0 + Duration::from_millis(30));
        assert_eq!(
            monitor.poll_at(t0 + Duration::from_millis(45)),
            Some(ProfileKind::Media)
        );
        assert_eq!(selector.take(), Some(ProfileKind::Media));
        assert_eq!(monitor.requests(), 2);
    }
}
