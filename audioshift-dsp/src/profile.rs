//! Time-stretch tuning profiles.
//!
//! A [`PitchProfile`] holds the WSOLA window lengths in milliseconds.
//! Two canonical profiles exist: [`PitchProfile::MEDIA`] favours quality
//! with long windows, [`PitchProfile::VOICE_CALL`] favours latency.

use crate::error::DspError;

/// WSOLA window lengths, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchProfile {
    /// Length of one processing sequence
    pub sequence_ms: f32,
    /// Width of the similarity search window
    pub seek_window_ms: f32,
    /// Cross-fade length between consecutive sequences
    pub overlap_ms: f32,
    pub label: &'static str,
}

/// A [`PitchProfile`] resolved to frame counts at a given sample rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StretchGeometry {
    pub sequence: usize,
    pub seek: usize,
    pub overlap: usize,
}

impl StretchGeometry {
    /// Frames emitted by one splice
    #[inline]
    pub fn hop(&self) -> usize {
        self.sequence - self.overlap
    }
}

/// Shortest overlap, in frames, that still gives a usable cross-fade
const MIN_OVERLAP_FRAMES: usize = 8;

impl PitchProfile {
    pub const MEDIA: PitchProfile = PitchProfile::new(40.0, 15.0, 8.0, "media");
    pub const VOICE_CALL: PitchProfile = PitchProfile::new(20.0, 8.0, 4.0, "voice_call");

    pub const fn new(sequence_ms: f32, seek_window_ms: f32, overlap_ms: f32, label: &'static str) -> Self {
        Self {
            sequence_ms,
            seek_window_ms,
            overlap_ms,
            label,
        }
    }

    /// Check that all lengths are finite and positive, that
    /// `overlap < seek_window < sequence`, and that the overlap fits inside
    /// the sequence twice (one fade in, one fade out).
    pub fn validate(&self) -> Result<(), DspError> {
        let fields = [self.sequence_ms, self.seek_window_ms, self.overlap_ms];
        if fields.iter().any(|v| !v.is_finite()) {
            return Err(self.invalid("non-finite window length"));
        }
        if fields.iter().any(|&v| v <= 0.0) {
            return Err(self.invalid("window lengths must be positive"));
        }
        if self.overlap_ms >= self.seek_window_ms {
            return Err(self.invalid("overlap must be shorter than the seek window"));
        }
        if self.seek_window_ms >= self.sequence_ms {
            return Err(self.invalid("seek window must be shorter than the sequence"));
        }
        if self.overlap_ms * 2.0 >= self.sequence_ms {
            return Err(self.invalid("overlap must be shorter than half the sequence"));
        }
        Ok(())
    }

    /// Resolve the profile to frame counts at `sample_rate`
    pub fn geometry(&self, sample_rate: u32) -> Result<StretchGeometry, DspError> {
        self.validate()?;
        let frames = |ms: f32| ((ms as f64) * sample_rate as f64 / 1000.0).round() as usize;
        let geometry = StretchGeometry {
            sequence: frames(self.sequence_ms),
            seek: frames(self.seek_window_ms).max(1),
            overlap: frames(self.overlap_ms),
        };
        if geometry.overlap < MIN_OVERLAP_FRAMES {
            return Err(self.invalid("overlap too short at this sample rate"));
        }
        if geometry.overlap >= geometry.seek || geometry.seek >= geometry.sequence {
            return Err(self.invalid("window lengths collapse at this sample rate"));
        }
        if geometry.overlap * 2 >= geometry.sequence {
            return Err(self.invalid("overlap must be shorter than half the sequence"));
        }
        Ok(geometry)
    }

    fn invalid(&self, reason: &'static str) -> DspError {
        DspError::InvalidProfile {
            label: self.label,
            reason,
        }
    }
}

impl Default for PitchProfile {
    fn default() -> Self {
        Self::MEDIA
    }
}

/// Identifies one of the canonical profiles.
///
/// Small enough to travel through an atomic byte between threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProfileKind {
    #[default]
    Media,
    VoiceCall,
}

impl ProfileKind {
    pub const ALL: [ProfileKind; 2] = [ProfileKind::Media, ProfileKind::VoiceCall];

    pub fn profile(self) -> PitchProfile {
        match self {
            ProfileKind::Media => PitchProfile::MEDIA,
            ProfileKind::VoiceCall => PitchProfile::VOICE_CALL,
        }
    }

    /// Non-zero wire code (zero is reserved for "nothing pending")
    pub fn code(self) -> u8 {
        match self {
            ProfileKind::Media => 1,
            ProfileKind::VoiceCall => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ProfileKind::Media),
            2 => Some(ProfileKind::VoiceCall),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        self.profile().label
    }

    /// Canonical kind whose settings match `profile`
    pub fn of(profile: PitchProfile) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.profile() == profile)
    }
}
