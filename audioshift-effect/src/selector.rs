//! Single-slot, lock-free handoff of the requested profile.
//!
//! The control thread publishes with Release; the render thread takes the
//! slot with Acquire at the top of `process`. Later requests overwrite
//! earlier ones, so only the latest request is ever applied.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use audioshift_dsp::{PitchProfile, ProfileKind};

const EMPTY: u8 = 0;

#[derive(Debug, Clone, Default)]
pub struct ProfileSelector {
    slot: Arc<AtomicU8>,
}

impl ProfileSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn media() -> PitchProfile {
        PitchProfile::MEDIA
    }

    pub fn voice_call() -> PitchProfile {
        PitchProfile::VOICE_CALL
    }

    /// Publish a profile request; overwrites any request not yet taken
    pub fn request(&self, kind: ProfileKind) {
        self.slot.store(kind.code(), Ordering::Release);
    }

    /// Take the pending request, leaving the slot empty
    pub fn take(&self) -> Option<ProfileKind> {
        ProfileKind::from_code(self.slot.swap(EMPTY, Ordering::AcqRel))
    }

    /// Peek at the pending request without consuming it
    pub fn pending(&self) -> Option<ProfileKind> {
        ProfileKind::from_code(self.slot.load(Ordering::Acquire))
    }
}
