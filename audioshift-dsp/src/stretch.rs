//! WSOLA time stretching for the streaming pitch shifter.
//!
//! The kernel consumes input at `tempo` times the rate it produces output.
//! Every splice emits one hop (`sequence - overlap` frames):
//! - the continuation saved by the previous splice is cross-faded into the
//!   best-matching segment found inside the seek window
//! - the rest of the hop is copied verbatim
//! - the frames that naturally follow the hop are saved as the next
//!   continuation
//!
//! Similarity is a normalized cross-correlation over a channel-summed mix,
//! searched coarsely first and then refined around the best coarse hit.
//!
//! Each profile needs a different amount of buffered audio. Once output is
//! flowing, a profile change moves the delay by stretching or compressing
//! a bounded share of each hop, so the swap itself never starves the output.

use crate::error::{DspError, ProcessFault};
use crate::fifo::FrameFifo;
use crate::profile::{PitchProfile, ProfileKind, StretchGeometry};

/// Avoids division by near-zero energy in the similarity measure
const ENERGY_EPSILON: f64 = 1e-9;

/// Largest share of a hop one splice may stretch or compress while the
/// delay converges on a new profile
const MAX_DRIFT: f64 = 0.25;

/// A stage that changes duration without changing pitch.
///
/// [`crate::PitchShiftCore`] is generic over this trait so tests can swap
/// in stages with known behaviour.
pub trait StretchStage: Send {
    /// Stretch as much of `input` as possible into `output`, returning the
    /// number of frames appended. Unused input stays in the FIFO.
    fn process(&mut self, input: &mut FrameFifo, output: &mut FrameFifo) -> Result<usize, ProcessFault>;

    /// Queue a profile change. It takes effect at a splice boundary once
    /// enough history is buffered for a click-free transition.
    fn request_profile(&mut self, profile: PitchProfile) -> Result<(), DspError>;

    /// Drop all buffered history
    fn reset(&mut self);

    /// Profile used by the most recent splice
    fn active_profile(&self) -> PitchProfile;

    /// Largest input backlog the stage can hold between calls
    fn max_backlog(&self) -> usize;

    /// Largest number of frames appended by a single splice
    fn max_burst(&self) -> usize;

    /// Input backlog held under the profile the stage is converging on
    fn backlog(&self) -> usize {
        self.max_backlog()
    }

    /// Splice granularity of the profile the stage is converging on
    fn burst(&self) -> usize {
        self.max_burst()
    }

    /// Output has started. Later profile changes move the delay relative
    /// to the buffering at this point.
    fn anchor_latency(&mut self) {}
}

/// Buffer bounds covering every profile a kernel may switch to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StretchLimits {
    pub max_sequence: usize,
    pub max_seek: usize,
    pub max_overlap: usize,
    pub max_requirement: usize,
}

/// Streaming WSOLA kernel.
///
/// All scratch space is sized at construction from the envelope of
/// profiles, so `process` and profile swaps never allocate.
pub struct TimeStretchKernel {
    sample_rate: u32,
    channels: usize,
    tempo: f64,
    profile: PitchProfile,
    geometry: StretchGeometry,
    pending: Option<(PitchProfile, StretchGeometry)>,
    limits: StretchLimits,
    /// Continuation of the last emitted splice, `max_overlap` frames
    mid: Vec<f32>,
    primed: bool,
    skip_fract: f64,
    /// Cross-fade length for the first splice after a profile swap
    transition: Option<usize>,
    coarse_stride: usize,
    ref_mono: Vec<f32>,
    cand_mono: Vec<f32>,
    swaps: u64,
    /// Delay target when output started, in output frames
    anchor: Option<f64>,
    /// Output frames added (or removed, if negative) by drifting splices
    drift: f64,
}

impl TimeStretchKernel {
    /// Build a kernel that can switch between `initial` and the canonical
    /// profiles.
    pub fn new(sample_rate: u32, channels: usize, tempo: f64, initial: PitchProfile) -> Result<Self, DspError> {
        let canonical = ProfileKind::ALL.map(ProfileKind::profile);
        Self::with_envelope(sample_rate, channels, tempo, initial, &canonical)
    }

    /// Build a kernel sized for `initial` plus every profile in `envelope`
    pub fn with_envelope(
        sample_rate: u32,
        channels: usize,
        tempo: f64,
        initial: PitchProfile,
        envelope: &[PitchProfile],
    ) -> Result<Self, DspError> {
        if !tempo.is_finite() {
            return Err(DspError::NonFinite("tempo"));
        }
        if !(0.5..=2.0).contains(&tempo) {
            return Err(DspError::UnsupportedRatio(1.0 / tempo));
        }
        if channels == 0 {
            return Err(DspError::UnsupportedChannels(channels));
        }

        let geometry = initial.geometry(sample_rate)?;
        let mut max_sequence = geometry.sequence;
        let mut max_seek = geometry.seek;
        let mut max_overlap = geometry.overlap;
        let mut resolved = Vec::with_capacity(envelope.len());
        for profile in envelope {
            let g = profile.geometry(sample_rate)?;
            max_sequence = max_sequence.max(g.sequence);
            max_seek = max_seek.max(g.seek);
            max_overlap = max_overlap.max(g.overlap);
            resolved.push(g);
        }
        let max_requirement = resolved
            .iter()
            .chain(std::iter::once(&geometry))
            .map(|g| requirement(g, max_overlap, tempo))
            .max()
            .unwrap_or(0);

        Ok(Self {
            sample_rate,
            channels,
            tempo,
            profile: initial,
            geometry,
            pending: None,
            limits: StretchLimits {
                max_sequence,
                max_seek,
                max_overlap,
                max_requirement,
            },
            mid: vec![0.0; max_overlap * channels],
            primed: false,
            skip_fract: 0.0,
            transition: None,
            coarse_stride: (sample_rate / 12_000).max(1) as usize,
            ref_mono: vec![0.0; max_overlap],
            cand_mono: vec![0.0; max_seek + max_overlap],
            swaps: 0,
            anchor: None,
            drift: 0.0,
        })
    }

    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    pub fn limits(&self) -> StretchLimits {
        self.limits
    }

    pub fn geometry(&self) -> StretchGeometry {
        self.geometry
    }

    /// Input frames needed before the next splice can run
    pub fn requirement(&self) -> usize {
        requirement(&self.geometry, self.limits.max_overlap, self.tempo)
    }

    /// Profile swaps applied since construction
    pub fn swaps_applied(&self) -> u64 {
        self.swaps
    }

    pub fn has_pending_profile(&self) -> bool {
        self.pending.is_some()
    }

    /// Output frames still to be added (positive) or removed (negative)
    /// before the delay matches the profile being converged on. Zero until
    /// the latency is anchored.
    pub fn delay_error(&self) -> f64 {
        match self.anchor {
            Some(base) => self.delay_target(&self.goal()) - base - self.drift,
            None => 0.0,
        }
    }

    fn goal(&self) -> StretchGeometry {
        self.pending.map_or(self.geometry, |(_, g)| g)
    }

    /// Buffered output frames a profile needs: its input backlog at the
    /// output rate plus one sequence of splice granularity
    fn delay_target(&self, geometry: &StretchGeometry) -> f64 {
        requirement(geometry, self.limits.max_overlap, self.tempo) as f64 / self.tempo + geometry.sequence as f64
    }

    fn apply_pending(&mut self) {
        let Some((profile, geometry)) = self.pending.take() else {
            return;
        };
        if self.primed {
            let fade = self.geometry.overlap.max(geometry.overlap).min(geometry.hop());
            self.transition = Some(fade);
        }
        self.profile = profile;
        self.geometry = geometry;
        self.swaps += 1;
    }

    fn splice(&mut self, input: &mut FrameFifo, output: &mut FrameFifo) -> Result<(), ProcessFault> {
        let ch = self.channels;
        let hop = self.geometry.hop();
        let fade = self.transition.unwrap_or(self.geometry.overlap).min(hop);
        let offset = if self.primed {
            self.best_offset(input.samples(), fade)
        } else {
            0
        };

        let src = input.samples();
        let dst = output.extend_zeroed(hop)?;
        self.transition = None;

        let step = 1.0 / fade as f32;
        for i in 0..fade {
            let w = i as f32 * step;
            let base = i * ch;
            let from = (offset + i) * ch;
            for c in 0..ch {
                dst[base + c] = self.mid[base + c] * (1.0 - w) + src[from + c] * w;
            }
        }
        dst[fade * ch..].copy_from_slice(&src[(offset + fade) * ch..(offset + hop) * ch]);

        let tail = (offset + hop) * ch;
        let keep = self.limits.max_overlap * ch;
        self.mid.copy_from_slice(&src[tail..tail + keep]);
        self.primed = true;

        // positive drift skips less input, stretching this hop
        let error = self.delay_error();
        let limit = MAX_DRIFT * hop as f64;
        let drift = if error.abs() >= 1.0 { error.clamp(-limit, limit) } else { 0.0 };
        self.drift += drift;

        self.skip_fract += self.tempo * (hop as f64 - drift);
        let skip = self.skip_fract.floor();
        self.skip_fract -= skip;
        input.consume(skip as usize);
        Ok(())
    }

    fn best_offset(&mut self, src: &[f32], fade: usize) -> usize {
        let ch = self.channels;
        let seek = self.geometry.seek;
        let span = seek + fade;

        for (i, r) in self.ref_mono[..fade].iter_mut().enumerate() {
            *r = self.mid[i * ch..(i + 1) * ch].iter().sum();
        }
        for (i, m) in self.cand_mono[..span].iter_mut().enumerate() {
            *m = src[i * ch..(i + 1) * ch].iter().sum();
        }

        let reference = &self.ref_mono[..fade];
        let candidates = &self.cand_mono[..span];
        let score = |offset: usize| similarity(reference, &candidates[offset..offset + fade]);

        let stride = self.coarse_stride;
        let mut best = 0;
        let mut best_score = f64::NEG_INFINITY;
        for offset in (0..seek).step_by(stride) {
            let s = score(offset);
            if s > best_score {
                best_score = s;
                best = offset;
            }
        }

        if stride > 1 {
            let lo = best.saturating_sub(stride - 1);
            let hi = (best + stride).min(seek);
            for offset in lo..hi {
                let s = score(offset);
                if s > best_score {
                    best_score = s;
                    best = offset;
                }
            }
        }
        best
    }
}

impl StretchStage for TimeStretchKernel {
    fn process(&mut self, input: &mut FrameFifo, output: &mut FrameFifo) -> Result<usize, ProcessFault> {
        let mut produced = 0;
        loop {
            if let Some((_, next)) = self.pending {
                // a larger profile first grows the delay under the old windows
                if self.delay_error() < 1.0 {
                    let needed = requirement(&next, self.limits.max_overlap, self.tempo);
                    if self.primed && input.len() < needed {
                        // wait for enough history under the new windows
                        break;
                    }
                    self.apply_pending();
                }
            }
            if input.len() < self.requirement() {
                break;
            }
            self.splice(input, output)?;
            produced += self.geometry.hop();
        }
        Ok(produced)
    }

    fn request_profile(&mut self, profile: PitchProfile) -> Result<(), DspError> {
        let geometry = profile.geometry(self.sample_rate)?;
        if geometry.sequence > self.limits.max_sequence
            || geometry.seek > self.limits.max_seek
            || geometry.overlap > self.limits.max_overlap
        {
            return Err(DspError::ProfileTooLarge(profile.label));
        }
        if profile == self.profile {
            self.pending = None;
        } else {
            self.pending = Some((profile, geometry));
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.mid.fill(0.0);
        self.primed = false;
        self.skip_fract = 0.0;
        self.transition = None;
        self.anchor = None;
        self.drift = 0.0;
        self.apply_pending();
    }

    fn active_profile(&self) -> PitchProfile {
        self.profile
    }

    fn max_backlog(&self) -> usize {
        self.limits.max_requirement
    }

    fn max_burst(&self) -> usize {
        self.limits.max_sequence
    }

    fn backlog(&self) -> usize {
        requirement(&self.goal(), self.limits.max_overlap, self.tempo)
    }

    fn burst(&self) -> usize {
        self.goal().sequence
    }

    fn anchor_latency(&mut self) {
        self.anchor = Some(self.delay_target(&self.goal()));
        self.drift = 0.0;
    }
}

/// Input frames one splice may touch: the whole seek window, one hop and
/// the saved continuation, or the largest drifting skip if that is larger
fn requirement(geometry: &StretchGeometry, max_overlap: usize, tempo: f64) -> usize {
    let touched = geometry.seek + geometry.hop() + max_overlap;
    let skipped = (tempo * geometry.hop() as f64 * (1.0 + MAX_DRIFT)).ceil() as usize + 1;
    touched.max(skipped)
}

#[inline]
fn similarity(reference: &[f32], candidate: &[f32]) -> f64 {
    let mut corr = 0.0f64;
    let mut energy = 0.0f64;
    for (&r, &x) in reference.iter().zip(candidate) {
        corr += r as f64 * x as f64;
        energy += x as f64 * x as f64;
    }
    corr / (energy + ENERGY_EPSILON).sqrt()
}
