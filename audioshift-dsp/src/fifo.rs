//! Fixed-capacity interleaved frame FIFO for the render path.

use crate::error::ProcessFault;

/// Interleaved multichannel FIFO with a fixed frame capacity.
///
/// Storage is allocated once in [`FrameFifo::new`]. Readable frames are
/// always contiguous so stretch stages can index into them directly; the
/// live region is compacted to the front when space runs out at the back.
#[derive(Debug, Clone)]
pub struct FrameFifo {
    data: Vec<f32>,
    channels: usize,
    capacity: usize,
    start: usize,
    end: usize,
}

impl FrameFifo {
    pub fn new(channels: usize, capacity_frames: usize) -> Self {
        let channels = channels.max(1);
        Self {
            data: vec![0.0; capacity_frames * channels],
            channels,
            capacity: capacity_frames,
            start: 0,
            end: 0,
        }
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Buffered frames
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames that can still be pushed
    #[inline]
    pub fn free(&self) -> usize {
        self.capacity - self.len()
    }

    /// Buffered samples, interleaved, oldest first
    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.data[self.start * self.channels..self.end * self.channels]
    }

    /// Append interleaved samples. Fails without side effects if the
    /// samples do not fit or are not a whole number of frames.
    pub fn push(&mut self, samples: &[f32]) -> Result<(), ProcessFault> {
        if samples.len() % self.channels != 0 {
            return Err(ProcessFault::BlockSizeMismatch);
        }
        let frames = samples.len() / self.channels;
        self.extend_zeroed(frames)?.copy_from_slice(samples);
        Ok(())
    }

    /// Append `frames` zeroed frames and return them for writing
    pub fn extend_zeroed(&mut self, frames: usize) -> Result<&mut [f32], ProcessFault> {
        self.make_room(frames)?;
        let from = self.end * self.channels;
        self.end += frames;
        let to = self.end * self.channels;
        let region = &mut self.data[from..to];
        region.fill(0.0);
        Ok(region)
    }

    /// Drop up to `frames` frames from the front
    pub fn consume(&mut self, frames: usize) {
        self.start += frames.min(self.len());
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    /// Move up to `out.len() / channels` frames into `out`, returning the
    /// number of frames written
    pub fn pop_into(&mut self, out: &mut [f32]) -> usize {
        let frames = (out.len() / self.channels).min(self.len());
        let n = frames * self.channels;
        out[..n].copy_from_slice(&self.samples()[..n]);
        self.consume(frames);
        frames
    }

    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    fn make_room(&mut self, frames: usize) -> Result<(), ProcessFault> {
        if self.end + frames <= self.capacity {
            return Ok(());
        }
        if self.len() + frames > self.capacity {
            return Err(ProcessFault::FifoOverflow);
        }
        let ch = self.channels;
        self.data.copy_within(self.start * ch..self.end * ch, 0);
        self.end -= self.start;
        self.start = 0;
        Ok(())
    }
}
