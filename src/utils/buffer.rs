//! Interleaved sample FIFOs and the push/pull contract shared by all processing stages.

// -------------------------------------------------------------------------------------------------

/// Push/pull contract of a FIFO-like sample pipe with interleaved `f32` samples.
///
/// All sizes are given in sample *frames* (one sample per channel), except for the slices,
/// which always contain interleaved samples and thus must be a multiple of the channel count
/// in length.
///
/// Processing stages implement this contract too: putting samples into a stage feeds its input
/// and runs all processing which is possible with the accumulated input, while all pulling
/// functions access the stage's processed output.
pub trait SamplePipe {
    /// Number of interleaved channels in the pipe.
    fn channel_count(&self) -> usize;

    /// Read-only access to all currently available frames in the pipe.
    fn samples(&self) -> &[f32];

    /// Append the given interleaved samples to the pipe.
    fn put_samples(&mut self, samples: &[f32]);

    /// Copy up to `output.len() / channel_count` frames into the given buffer and remove them
    /// from the pipe. Returns the number of frames that got copied.
    fn receive_samples(&mut self, output: &mut [f32]) -> usize;

    /// Remove up to `max_frames` frames from the front of the pipe without copying them.
    /// Returns the number of frames that got removed.
    fn discard_samples(&mut self, max_frames: usize) -> usize;

    /// Number of frames available in the pipe.
    fn len(&self) -> usize;

    /// Returns true when no frames are available.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all buffered frames.
    fn clear(&mut self);

    /// Shrink the number of available frames to `frames`, when there are more.
    /// Returns the number of available frames after truncating.
    fn truncate(&mut self, frames: usize) -> usize;

    /// Move all available frames of the `other` pipe into this one.
    /// Returns the number of frames that got moved.
    fn move_samples_from(&mut self, other: &mut dyn SamplePipe) -> usize {
        debug_assert_eq!(self.channel_count(), other.channel_count());
        let frames = other.len();
        if frames > 0 {
            self.put_samples(other.samples());
            other.discard_samples(frames)
        } else {
            0
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Interleaved FIFO sample buffer.
///
/// Storage only grows: consumed frames at the front are reclaimed by moving the remaining frames
/// to the front before the storage gets enlarged, so a buffer which is drained regularly won't
/// allocate once it reached its working size.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    buffer: Vec<f32>,
    channel_count: usize,
    read_pos: usize,
    frame_count: usize,
}

impl SampleBuffer {
    const INITIAL_CAPACITY: usize = 32;

    /// Create a new empty buffer for the given number of channels.
    pub fn new(channel_count: usize) -> Self {
        Self::with_capacity(channel_count, Self::INITIAL_CAPACITY)
    }

    /// Create a new empty buffer with room for at least `frames` frames.
    pub fn with_capacity(channel_count: usize, frames: usize) -> Self {
        debug_assert!(channel_count > 0, "Invalid channel count");
        let channel_count = channel_count.max(1);
        Self {
            buffer: vec![0.0; frames * channel_count],
            channel_count,
            read_pos: 0,
            frame_count: 0,
        }
    }

    /// Number of interleaved channels.
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Change the channel layout. Already buffered samples are kept and re-interpreted as
    /// frames of the new layout.
    pub fn set_channel_count(&mut self, channel_count: usize) {
        debug_assert!(channel_count > 0, "Invalid channel count");
        let channel_count = channel_count.max(1);
        if channel_count != self.channel_count {
            self.rewind();
            let used_samples = self.frame_count * self.channel_count;
            self.channel_count = channel_count;
            self.frame_count = used_samples / channel_count;
        }
    }

    /// Number of buffered frames.
    pub fn len(&self) -> usize {
        self.frame_count
    }

    /// Returns true when there are no buffered frames.
    pub fn is_empty(&self) -> bool {
        self.frame_count == 0
    }

    /// Number of frames the buffer can hold without growing.
    pub fn capacity(&self) -> usize {
        self.buffer.len() / self.channel_count
    }

    /// Interleaved view on all buffered frames.
    pub fn samples(&self) -> &[f32] {
        let start = self.read_pos * self.channel_count;
        &self.buffer[start..start + self.frame_count * self.channel_count]
    }

    /// Make sure that at least `frames` frames can be stored without reallocating.
    pub fn reserve(&mut self, frames: usize) {
        if frames > self.capacity() {
            self.rewind();
            let new_capacity = frames.max(2 * self.capacity());
            self.buffer.resize(new_capacity * self.channel_count, 0.0);
        } else if self.read_pos + frames > self.capacity() {
            self.rewind();
        }
    }

    /// Writable view on `frames` frames behind the last buffered frame. Write the new samples
    /// into the returned slice and then make them available via [`Self::commit_frames`].
    pub fn spare_frames_mut(&mut self, frames: usize) -> &mut [f32] {
        self.reserve(self.frame_count + frames);
        let start = (self.read_pos + self.frame_count) * self.channel_count;
        &mut self.buffer[start..start + frames * self.channel_count]
    }

    /// Make `frames` frames, which previously got written into [`Self::spare_frames_mut`],
    /// available in the FIFO.
    pub fn commit_frames(&mut self, frames: usize) {
        self.reserve(self.frame_count + frames);
        self.frame_count += frames;
    }

    /// Append the given interleaved samples.
    pub fn put_samples(&mut self, samples: &[f32]) {
        debug_assert!(
            samples.len() % self.channel_count == 0,
            "Sample count must be a multiple of the channel count"
        );
        let frames = samples.len() / self.channel_count;
        let sample_count = frames * self.channel_count;
        self.spare_frames_mut(frames)
            .copy_from_slice(&samples[..sample_count]);
        self.frame_count += frames;
    }

    /// Copy as many frames as possible into the given interleaved buffer and remove them.
    /// Returns the number of copied frames.
    pub fn receive_samples(&mut self, output: &mut [f32]) -> usize {
        let frames = (output.len() / self.channel_count).min(self.frame_count);
        let sample_count = frames * self.channel_count;
        output[..sample_count].copy_from_slice(&self.samples()[..sample_count]);
        self.discard_samples(frames)
    }

    /// Remove up to `max_frames` frames from the front. Returns the number of removed frames.
    pub fn discard_samples(&mut self, max_frames: usize) -> usize {
        if max_frames >= self.frame_count {
            let removed = self.frame_count;
            self.frame_count = 0;
            self.read_pos = 0;
            removed
        } else {
            self.frame_count -= max_frames;
            self.read_pos += max_frames;
            max_frames
        }
    }

    /// Drop all frames behind `frames`. Returns the number of buffered frames.
    pub fn truncate(&mut self, frames: usize) -> usize {
        self.frame_count = self.frame_count.min(frames);
        self.frame_count
    }

    /// Remove all buffered frames.
    pub fn clear(&mut self) {
        self.frame_count = 0;
        self.read_pos = 0;
    }

    /// Move all buffered frames to the front of the storage.
    fn rewind(&mut self) {
        if self.read_pos > 0 {
            let start = self.read_pos * self.channel_count;
            let end = start + self.frame_count * self.channel_count;
            self.buffer.copy_within(start..end, 0);
            self.read_pos = 0;
        }
    }
}

impl SamplePipe for SampleBuffer {
    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn samples(&self) -> &[f32] {
        SampleBuffer::samples(self)
    }

    fn put_samples(&mut self, samples: &[f32]) {
        SampleBuffer::put_samples(self, samples)
    }

    fn receive_samples(&mut self, output: &mut [f32]) -> usize {
        SampleBuffer::receive_samples(self, output)
    }

    fn discard_samples(&mut self, max_frames: usize) -> usize {
        SampleBuffer::discard_samples(self, max_frames)
    }

    fn len(&self) -> usize {
        self.frame_count
    }

    fn clear(&mut self) {
        SampleBuffer::clear(self)
    }

    fn truncate(&mut self, frames: usize) -> usize {
        SampleBuffer::truncate(self, frames)
    }
}

// -------------------------------------------------------------------------------------------------
