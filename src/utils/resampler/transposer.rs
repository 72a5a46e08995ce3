use super::{linear::RateTransposer, AudioResampler, ResamplingSpecs};

use crate::{
    utils::{
        buffer::{SampleBuffer, SamplePipe},
        filter::antialias::AntiAliasFilter,
    },
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Band-limited rate transposing stage with FIFO input and output buffers.
///
/// Combines a [`RateTransposer`] with an [`AntiAliasFilter`]: when downsampling (rate > 1), the
/// input gets low-pass filtered at the new nyquist limit before transposing. When upsampling
/// (rate < 1) the transposed signal gets filtered afterwards to remove imaging. A rate of
/// exactly 1 bypasses both.
pub struct AntiAliasedResampler {
    transposer: RateTransposer,
    aa_filter: AntiAliasFilter,
    use_aa_filter: bool,
    channel_count: usize,
    store_buffer: SampleBuffer,
    temp_buffer: SampleBuffer,
    output_buffer: SampleBuffer,
}

impl AntiAliasedResampler {
    /// Create a new resampler which converts from the given specs' input rate to their output rate.
    pub fn new(specs: ResamplingSpecs) -> Result<Self, Error> {
        if specs.input_rate() == 0 || specs.output_rate() == 0 {
            return Err(Error::ParameterError(format!(
                "Invalid resampling rates: {} -> {}",
                specs.input_rate(),
                specs.output_rate()
            )));
        }
        Self::with_rate(specs.input_ratio(), specs.channel_count())
    }

    /// Create a new resampler with the given transposing rate (input frames per output frame).
    pub fn with_rate(rate: f64, channel_count: usize) -> Result<Self, Error> {
        if channel_count == 0 {
            return Err(Error::ParameterError(
                "Invalid channel count: must be > 0".to_string(),
            ));
        }
        let mut resampler = Self {
            transposer: RateTransposer::default(),
            aa_filter: AntiAliasFilter::new(AntiAliasFilter::DEFAULT_LENGTH)?,
            use_aa_filter: true,
            channel_count,
            store_buffer: SampleBuffer::new(channel_count),
            temp_buffer: SampleBuffer::new(channel_count),
            output_buffer: SampleBuffer::new(channel_count),
        };
        resampler.set_rate(rate)?;
        Ok(resampler)
    }

    /// Transposing rate: input frames consumed per output frame.
    pub fn rate(&self) -> f64 {
        self.transposer.rate()
    }
    /// Set a new transposing rate and adjust the anti-alias filter's cutoff accordingly.
    pub fn set_rate(&mut self, rate: f64) -> Result<(), Error> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(Error::ParameterError(format!(
                "Invalid transposer rate: must be > 0, but is {rate}"
            )));
        }
        let cutoff = if rate > 1.0 { 0.5 / rate } else { 0.5 * rate };
        self.aa_filter.set_cutoff(cutoff)?;
        self.transposer.set_rate(rate)
    }

    /// Number of interleaved channels.
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }
    /// Change the channel layout. Already buffered samples get re-interpreted.
    pub fn set_channel_count(&mut self, channel_count: usize) -> Result<(), Error> {
        if channel_count == 0 {
            return Err(Error::ParameterError(
                "Invalid channel count: must be > 0".to_string(),
            ));
        }
        if self.channel_count != channel_count {
            self.channel_count = channel_count;
            self.store_buffer.set_channel_count(channel_count);
            self.temp_buffer.set_channel_count(channel_count);
            self.output_buffer.set_channel_count(channel_count);
        }
        Ok(())
    }

    /// Returns true when the anti-alias filter is applied.
    pub fn is_aa_filter_enabled(&self) -> bool {
        self.use_aa_filter
    }
    /// Enable or disable the anti-alias filter.
    ///
    /// Frames which the filter chain already partially processed get finished without the
    /// filter's remaining history, so the stream stays complete but may not be fully filtered
    /// at the switching point.
    pub fn enable_aa_filter(&mut self, enable: bool) {
        if self.use_aa_filter != enable {
            if self.transposer.rate() > 1.0 {
                // already filtered, but not yet transposed
                transpose_buffers(
                    &mut self.transposer,
                    &mut self.output_buffer,
                    &mut self.temp_buffer,
                );
                // unconsumed filtered frames precede the pending input
                self.temp_buffer.move_samples_from(&mut self.store_buffer);
                std::mem::swap(&mut self.temp_buffer, &mut self.store_buffer);
            } else {
                // already transposed, but not yet filtered
                self.output_buffer.move_samples_from(&mut self.temp_buffer);
            }
            self.use_aa_filter = enable;
        }
    }

    /// Anti-alias filter length in taps.
    pub fn aa_filter_length(&self) -> usize {
        self.aa_filter.len()
    }
    /// Set a new anti-alias filter length. Must be a multiple of 8.
    pub fn set_aa_filter_length(&mut self, length: usize) -> Result<(), Error> {
        self.aa_filter.set_length(length)
    }

    /// Access to the anti-alias filter.
    pub fn aa_filter(&self) -> &AntiAliasFilter {
        &self.aa_filter
    }

    /// Number of input frames which were not yet turned into output frames.
    pub fn num_unprocessed_samples(&self) -> usize {
        let rate = self.transposer.rate();
        let temp_frames = if rate < 1.0 {
            // already transposed, but not yet filtered
            (self.temp_buffer.len() as f64 * rate).round() as usize
        } else {
            self.temp_buffer.len()
        };
        self.store_buffer.len() + temp_frames
    }

    /// Drop all pending input, but keep already processed output.
    pub fn clear_input(&mut self) {
        self.store_buffer.clear();
        self.temp_buffer.clear();
        self.transposer.reset();
    }

    fn process_samples(&mut self) {
        if self.store_buffer.is_empty() {
            return;
        }
        let rate = self.transposer.rate();
        if rate == 1.0 {
            self.output_buffer.move_samples_from(&mut self.temp_buffer);
            self.output_buffer.move_samples_from(&mut self.store_buffer);
        } else if !self.use_aa_filter {
            transpose_buffers(
                &mut self.transposer,
                &mut self.output_buffer,
                &mut self.store_buffer,
            );
        } else if rate < 1.0 {
            // upsample, then remove images above the source's nyquist
            transpose_buffers(
                &mut self.transposer,
                &mut self.temp_buffer,
                &mut self.store_buffer,
            );
            self.aa_filter
                .evaluate_buffers(&mut self.output_buffer, &mut self.temp_buffer);
        } else {
            // remove content above the target's nyquist, then downsample
            self.aa_filter
                .evaluate_buffers(&mut self.temp_buffer, &mut self.store_buffer);
            transpose_buffers(
                &mut self.transposer,
                &mut self.output_buffer,
                &mut self.temp_buffer,
            );
        }
    }
}

impl SamplePipe for AntiAliasedResampler {
    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn samples(&self) -> &[f32] {
        self.output_buffer.samples()
    }

    fn put_samples(&mut self, samples: &[f32]) {
        self.store_buffer.put_samples(samples);
        self.process_samples();
    }

    fn receive_samples(&mut self, output: &mut [f32]) -> usize {
        self.output_buffer.receive_samples(output)
    }

    fn discard_samples(&mut self, max_frames: usize) -> usize {
        self.output_buffer.discard_samples(max_frames)
    }

    fn len(&self) -> usize {
        self.output_buffer.len()
    }

    fn clear(&mut self) {
        self.output_buffer.clear();
        self.clear_input();
    }

    fn truncate(&mut self, frames: usize) -> usize {
        self.output_buffer.truncate(frames)
    }
}

impl AudioResampler for AntiAliasedResampler {
    fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<(usize, usize), Error> {
        self.put_samples(input);
        let output_written = self.receive_samples(output) * self.channel_count;
        Ok((input.len(), output_written))
    }

    fn reset(&mut self) {
        SamplePipe::clear(self);
    }
}

// -------------------------------------------------------------------------------------------------

/// Transpose all frames of `src` into `dest`, removing the consumed frames from `src`.
fn transpose_buffers(
    transposer: &mut RateTransposer,
    dest: &mut SampleBuffer,
    src: &mut SampleBuffer,
) -> usize {
    let channel_count = src.channel_count();
    let src_frames = src.len();
    let max_output_frames = (src_frames as f64 / transposer.rate()).ceil() as usize + 2;
    let (consumed, produced) = transposer.transpose(
        src.samples(),
        dest.spare_frames_mut(max_output_frames),
        channel_count,
    );
    dest.commit_frames(produced);
    src.discard_samples(consumed);
    produced
}

// -------------------------------------------------------------------------------------------------
