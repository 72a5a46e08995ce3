//! AudioResampler trait for resampling interleaved audio.

use crate::Error;

pub mod linear;
pub mod transposer;

// -------------------------------------------------------------------------------------------------

/// AudioResampler specs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ResamplingSpecs {
    input_rate: u32,
    output_rate: u32,
    channel_count: usize,
}

impl ResamplingSpecs {
    pub fn new(input_rate: u32, output_rate: u32, channel_count: usize) -> Self {
        Self {
            input_rate,
            output_rate,
            channel_count,
        }
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }
    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn input_ratio(&self) -> f64 {
        self.input_rate as f64 / self.output_rate as f64
    }
    pub fn output_ratio(&self) -> f64 {
        self.output_rate as f64 / self.input_rate as f64
    }
}

// -------------------------------------------------------------------------------------------------

/// Audio resampler interface.
///
/// Resamplers may buffer input internally, so a process call may consume input without
/// writing any output yet. Outputs have no size constrains.
pub trait AudioResampler: Send + Sync {
    /// process interleaved input samples to the given interleaved output buffers.
    /// returns an error or (input_consumed, output_written) sample counts on success.
    fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<(usize, usize), Error>;

    /// Reset internal resampler state. Make an existing resampler ready for a new source.
    fn reset(&mut self);
}
