//! Building blocks of the processing pipeline: sample FIFOs, filters, resamplers and stretchers.

pub mod buffer;
pub mod filter;
pub mod resampler;
pub mod stretcher;
