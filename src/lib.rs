#![doc = include_str!("../README.md")]

// private mods (will be partly re-exported)
mod error;
mod processor;

// public, flat re-exports
pub use error::Error;

pub use processor::{Setting, TempoPitchProcessor};

pub use utils::{
    buffer::{SampleBuffer, SamplePipe},
    resampler::{transposer::AntiAliasedResampler, AudioResampler, ResamplingSpecs},
    stretcher::{
        wsola::{SeekMode, StretchParameters, TimeStretch},
        AudioTimeStretcher, TimeStretchingSpecs,
    },
};

// public mods
pub mod utils;
