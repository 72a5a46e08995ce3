use std::{error, fmt};

// -------------------------------------------------------------------------------------------------

/// Provides an enumeration of all possible errors reported by timewarp.
#[derive(Debug, Clone, PartialEq)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// A configuration value is out of its valid range.
    ParameterError(String),
    /// FIR filter lengths must be a positive multiple of 8 (multiple of 4 for the filter design).
    FilterLengthError(usize),
    /// The designed low-pass filter failed its sanity check.
    FilterDesignError(String),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParameterError(str) => write!(f, "Invalid parameter: {str}"),
            Self::FilterLengthError(length) => {
                write!(f, "Invalid FIR filter length {length}: must be a positive multiple of 8")
            }
            Self::FilterDesignError(str) => write!(f, "Low-pass filter design failed: {str}"),
        }
    }
}
