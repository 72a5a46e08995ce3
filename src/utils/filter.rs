//! FIR filtering and anti-alias low-pass filter design.

pub mod antialias;
pub mod fir;
