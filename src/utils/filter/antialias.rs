//! Windowed-sinc low-pass filter, used to band-limit signals around rate transposing.

use std::f64::consts::PI;

use super::fir::FirFilter;
use crate::{utils::buffer::SampleBuffer, Error};

// -------------------------------------------------------------------------------------------------

/// Fixed point exponent of the designed coefficients: the taps sum up to `2^14`.
pub const RESULT_DIV_FACTOR: u32 = 14;

/// Design a Hamming windowed-sinc low-pass filter.
///
/// `cutoff` is the normalized cutoff frequency in range `(0, 0.5]`, where 0.5 is nyquist.
/// `length` is the number of taps and must be a multiple of 4. The returned taps are rounded to
/// integer values which sum up to approximately `2^RESULT_DIV_FACTOR`, so the accumulated
/// convolution sum must be divided by `2^RESULT_DIV_FACTOR` to get unit DC gain.
pub fn design_lowpass_coefficients(cutoff: f64, length: usize) -> Result<Vec<f32>, Error> {
    if !(cutoff > 0.0 && cutoff <= 0.5) {
        return Err(Error::ParameterError(format!(
            "Invalid low-pass cutoff: must be in range (0, 0.5], but is {cutoff}"
        )));
    }
    if length < 4 || length % 4 != 0 {
        return Err(Error::FilterLengthError(length));
    }

    let wc = 2.0 * PI * cutoff;
    let window_coeff = 2.0 * PI / length as f64;
    let center = length / 2;

    let mut work = Vec::with_capacity(length);
    let mut sum = 0.0;
    for i in 0..length {
        let t = i as f64 - center as f64;
        let x = t * wc;
        let sinc = if x != 0.0 { x.sin() / x } else { 1.0 };
        let hamming = 0.54 + 0.46 * (window_coeff * t).cos();
        let value = hamming * sinc;
        work.push(value);
        sum += value;
    }

    // must be a low-pass with a positive main lobe
    if sum <= 0.0
        || work[center] <= 0.0
        || work[center + 1] < -1e-6
        || work[center - 1] < -1e-6
    {
        return Err(Error::FilterDesignError(format!(
            "no low-pass response for cutoff {cutoff} with {length} taps"
        )));
    }

    let scale = (1 << RESULT_DIV_FACTOR) as f64 / sum;
    Ok(work
        .into_iter()
        .map(|value| {
            (value * scale)
                .round()
                .clamp(i16::MIN as f64, i16::MAX as f64) as f32
        })
        .collect())
}

// -------------------------------------------------------------------------------------------------

/// Anti-alias low-pass FIR filter with configurable cutoff and length.
///
/// Changing the cutoff or length redesigns the whole coefficient set.
#[derive(Debug, Clone)]
pub struct AntiAliasFilter {
    fir: FirFilter,
    cutoff: f64,
    length: usize,
}

impl AntiAliasFilter {
    /// Default number of taps.
    pub const DEFAULT_LENGTH: usize = 64;

    /// Create a new filter with the given number of taps, initially passing everything
    /// below nyquist. `length` must be a multiple of 8.
    pub fn new(length: usize) -> Result<Self, Error> {
        let mut filter = Self {
            fir: FirFilter::new(),
            cutoff: 0.5,
            length: 0,
        };
        filter.redesign(0.5, length)?;
        Ok(filter)
    }

    /// Normalized cutoff frequency, where 0.5 is nyquist.
    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }
    /// Set a new normalized cutoff frequency in range `(0, 0.5]`.
    pub fn set_cutoff(&mut self, cutoff: f64) -> Result<(), Error> {
        if self.cutoff != cutoff {
            self.redesign(cutoff, self.length)
        } else {
            Ok(())
        }
    }

    /// Number of filter taps.
    pub fn len(&self) -> usize {
        self.length
    }
    /// Returns true when the filter has no taps. Never the case for successfully created filters.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
    /// Set a new filter length. Must be a multiple of 8.
    pub fn set_length(&mut self, length: usize) -> Result<(), Error> {
        if self.length != length {
            self.redesign(self.cutoff, length)
        } else {
            Ok(())
        }
    }

    /// Currently applied filter taps.
    pub fn coefficients(&self) -> &[f32] {
        self.fir.coefficients()
    }

    /// Filter interleaved `src` samples into `dest`. Returns the number of produced frames,
    /// which is the number of `src` frames minus the filter length.
    pub fn evaluate(&mut self, dest: &mut [f32], src: &[f32], channel_count: usize) -> usize {
        self.fir.evaluate(dest, src, channel_count)
    }

    /// Filter all frames of the `src` FIFO into the `dest` FIFO.
    ///
    /// Consumes as many frames from `src` as frames got appended to `dest`: the last filter
    /// length frames stay in `src` as lookahead for the next call.
    pub fn evaluate_buffers(&mut self, dest: &mut SampleBuffer, src: &mut SampleBuffer) -> usize {
        debug_assert_eq!(dest.channel_count(), src.channel_count());
        let channel_count = src.channel_count();
        let src_frames = src.len();
        let produced = self.fir.evaluate(
            dest.spare_frames_mut(src_frames),
            src.samples(),
            channel_count,
        );
        src.discard_samples(produced);
        dest.commit_frames(produced);
        produced
    }

    fn redesign(&mut self, cutoff: f64, length: usize) -> Result<(), Error> {
        let coefficients = design_lowpass_coefficients(cutoff, length)?;
        self.fir.set_coefficients(&coefficients, RESULT_DIV_FACTOR)?;
        self.cutoff = cutoff;
        self.length = length;
        log::debug!("Designed anti-alias filter: cutoff {cutoff:.4}, {length} taps");
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn designed_filters_are_lowpass() {
        for length in (16..=128).step_by(8) {
            for cutoff in [0.01, 0.05, 0.1, 0.2, 0.25, 0.3333, 0.4, 0.45, 0.5] {
                let coefficients = design_lowpass_coefficients(cutoff, length).unwrap();
                assert_eq!(coefficients.len(), length);
                let sum = coefficients.iter().sum::<f32>();
                assert!(sum > 0.0);
                // rounded taps still sum up to about the fixed point unity
                assert!((sum - 16384.0).abs() <= length as f32);
                assert!(coefficients[length / 2] >= 0.0);
                // integer taps in 16 bit range
                assert!(coefficients
                    .iter()
                    .all(|c| c.fract() == 0.0 && *c >= -32768.0 && *c <= 32767.0));
            }
        }
    }

    #[test]
    fn invalid_designs() {
        assert!(matches!(
            design_lowpass_coefficients(0.0, 64),
            Err(Error::ParameterError(_))
        ));
        assert!(matches!(
            design_lowpass_coefficients(0.6, 64),
            Err(Error::ParameterError(_))
        ));
        assert!(matches!(
            design_lowpass_coefficients(f64::NAN, 64),
            Err(Error::ParameterError(_))
        ));
        assert_eq!(
            design_lowpass_coefficients(0.25, 30),
            Err(Error::FilterLengthError(30))
        );
    }

    #[test]
    fn length_changes() {
        let mut filter = AntiAliasFilter::new(32).unwrap();
        assert_eq!(filter.len(), 32);
        // multiple of 4, but not of 8: rejected by the FIR
        assert_eq!(filter.set_length(36), Err(Error::FilterLengthError(36)));
        assert_eq!(filter.len(), 32);
        assert_eq!(filter.coefficients().len(), 32);
        assert!(filter.set_length(48).is_ok());
        assert_eq!(filter.coefficients().len(), 48);
        assert!(AntiAliasFilter::new(20).is_err());
    }

    #[test]
    fn cutoff_changes() {
        let mut filter = AntiAliasFilter::new(64).unwrap();
        let original = filter.coefficients().to_vec();
        assert!(filter.set_cutoff(1.0).is_err());
        assert_eq!(filter.cutoff(), 0.5);
        assert_eq!(filter.coefficients(), original.as_slice());
        assert!(filter.set_cutoff(0.2).is_ok());
        assert_eq!(filter.cutoff(), 0.2);
        assert_ne!(filter.coefficients(), original.as_slice());
    }

    #[test]
    fn dc_passes_and_nyquist_is_blocked() {
        let mut filter = AntiAliasFilter::new(64).unwrap();
        filter.set_cutoff(0.2).unwrap();

        let dc = vec![0.5; 256];
        let mut output = vec![0.0; 256];
        let produced = filter.evaluate(&mut output, &dc, 1);
        assert_eq!(produced, 256 - 64);
        assert!(output[..produced].iter().all(|v| (v - 0.5).abs() < 5e-3));

        let nyquist = (0..256)
            .map(|i| if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect::<Vec<f32>>();
        let produced = filter.evaluate(&mut output, &nyquist, 1);
        assert!(output[..produced].iter().all(|v| v.abs() < 0.01));
    }

    #[test]
    fn evaluate_fifo_buffers() {
        let mut filter = AntiAliasFilter::new(32).unwrap();
        let mut src = SampleBuffer::new(2);
        let mut dest = SampleBuffer::new(2);

        src.put_samples(&[1.0; 2 * 20]);
        assert_eq!(filter.evaluate_buffers(&mut dest, &mut src), 0);
        assert_eq!(src.len(), 20);

        src.put_samples(&[1.0; 2 * 80]);
        assert_eq!(filter.evaluate_buffers(&mut dest, &mut src), 100 - 32);
        assert_eq!(src.len(), 32);
        assert_eq!(dest.len(), 100 - 32);
        assert!(dest.samples().iter().all(|v| (v - 1.0).abs() < 5e-3));
    }
}
