//! Multi channel FIR filter evaluation on interleaved sample blocks.

use assume::assume;
use pulp::Arch;

use crate::Error;

// -------------------------------------------------------------------------------------------------

/// Filter kernel variant, selected by channel count.
///
/// Mono and stereo kernels are unrolled variants of the generic multi channel kernel, which
/// produce the same results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FirKernel {
    Mono,
    Stereo,
    Multi,
}

impl FirKernel {
    pub fn for_channel_count(channel_count: usize) -> Self {
        match channel_count {
            1 => Self::Mono,
            2 => Self::Stereo,
            _ => Self::Multi,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Finite impulse response filter, applying a fixed set of taps to interleaved audio.
///
/// Output frame `j` of channel `c` is `sum(input[(j + i) * C + c] * taps[i]) / 2^div_factor`
/// for all taps `i`. Filtering `n` input frames thus produces `n - len` output frames: the last
/// `len` input frames are needed as lookahead and have to be fed again with the next block.
#[derive(Debug, Clone)]
pub struct FirFilter {
    coefficients: Vec<f32>,
    result_div_factor: u32,
    result_scaler: f32,
    // per channel accumulators for the generic multi channel kernel
    sums: Vec<f32>,
    arch: Arch,
}

impl Default for FirFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl FirFilter {
    /// Create a new, not yet configured filter. Evaluating it produces no output until
    /// coefficients got set.
    pub fn new() -> Self {
        Self {
            coefficients: Vec::new(),
            result_div_factor: 0,
            result_scaler: 1.0,
            sums: Vec::new(),
            arch: Arch::new(),
        }
    }

    /// Number of filter taps.
    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    /// Returns true when no coefficients have been set yet.
    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }

    /// Current filter taps.
    pub fn coefficients(&self) -> &[f32] {
        &self.coefficients
    }

    /// The power of two the accumulated convolution sum gets divided by.
    pub fn result_div_factor(&self) -> u32 {
        self.result_div_factor
    }

    /// Set new filter taps and the power of two exponent to rescale results with.
    ///
    /// The number of taps must be a positive multiple of 8. Invalid lengths are rejected and
    /// the previous coefficients stay active.
    pub fn set_coefficients(
        &mut self,
        coefficients: &[f32],
        result_div_factor: u32,
    ) -> Result<(), Error> {
        let length = coefficients.len();
        if length == 0 || length % 8 != 0 {
            return Err(Error::FilterLengthError(length));
        }
        if result_div_factor >= 32 {
            return Err(Error::ParameterError(format!(
                "Invalid FIR result divide factor: must be < 32, but is {result_div_factor}"
            )));
        }
        self.coefficients.clear();
        self.coefficients.extend_from_slice(coefficients);
        self.result_div_factor = result_div_factor;
        self.result_scaler = 1.0 / (1u64 << result_div_factor) as f32;
        Ok(())
    }

    /// Filter interleaved `src` samples into `dest`.
    ///
    /// Returns the number of produced frames, which is `src` frames minus the filter length,
    /// limited to the number of frames which fit into `dest`. When `src` holds fewer frames
    /// than the filter length, nothing is produced.
    pub fn evaluate(&mut self, dest: &mut [f32], src: &[f32], channel_count: usize) -> usize {
        debug_assert!(channel_count > 0, "Invalid channel count");
        let length = self.coefficients.len();
        let src_frames = src.len() / channel_count;
        if length == 0 || channel_count == 0 || src_frames < length {
            return 0;
        }
        let frames = (src_frames - length).min(dest.len() / channel_count);
        let coefficients = &self.coefficients;
        let scaler = self.result_scaler;
        match FirKernel::for_channel_count(channel_count) {
            FirKernel::Mono => self
                .arch
                .dispatch(|| evaluate_mono(dest, src, coefficients, scaler, frames)),
            FirKernel::Stereo => self
                .arch
                .dispatch(|| evaluate_stereo(dest, src, coefficients, scaler, frames)),
            FirKernel::Multi => {
                if self.sums.len() < channel_count {
                    self.sums.resize(channel_count, 0.0);
                }
                let sums = &mut self.sums[..channel_count];
                self.arch.dispatch(|| {
                    evaluate_multi(dest, src, coefficients, scaler, frames, sums)
                })
            }
        }
        frames
    }
}

// -------------------------------------------------------------------------------------------------

fn evaluate_mono(dest: &mut [f32], src: &[f32], coefficients: &[f32], scaler: f32, frames: usize) {
    let length = coefficients.len();
    for (j, output) in dest[..frames].iter_mut().enumerate() {
        let window = &src[j..j + length];
        let mut sum = 0.0;
        for (s, c) in window.chunks_exact(4).zip(coefficients.chunks_exact(4)) {
            sum += s[0] * c[0] + s[1] * c[1] + s[2] * c[2] + s[3] * c[3];
        }
        *output = sum * scaler;
    }
}

fn evaluate_stereo(
    dest: &mut [f32],
    src: &[f32],
    coefficients: &[f32],
    scaler: f32,
    frames: usize,
) {
    let length = coefficients.len();
    for (j, output) in dest[..2 * frames].chunks_exact_mut(2).enumerate() {
        let window = &src[2 * j..2 * (j + length)];
        let mut sum_l = 0.0;
        let mut sum_r = 0.0;
        for (s, c) in window.chunks_exact(8).zip(coefficients.chunks_exact(4)) {
            sum_l += s[0] * c[0] + s[2] * c[1] + s[4] * c[2] + s[6] * c[3];
            sum_r += s[1] * c[0] + s[3] * c[1] + s[5] * c[2] + s[7] * c[3];
        }
        output[0] = sum_l * scaler;
        output[1] = sum_r * scaler;
    }
}

fn evaluate_multi(
    dest: &mut [f32],
    src: &[f32],
    coefficients: &[f32],
    scaler: f32,
    frames: usize,
    sums: &mut [f32],
) {
    let channel_count = sums.len();
    let length = coefficients.len();
    for (j, output) in dest[..channel_count * frames]
        .chunks_exact_mut(channel_count)
        .enumerate()
    {
        sums.fill(0.0);
        let window = &src[j * channel_count..(j + length) * channel_count];
        for (frame, coefficient) in window.chunks_exact(channel_count).zip(coefficients) {
            assume!(unsafe: frame.len() == sums.len());
            for (sum, sample) in sums.iter_mut().zip(frame) {
                *sum += sample * coefficient;
            }
        }
        for (output, sum) in output.iter_mut().zip(sums.iter()) {
            *output = sum * scaler;
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_signal(frames: usize, channel_count: usize) -> Vec<f32> {
        (0..frames * channel_count)
            .map(|i| ((i * 7919) % 113) as f32 / 56.0 - 1.0)
            .collect()
    }

    fn test_coefficients(length: usize) -> Vec<f32> {
        (0..length).map(|i| (i % 5) as f32 - 1.5).collect()
    }

    #[test]
    fn length_must_be_multiple_of_eight() {
        let mut filter = FirFilter::new();
        assert!(filter.set_coefficients(&[1.0; 16], 4).is_ok());
        for length in [0, 4, 12, 20, 33] {
            assert_eq!(
                filter.set_coefficients(&vec![2.0; length], 2),
                Err(Error::FilterLengthError(length))
            );
            // previous setup stays intact
            assert_eq!(filter.len(), 16);
            assert_eq!(filter.result_div_factor(), 4);
            assert!(filter.coefficients().iter().all(|c| *c == 1.0));
        }
    }

    #[test]
    fn produces_size_minus_length_frames() {
        let mut filter = FirFilter::new();
        filter.set_coefficients(&[1.0; 8], 3).unwrap();
        let src = vec![1.0; 20 * 2];
        let mut dest = vec![0.0; 20 * 2];
        assert_eq!(filter.evaluate(&mut dest, &src, 2), 12);
        // moving average with unit gain
        assert!(dest[..24].iter().all(|v| (v - 1.0).abs() < 1e-6));
        // too few input frames: no output
        assert_eq!(filter.evaluate(&mut dest, &src[..7 * 2], 2), 0);
        // unconfigured filter: no output
        assert_eq!(FirFilter::new().evaluate(&mut dest, &src, 2), 0);
    }

    #[test]
    fn convolution_formula() {
        let mut filter = FirFilter::new();
        let coefficients = test_coefficients(16);
        filter.set_coefficients(&coefficients, 2).unwrap();
        for channel_count in 1..=5 {
            let frames = 40;
            let src = test_signal(frames, channel_count);
            let mut dest = vec![0.0; frames * channel_count];
            let produced = filter.evaluate(&mut dest, &src, channel_count);
            assert_eq!(produced, frames - 16);
            for j in 0..produced {
                for c in 0..channel_count {
                    let expected = (0..16)
                        .map(|i| src[(j + i) * channel_count + c] * coefficients[i])
                        .sum::<f32>()
                        / 4.0;
                    let value = dest[j * channel_count + c];
                    assert!(
                        (value - expected).abs() < 1e-4,
                        "channels {channel_count}, frame {j}: {value} != {expected}"
                    );
                }
            }
        }
    }

    #[test]
    fn unrolled_kernels_match_generic_kernel() {
        let coefficients = test_coefficients(24);
        let frames = 64;
        for channel_count in [1, 2] {
            let src = test_signal(frames, channel_count);
            let produced = frames - coefficients.len();

            let mut unrolled = vec![0.0; frames * channel_count];
            if channel_count == 1 {
                evaluate_mono(&mut unrolled, &src, &coefficients, 0.5, produced);
            } else {
                evaluate_stereo(&mut unrolled, &src, &coefficients, 0.5, produced);
            }
            let mut generic = vec![0.0; frames * channel_count];
            let mut sums = vec![0.0; channel_count];
            evaluate_multi(&mut generic, &src, &coefficients, 0.5, produced, &mut sums);

            for (a, b) in unrolled.iter().zip(generic.iter()) {
                assert!((a - b).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn output_is_limited_by_destination() {
        let mut filter = FirFilter::new();
        filter.set_coefficients(&[1.0; 8], 3).unwrap();
        let src = vec![1.0; 100];
        let mut dest = vec![0.0; 10];
        assert_eq!(filter.evaluate(&mut dest, &src, 1), 10);
    }
}
