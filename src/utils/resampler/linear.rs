//! Linear interpolating rate transposer.

use crate::Error;

// -------------------------------------------------------------------------------------------------

/// Changes the sample rate of interleaved audio by a fixed `rate` with 2-point linear
/// interpolation.
///
/// A rate of 2 consumes two input frames per output frame, a rate of 0.5 produces two output
/// frames per input frame. The transposer does not band-limit: see
/// [`AntiAliasedResampler`](super::transposer::AntiAliasedResampler) for a filtered variant.
#[derive(Debug, Clone)]
pub struct RateTransposer {
    rate: f64,
    // position of the next output frame between the current and next input frame
    fract: f64,
    // whole input frames which were advanced past the end of the previous block
    pending_skip: usize,
}

impl Default for RateTransposer {
    fn default() -> Self {
        Self {
            rate: 1.0,
            fract: 0.0,
            pending_skip: 0,
        }
    }
}

impl RateTransposer {
    /// Create a new transposer with the given rate.
    pub fn new(rate: f64) -> Result<Self, Error> {
        let mut transposer = Self::default();
        transposer.set_rate(rate)?;
        Ok(transposer)
    }

    /// Number of input frames consumed per output frame.
    pub fn rate(&self) -> f64 {
        self.rate
    }
    /// Set a new transposing rate. Must be > 0.
    pub fn set_rate(&mut self, rate: f64) -> Result<(), Error> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(Error::ParameterError(format!(
                "Invalid transposer rate: must be > 0, but is {rate}"
            )));
        }
        self.rate = rate;
        Ok(())
    }

    /// Current fractional position in range `[0, 1)`.
    pub fn fract(&self) -> f64 {
        self.fract
    }

    /// Reset the interpolation position. Makes the transposer ready for a new stream.
    pub fn reset(&mut self) {
        self.fract = 0.0;
        self.pending_skip = 0;
    }

    /// Transpose interleaved `src` samples into `dest`.
    ///
    /// Produces output frames as long as the next output frame has both of its neighbour
    /// input frames available in `src` and there's room left in `dest`. Returns a
    /// `(input_frames_consumed, output_frames_written)` tuple. Consumed frames must be removed
    /// from the input before calling `transpose` again. Unconsumed frames, usually the last
    /// one, have to be passed in again with the next block.
    ///
    /// Blocks with less than two frames produce and consume nothing.
    pub fn transpose(
        &mut self,
        src: &[f32],
        dest: &mut [f32],
        channel_count: usize,
    ) -> (usize, usize) {
        debug_assert!(channel_count > 0, "Invalid channel count");
        let src_frames = src.len() / channel_count.max(1);
        if src_frames < 2 {
            return (0, 0);
        }
        let dest_frames = dest.len() / channel_count;

        let mut src_count = self.pending_skip.min(src_frames);
        self.pending_skip -= src_count;

        let produced = match channel_count {
            1 => self.transpose_mono(src, dest, &mut src_count, src_frames, dest_frames),
            2 => self.transpose_stereo(src, dest, &mut src_count, src_frames, dest_frames),
            _ => self.transpose_multi(
                src,
                dest,
                &mut src_count,
                src_frames,
                dest_frames,
                channel_count,
            ),
        };

        if src_count > src_frames {
            self.pending_skip += src_count - src_frames;
            src_count = src_frames;
        }
        (src_count, produced)
    }

    #[inline]
    fn advance(&mut self) -> usize {
        self.fract += self.rate;
        let whole = self.fract.floor();
        self.fract -= whole;
        whole as usize
    }

    fn transpose_mono(
        &mut self,
        src: &[f32],
        dest: &mut [f32],
        src_count: &mut usize,
        src_frames: usize,
        dest_frames: usize,
    ) -> usize {
        let src_end = src_frames - 1;
        let mut produced = 0;
        while *src_count < src_end && produced < dest_frames {
            debug_assert!(self.fract < 1.0);
            let fract = self.fract as f32;
            let i = *src_count;
            dest[produced] = (1.0 - fract) * src[i] + fract * src[i + 1];
            produced += 1;
            *src_count += self.advance();
        }
        produced
    }

    fn transpose_stereo(
        &mut self,
        src: &[f32],
        dest: &mut [f32],
        src_count: &mut usize,
        src_frames: usize,
        dest_frames: usize,
    ) -> usize {
        let src_end = src_frames - 1;
        let mut produced = 0;
        while *src_count < src_end && produced < dest_frames {
            debug_assert!(self.fract < 1.0);
            let fract = self.fract as f32;
            let i = 2 * *src_count;
            dest[2 * produced] = (1.0 - fract) * src[i] + fract * src[i + 2];
            dest[2 * produced + 1] = (1.0 - fract) * src[i + 1] + fract * src[i + 3];
            produced += 1;
            *src_count += self.advance();
        }
        produced
    }

    fn transpose_multi(
        &mut self,
        src: &[f32],
        dest: &mut [f32],
        src_count: &mut usize,
        src_frames: usize,
        dest_frames: usize,
        channel_count: usize,
    ) -> usize {
        let src_end = src_frames - 1;
        let mut produced = 0;
        while *src_count < src_end && produced < dest_frames {
            debug_assert!(self.fract < 1.0);
            let fract = self.fract as f32;
            let current = &src[*src_count * channel_count..(*src_count + 1) * channel_count];
            let next = &src[(*src_count + 1) * channel_count..(*src_count + 2) * channel_count];
            let output = &mut dest[produced * channel_count..(produced + 1) * channel_count];
            for ((o, c), n) in output.iter_mut().zip(current).zip(next) {
                *o = (1.0 - fract) * c + fract * n;
            }
            produced += 1;
            *src_count += self.advance();
        }
        produced
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::buffer::SampleBuffer;

    #[test]
    fn invalid_rates() {
        assert!(RateTransposer::new(0.0).is_err());
        assert!(RateTransposer::new(-1.0).is_err());
        assert!(RateTransposer::new(f64::INFINITY).is_err());
        let mut transposer = RateTransposer::new(1.5).unwrap();
        assert!(transposer.set_rate(f64::NAN).is_err());
        assert_eq!(transposer.rate(), 1.5);
    }

    #[test]
    fn identity_at_unit_rate() {
        for channel_count in 1..=4 {
            let frames = 100;
            let input = (0..frames * channel_count)
                .map(|i| (i as f32 * 0.37).sin())
                .collect::<Vec<_>>();
            let mut output = vec![0.0; input.len()];
            let mut transposer = RateTransposer::new(1.0).unwrap();
            let (consumed, produced) = transposer.transpose(&input, &mut output, channel_count);
            // the last frame is needed as lookahead
            assert_eq!(consumed, frames - 1);
            assert_eq!(produced, frames - 1);
            let valid = produced * channel_count;
            assert_eq!(&output[..valid], &input[..valid]);
        }
    }

    #[test]
    fn too_short_blocks() {
        let mut transposer = RateTransposer::new(0.5).unwrap();
        let mut output = vec![0.0; 16];
        assert_eq!(transposer.transpose(&[], &mut output, 1), (0, 0));
        assert_eq!(transposer.transpose(&[1.0], &mut output, 1), (0, 0));
        assert_eq!(transposer.transpose(&[1.0, 2.0], &mut output, 2), (0, 0));
    }

    #[test]
    fn output_is_limited_by_destination() {
        let mut transposer = RateTransposer::new(0.25).unwrap();
        let input = vec![1.0; 100];
        let mut output = vec![0.0; 10];
        let (consumed, produced) = transposer.transpose(&input, &mut output, 1);
        assert_eq!(produced, 10);
        assert!(consumed < 3);
    }

    #[test]
    fn ramp_frame_accounting() {
        const FRAMES: usize = 5000;
        const CHUNK_FRAMES: usize = 37;
        for channel_count in 1..=3 {
            for rate in [0.3, 0.5, 0.75, 1.0, 1.5, 2.5, 4.3] {
                let mut transposer = RateTransposer::new(rate).unwrap();
                let mut input = SampleBuffer::new(channel_count);
                let mut output = Vec::new();
                let mut total_consumed = 0;

                // channel `c` holds the frame index ramp scaled by `c + 1`
                for chunk_start in (0..FRAMES).step_by(CHUNK_FRAMES) {
                    let chunk_frames = CHUNK_FRAMES.min(FRAMES - chunk_start);
                    let chunk = (chunk_start..chunk_start + chunk_frames)
                        .flat_map(|f| (0..channel_count).map(move |c| (f * (c + 1)) as f32))
                        .collect::<Vec<_>>();
                    input.put_samples(&chunk);

                    let mut dest = vec![0.0; (CHUNK_FRAMES * 4 + 2) * channel_count];
                    let (consumed, produced) =
                        transposer.transpose(input.samples(), &mut dest, channel_count);
                    input.discard_samples(consumed);
                    total_consumed += consumed;
                    output.extend_from_slice(&dest[..produced * channel_count]);
                }

                // all but the lookahead frame got consumed
                assert!(FRAMES - total_consumed <= 1, "rate {rate}: {total_consumed}");
                // nothing dropped or duplicated: output `k` lies at input position `k * rate`
                for (k, frame) in output.chunks_exact(channel_count).enumerate() {
                    for (c, value) in frame.iter().enumerate() {
                        let expected = (k as f64 * rate * (c + 1) as f64) as f32;
                        assert!(
                            (value - expected).abs() < 1e-2 * (c + 1) as f32,
                            "rate {rate}, frame {k}: {value} != {expected}"
                        );
                    }
                }
                let expected_frames = (FRAMES - 1) as f64 / rate;
                assert!((output.len() / channel_count) as f64 - expected_frames <= 1.0 + 1e-9);
                assert!(expected_frames - ((output.len() / channel_count) as f64) < 1.0 + rate);
            }
        }
    }
}
