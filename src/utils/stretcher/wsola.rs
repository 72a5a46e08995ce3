//! WSOLA (waveform similarity based overlap-add) time stretcher.

use pulp::Arch;

use super::{AudioTimeStretcher, TimeStretchingSpecs};
use crate::{
    utils::buffer::{SampleBuffer, SamplePipe},
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Strategy used to find the best overlap position in the seek window.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, strum::EnumString, strum::Display, strum::VariantNames,
)]
pub enum SeekMode {
    /// Hierarchical coarse to fine scan over a fixed set of offsets.
    #[default]
    Quick,
    /// Scan every single offset in the seek window.
    Full,
}

// -------------------------------------------------------------------------------------------------

/// Sample rate and durations which define the stretcher's processing sequences.
///
/// Sequence and seek window lengths of `None` get derived from the current tempo.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StretchParameters {
    pub sample_rate: u32,
    pub sequence_ms: Option<u32>,
    pub seek_window_ms: Option<u32>,
    pub overlap_ms: u32,
}

impl Default for StretchParameters {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            sequence_ms: None,
            seek_window_ms: None,
            overlap_ms: 8,
        }
    }
}

impl StretchParameters {
    fn validate(&self) -> Result<(), Error> {
        if self.sample_rate == 0 {
            return Err(Error::ParameterError(
                "Invalid sample rate: must be > 0".to_string(),
            ));
        }
        if self.overlap_ms == 0 {
            return Err(Error::ParameterError(
                "Invalid overlap duration: must be > 0 ms".to_string(),
            ));
        }
        if self.sequence_ms == Some(0) || self.seek_window_ms == Some(0) {
            return Err(Error::ParameterError(
                "Invalid sequence or seek window duration: must be > 0 ms or automatic".to_string(),
            ));
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

// Auto sequence and seek window durations are interpolated between these tempo points.
const AUTO_TEMPO_LOW: f64 = 0.5;
const AUTO_TEMPO_HIGH: f64 = 2.0;

const AUTO_SEQUENCE_MS_AT_LOW: f64 = 125.0;
const AUTO_SEQUENCE_MS_AT_HIGH: f64 = 50.0;

const AUTO_SEEK_WINDOW_MS_AT_LOW: f64 = 25.0;
const AUTO_SEEK_WINDOW_MS_AT_HIGH: f64 = 15.0;

/// Linear interpolation of a duration between the low and high tempo calibration points,
/// clamped to the calibrated range and rounded to whole milliseconds.
fn auto_duration_ms(tempo: f64, at_low: f64, at_high: f64) -> u32 {
    let k = (at_high - at_low) / (AUTO_TEMPO_HIGH - AUTO_TEMPO_LOW);
    let c = at_low - k * AUTO_TEMPO_LOW;
    let ms = (c + k * tempo).clamp(at_low.min(at_high), at_low.max(at_high));
    (ms + 0.5) as u32
}

/// Frame count of the given duration at the given rate.
fn ms_to_frames(sample_rate: u32, ms: u32) -> usize {
    (sample_rate as u64 * ms as u64 / 1000) as usize
}

// Relative frame offsets of the hierarchical quick seek passes.
const QUICK_SEEK_OFFSETS: [&[isize]; 4] = [
    &[
        120, 180, 240, 300, 360, 420, 480, 540, 600, 660, 720, 780, 840, 900, 960, 1020, 1080,
        1140, 1200, 1260, 1320, 1380, 1440,
    ],
    &[-96, -72, -48, -24, 24, 48, 72, 96],
    &[-20, -16, -12, -8, 8, 12, 16, 20],
    &[-4, -3, -2, -1, 1, 2, 3, 4],
];

// Normalization energies below this are treated as silence.
const MIN_NORM: f64 = 1e-9;

// -------------------------------------------------------------------------------------------------

/// Changes the tempo of interleaved audio without changing its pitch.
///
/// Input is processed in sequences of `seek_window_length` frames. For each sequence, the
/// position within the next `seek_length` frames which best matches the tail of the previous
/// sequence gets searched via normalized cross-correlation. The sequence is then cross-faded
/// with that tail at the found position and appended to the output. Advancing the input by
/// `tempo` times the emitted frames per sequence changes the tempo.
///
/// Processing happens whenever enough input frames got buffered: see
/// [`input_frames_required`](Self::input_frames_required).
pub struct TimeStretch {
    channel_count: usize,
    tempo: f64,
    parameters: StretchParameters,
    seek_mode: SeekMode,

    sequence_ms: u32,
    seek_window_ms: u32,
    overlap_length: usize,
    seek_window_length: usize,
    seek_length: usize,
    nominal_skip: f64,
    sample_req: usize,

    skip_fract: f64,
    // tail of the last processed sequence, grown only
    mid_buffer: Vec<f32>,
    input_buffer: SampleBuffer,
    output_buffer: SampleBuffer,
    arch: Arch,
}

impl TimeStretch {
    /// Create a new stretcher with default parameters for the given specs.
    pub fn new(specs: TimeStretchingSpecs) -> Result<Self, Error> {
        let parameters = StretchParameters {
            sample_rate: specs.sample_rate,
            ..StretchParameters::default()
        };
        Self::with_parameters(specs, parameters)
    }

    /// Create a new stretcher with custom processing parameters. The parameter's sample rate
    /// overrides the sample rate of the given specs.
    pub fn with_parameters(
        specs: TimeStretchingSpecs,
        parameters: StretchParameters,
    ) -> Result<Self, Error> {
        if specs.channel_count == 0 {
            return Err(Error::ParameterError(
                "Invalid channel count: must be > 0".to_string(),
            ));
        }
        Self::validate_tempo(specs.speed)?;
        parameters.validate()?;
        let mut stretch = Self {
            channel_count: specs.channel_count,
            tempo: specs.speed,
            parameters,
            seek_mode: SeekMode::default(),
            sequence_ms: 0,
            seek_window_ms: 0,
            overlap_length: 0,
            seek_window_length: 0,
            seek_length: 0,
            nominal_skip: 0.0,
            sample_req: 0,
            skip_fract: 0.0,
            mid_buffer: Vec::new(),
            input_buffer: SampleBuffer::new(specs.channel_count),
            output_buffer: SampleBuffer::new(specs.channel_count),
            arch: Arch::new(),
        };
        stretch.update_overlap_length();
        stretch.update_sequence_parameters();
        Ok(stretch)
    }

    /// Number of interleaved channels.
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }
    /// Change the channel layout. Reallocates the overlap buffer.
    pub fn set_channel_count(&mut self, channel_count: usize) -> Result<(), Error> {
        if channel_count == 0 {
            return Err(Error::ParameterError(
                "Invalid channel count: must be > 0".to_string(),
            ));
        }
        if channel_count != self.channel_count {
            self.channel_count = channel_count;
            self.input_buffer.set_channel_count(channel_count);
            self.output_buffer.set_channel_count(channel_count);
            // force reallocating the mid buffer
            self.overlap_length = 0;
            self.update_overlap_length();
            self.update_sequence_parameters();
        }
        Ok(())
    }

    /// Tempo ratio: > 1 plays faster, < 1 slower.
    pub fn tempo(&self) -> f64 {
        self.tempo
    }
    /// Set a new tempo ratio. Must be > 0.
    pub fn set_tempo(&mut self, tempo: f64) -> Result<(), Error> {
        Self::validate_tempo(tempo)?;
        if self.tempo != tempo {
            self.tempo = tempo;
            self.update_sequence_parameters();
        }
        Ok(())
    }

    /// Currently applied processing parameters.
    pub fn parameters(&self) -> StretchParameters {
        self.parameters
    }
    /// Apply new processing parameters. Invalid parameters are rejected as a whole.
    pub fn set_parameters(&mut self, parameters: StretchParameters) -> Result<(), Error> {
        parameters.validate()?;
        self.parameters = parameters;
        self.update_overlap_length();
        self.update_sequence_parameters();
        Ok(())
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.parameters.sample_rate
    }
    pub fn set_sample_rate(&mut self, sample_rate: u32) -> Result<(), Error> {
        self.set_parameters(StretchParameters {
            sample_rate,
            ..self.parameters
        })
    }

    /// Effective sequence duration in ms: either set explicitly or derived from the tempo.
    pub fn sequence_ms(&self) -> u32 {
        self.sequence_ms
    }
    /// Set an explicit sequence duration in ms, or `None` to derive it from the tempo.
    pub fn set_sequence_ms(&mut self, sequence_ms: Option<u32>) -> Result<(), Error> {
        self.set_parameters(StretchParameters {
            sequence_ms,
            ..self.parameters
        })
    }

    /// Effective seek window duration in ms: either set explicitly or derived from the tempo.
    pub fn seek_window_ms(&self) -> u32 {
        self.seek_window_ms
    }
    /// Set an explicit seek window duration in ms, or `None` to derive it from the tempo.
    pub fn set_seek_window_ms(&mut self, seek_window_ms: Option<u32>) -> Result<(), Error> {
        self.set_parameters(StretchParameters {
            seek_window_ms,
            ..self.parameters
        })
    }

    /// Overlap duration in ms.
    pub fn overlap_ms(&self) -> u32 {
        self.parameters.overlap_ms
    }
    pub fn set_overlap_ms(&mut self, overlap_ms: u32) -> Result<(), Error> {
        self.set_parameters(StretchParameters {
            overlap_ms,
            ..self.parameters
        })
    }

    /// Overlap position search strategy.
    pub fn seek_mode(&self) -> SeekMode {
        self.seek_mode
    }
    pub fn set_seek_mode(&mut self, seek_mode: SeekMode) {
        self.seek_mode = seek_mode;
    }

    /// Cross-fade length in frames.
    pub fn overlap_length(&self) -> usize {
        self.overlap_length
    }
    /// Length of a processing sequence in frames.
    pub fn seek_window_length(&self) -> usize {
        self.seek_window_length
    }
    /// Number of candidate overlap positions per sequence.
    pub fn seek_length(&self) -> usize {
        self.seek_length
    }
    /// Ideal number of input frames to advance per sequence.
    pub fn nominal_skip(&self) -> f64 {
        self.nominal_skip
    }
    /// Minimum number of buffered input frames needed to process a sequence.
    pub fn input_frames_required(&self) -> usize {
        self.sample_req
    }

    /// Number of buffered input frames which were not yet processed.
    pub fn num_unprocessed_samples(&self) -> usize {
        self.input_buffer.len()
    }

    /// Drop all pending input and the previous sequence's tail, but keep processed output.
    pub fn clear_input(&mut self) {
        self.input_buffer.clear();
        self.mid_buffer.fill(0.0);
        self.skip_fract = 0.0;
    }

    fn validate_tempo(tempo: f64) -> Result<(), Error> {
        if !(tempo.is_finite() && tempo > 0.0) {
            return Err(Error::ParameterError(format!(
                "Invalid tempo: must be > 0, but is {tempo}"
            )));
        }
        Ok(())
    }

    fn update_overlap_length(&mut self) {
        let mut overlap_length =
            ms_to_frames(self.parameters.sample_rate, self.parameters.overlap_ms).max(16);
        overlap_length -= overlap_length % 8;
        let previous_length = self.overlap_length;
        self.overlap_length = overlap_length;
        if overlap_length > previous_length {
            self.mid_buffer.clear();
            self.mid_buffer
                .resize(overlap_length * self.channel_count, 0.0);
        }
    }

    fn update_sequence_parameters(&mut self) {
        let parameters = &self.parameters;
        self.sequence_ms = parameters.sequence_ms.unwrap_or_else(|| {
            auto_duration_ms(
                self.tempo,
                AUTO_SEQUENCE_MS_AT_LOW,
                AUTO_SEQUENCE_MS_AT_HIGH,
            )
        });
        self.seek_window_ms = parameters.seek_window_ms.unwrap_or_else(|| {
            auto_duration_ms(
                self.tempo,
                AUTO_SEEK_WINDOW_MS_AT_LOW,
                AUTO_SEEK_WINDOW_MS_AT_HIGH,
            )
        });
        self.seek_window_length = ms_to_frames(parameters.sample_rate, self.sequence_ms)
            .max(2 * self.overlap_length);
        self.seek_length = ms_to_frames(parameters.sample_rate, self.seek_window_ms);

        self.nominal_skip = self.tempo * (self.seek_window_length - self.overlap_length) as f64;
        // saturates for absurdly high tempos, which then never gather enough input
        let int_skip = (self.nominal_skip + 0.5) as usize;
        self.sample_req = int_skip
            .saturating_add(self.overlap_length)
            .max(self.seek_window_length)
            .saturating_add(self.seek_length);

        log::debug!(
            "WSOLA setup: tempo {:.3}, sequence {} ms ({} frames), seek window {} ms ({} frames), \
            overlap {} frames, skip {:.2} frames, requires {} frames",
            self.tempo,
            self.sequence_ms,
            self.seek_window_length,
            self.seek_window_ms,
            self.seek_length,
            self.overlap_length,
            self.nominal_skip,
            self.sample_req
        );
    }

    /// Find the best overlap position for the mid buffer in the given interleaved input, which
    /// must hold at least `seek_length + overlap_length` frames.
    fn seek_best_overlap_position(&self, input: &[f32]) -> usize {
        let channel_count = self.channel_count;
        let window_samples = self.overlap_length * channel_count;
        let seek_length = self.seek_length;
        debug_assert!(input.len() >= (seek_length + self.overlap_length) * channel_count);
        let reference = &self.mid_buffer[..window_samples];
        match self.seek_mode {
            SeekMode::Quick => self
                .arch
                .dispatch(|| seek_quick(input, reference, channel_count, seek_length)),
            SeekMode::Full => self
                .arch
                .dispatch(|| seek_full(input, reference, channel_count, seek_length)),
        }
    }

    fn process_samples(&mut self) {
        let channel_count = self.channel_count;
        let overlap_length = self.overlap_length;
        let window_samples = overlap_length * channel_count;
        let copy_length = self.seek_window_length - 2 * overlap_length;

        while self.input_buffer.len() >= self.sample_req {
            let offset = self.seek_best_overlap_position(self.input_buffer.samples());
            let required_frames = offset + copy_length + 2 * overlap_length;
            debug_assert!(
                self.input_buffer.len() >= required_frames,
                "Not enough input frames to process a sequence"
            );
            if self.input_buffer.len() < required_frames {
                break;
            }

            let input = &self.input_buffer.samples()[offset * channel_count..];
            let output = self
                .output_buffer
                .spare_frames_mut(overlap_length + copy_length);

            // cross-fade with the previous sequence's tail, then copy the sequence's body
            let (overlapped, copied) = output.split_at_mut(window_samples);
            overlap(
                overlapped,
                &input[..window_samples],
                &self.mid_buffer[..window_samples],
                channel_count,
            );
            let body_end = window_samples + copied.len();
            copied.copy_from_slice(&input[window_samples..body_end]);
            self.output_buffer
                .commit_frames(overlap_length + copy_length);

            // keep the tail for the next sequence
            self.mid_buffer[..window_samples]
                .copy_from_slice(&input[body_end..body_end + window_samples]);

            self.skip_fract += self.nominal_skip;
            let skip = self.skip_fract.floor();
            self.skip_fract -= skip;
            self.input_buffer.discard_samples(skip as usize);
        }
    }
}

impl SamplePipe for TimeStretch {
    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn samples(&self) -> &[f32] {
        self.output_buffer.samples()
    }

    fn put_samples(&mut self, samples: &[f32]) {
        self.input_buffer.put_samples(samples);
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

impl AudioTimeStretcher for TimeStretch {
    fn max_input_buffer_size(&self) -> Option<usize> {
        None
    }

    fn min_output_buffer_size(&self) -> Option<usize> {
        None
    }

    fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<(usize, usize), Error> {
        self.put_samples(input);
        let output_written = self.receive_samples(output) * self.channel_count;
        Ok((input.len(), output_written))
    }
}

// -------------------------------------------------------------------------------------------------

/// Linear cross-fade from `mid` into `input`: frame `k` gets weighted with `k / len` for the
/// input and `1 - k / len` for the mid buffer.
fn overlap(output: &mut [f32], input: &[f32], mid: &[f32], channel_count: usize) {
    let frames = output.len() / channel_count;
    let scale = 1.0 / frames as f32;
    for (k, ((output, input), mid)) in output
        .chunks_exact_mut(channel_count)
        .zip(input.chunks_exact(channel_count))
        .zip(mid.chunks_exact(channel_count))
        .enumerate()
    {
        let f1 = k as f32 * scale;
        let f2 = 1.0 - f1;
        for ((o, i), m) in output.iter_mut().zip(input).zip(mid) {
            *o = i * f1 + m * f2;
        }
    }
}

/// Cross-correlation of `candidate` with `reference` and the candidate's energy.
fn cross_correlation(candidate: &[f32], reference: &[f32]) -> (f64, f64) {
    let mut corr = 0.0f64;
    let mut norm = 0.0f64;
    for (c, r) in candidate.chunks_exact(4).zip(reference.chunks_exact(4)) {
        corr += (c[0] * r[0] + c[1] * r[1] + c[2] * r[2] + c[3] * r[3]) as f64;
        norm += (c[0] * c[0] + c[1] * c[1] + c[2] * c[2] + c[3] * c[3]) as f64;
    }
    (corr, norm)
}

/// Cross-correlation of `candidate` with `reference` only.
fn correlation(candidate: &[f32], reference: &[f32]) -> f64 {
    let mut corr = 0.0f64;
    for (c, r) in candidate.chunks_exact(4).zip(reference.chunks_exact(4)) {
        corr += (c[0] * r[0] + c[1] * r[1] + c[2] * r[2] + c[3] * r[3]) as f64;
    }
    corr
}

fn energy(frame: &[f32]) -> f64 {
    frame.iter().map(|s| (s * s) as f64).sum()
}

fn normalized(corr: f64, norm: f64) -> f64 {
    corr / norm.max(MIN_NORM).sqrt()
}

/// Slightly favours offsets close to the middle of the seek window.
fn biased_score(corr: f64, offset: usize, seek_length: usize) -> f64 {
    let tmp = (2.0 * offset as f64 - seek_length as f64) / seek_length as f64;
    (corr + 0.1) * (1.0 - 0.25 * tmp * tmp)
}

/// Evaluate every offset in `[0, seek_length)`, updating the candidate's energy incrementally.
fn seek_full(input: &[f32], reference: &[f32], channel_count: usize, seek_length: usize) -> usize {
    if seek_length == 0 {
        return 0;
    }
    let window_samples = reference.len();
    let (corr, mut norm) = cross_correlation(&input[..window_samples], reference);
    let mut best_score = biased_score(normalized(corr, norm), 0, seek_length);
    let mut best_offset = 0;
    for offset in 1..seek_length {
        let start = offset * channel_count;
        // remove the frame that left the window, add the one that entered it
        norm -= energy(&input[start - channel_count..start]);
        norm += energy(&input[start + window_samples - channel_count..start + window_samples]);
        let corr = correlation(&input[start..start + window_samples], reference);
        let score = biased_score(normalized(corr, norm), offset, seek_length);
        if score > best_score {
            best_score = score;
            best_offset = offset;
        }
    }
    best_offset
}

/// Hierarchical scan: each pass refines around the best offset of the previous pass.
fn seek_quick(input: &[f32], reference: &[f32], channel_count: usize, seek_length: usize) -> usize {
    if seek_length == 0 {
        return 0;
    }
    let window_samples = reference.len();
    let score_at = |offset: usize| {
        let start = offset * channel_count;
        let (corr, norm) = cross_correlation(&input[start..start + window_samples], reference);
        biased_score(normalized(corr, norm), offset, seek_length)
    };
    let mut best_offset = 0;
    let mut best_score = score_at(0);
    for pass_offsets in QUICK_SEEK_OFFSETS {
        let center = best_offset as isize;
        for delta in pass_offsets {
            let offset = center + delta;
            if offset < 0 || offset as usize >= seek_length {
                continue;
            }
            let score = score_at(offset as usize);
            if score > best_score {
                best_score = score;
                best_offset = offset as usize;
            }
        }
    }
    best_offset
}

// -------------------------------------------------------------------------------------------------
