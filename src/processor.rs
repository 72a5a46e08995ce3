//! Tempo and pitch changing pipeline.

use crate::{
    utils::{
        buffer::{SampleBuffer, SamplePipe},
        resampler::transposer::AntiAliasedResampler,
        stretcher::{
            wsola::{SeekMode, StretchParameters, TimeStretch},
            TimeStretchingSpecs,
        },
    },
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Integer valued processing settings, accessible via [`TempoPitchProcessor::set_setting`] and
/// [`TempoPitchProcessor::setting`].
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, strum::EnumString, strum::Display, strum::VariantNames,
)]
pub enum Setting {
    /// Enable (1) or disable (0) the anti-alias filter of the rate transposer.
    UseAntiAliasFilter,
    /// Anti-alias filter length in taps. Must be a multiple of 8.
    AntiAliasFilterLength,
    /// Enable (1) quick or (0) full overlap position seeking.
    UseQuickSeek,
    /// Sequence duration in ms, or 0 for automatic.
    SequenceMs,
    /// Seek window duration in ms, or 0 for automatic.
    SeekWindowMs,
    /// Overlap duration in ms.
    OverlapMs,
}

// -------------------------------------------------------------------------------------------------

/// Changes tempo, playback rate and pitch of interleaved audio independently.
///
/// Input first runs through a [`TimeStretch`], which changes the tempo, and then through an
/// [`AntiAliasedResampler`], which changes the rate. Pitch changes are applied as combination
/// of both: the rate changes the pitch and the stretcher compensates the duration change.
///
/// Tempo, rate and pitch are *virtual* values. The effective stage ratios are
/// `rate = pitch * virtual_rate` and `tempo = virtual_tempo / pitch`. Stages with a ratio of
/// exactly 1 are bypassed.
pub struct TempoPitchProcessor {
    channel_count: usize,
    virtual_tempo: f64,
    virtual_rate: f64,
    virtual_pitch: f64,
    tempo: f64,
    rate: f64,
    stretch: TimeStretch,
    resampler: AntiAliasedResampler,
    output_buffer: SampleBuffer,
}

impl TempoPitchProcessor {
    const FLUSH_BLOCK_FRAMES: usize = 64;
    const MIN_FLUSH_BLOCKS: usize = 128;

    /// Create a new processor with unchanged tempo, rate and pitch.
    pub fn new(sample_rate: u32, channel_count: usize) -> Result<Self, Error> {
        let specs = TimeStretchingSpecs::new(1.0, sample_rate, channel_count);
        let stretch = TimeStretch::new(specs)?;
        let resampler = AntiAliasedResampler::with_rate(1.0, channel_count)?;
        Ok(Self {
            channel_count,
            virtual_tempo: 1.0,
            virtual_rate: 1.0,
            virtual_pitch: 1.0,
            tempo: 1.0,
            rate: 1.0,
            stretch,
            resampler,
            output_buffer: SampleBuffer::new(channel_count),
        })
    }

    /// Number of interleaved channels.
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }
    /// Change the channel layout of all stages.
    pub fn set_channel_count(&mut self, channel_count: usize) -> Result<(), Error> {
        self.stretch.set_channel_count(channel_count)?;
        self.resampler.set_channel_count(channel_count)?;
        self.output_buffer.set_channel_count(channel_count);
        self.channel_count = channel_count;
        Ok(())
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.stretch.sample_rate()
    }
    pub fn set_sample_rate(&mut self, sample_rate: u32) -> Result<(), Error> {
        self.stretch.set_sample_rate(sample_rate)
    }

    /// Effective tempo ratio of the time stretching stage.
    pub fn tempo(&self) -> f64 {
        self.tempo
    }
    /// Effective rate of the transposing stage.
    pub fn rate(&self) -> f64 {
        self.rate
    }
    /// Virtual tempo, as set via [`Self::set_tempo`].
    pub fn virtual_tempo(&self) -> f64 {
        self.virtual_tempo
    }
    /// Virtual rate, as set via [`Self::set_rate`].
    pub fn virtual_rate(&self) -> f64 {
        self.virtual_rate
    }
    /// Virtual pitch ratio, as set via [`Self::set_pitch`].
    pub fn pitch(&self) -> f64 {
        self.virtual_pitch
    }

    /// Set a new tempo ratio: 1 is the original tempo, < 1 slower, > 1 faster.
    pub fn set_tempo(&mut self, tempo: f64) -> Result<(), Error> {
        self.update_ratios(tempo, self.virtual_rate, self.virtual_pitch)
    }
    /// Set the tempo as change in percent, relative to the original tempo.
    pub fn set_tempo_change(&mut self, percent: f64) -> Result<(), Error> {
        self.set_tempo(1.0 + 0.01 * percent)
    }

    /// Set a new playback rate, which changes tempo and pitch: 1 is the original rate.
    pub fn set_rate(&mut self, rate: f64) -> Result<(), Error> {
        self.update_ratios(self.virtual_tempo, rate, self.virtual_pitch)
    }
    /// Set the rate as change in percent, relative to the original rate.
    pub fn set_rate_change(&mut self, percent: f64) -> Result<(), Error> {
        self.set_rate(1.0 + 0.01 * percent)
    }

    /// Set a new pitch ratio while keeping the tempo: 1 is the original pitch.
    pub fn set_pitch(&mut self, pitch: f64) -> Result<(), Error> {
        self.update_ratios(self.virtual_tempo, self.virtual_rate, pitch)
    }
    /// Set the pitch in octaves, relative to the original pitch.
    pub fn set_pitch_octaves(&mut self, octaves: f64) -> Result<(), Error> {
        self.set_pitch(octaves.exp2())
    }
    /// Set the pitch in semitones, relative to the original pitch.
    pub fn set_pitch_semitones(&mut self, semitones: f64) -> Result<(), Error> {
        self.set_pitch_octaves(semitones / 12.0)
    }

    /// Read an integer setting.
    pub fn setting(&self, setting: Setting) -> i32 {
        match setting {
            Setting::UseAntiAliasFilter => self.resampler.is_aa_filter_enabled() as i32,
            Setting::AntiAliasFilterLength => self.resampler.aa_filter_length() as i32,
            Setting::UseQuickSeek => (self.stretch.seek_mode() == SeekMode::Quick) as i32,
            Setting::SequenceMs => self.stretch.parameters().sequence_ms.unwrap_or(0) as i32,
            Setting::SeekWindowMs => self.stretch.parameters().seek_window_ms.unwrap_or(0) as i32,
            Setting::OverlapMs => self.stretch.parameters().overlap_ms as i32,
        }
    }

    /// Apply an integer setting. Negative values are rejected.
    pub fn set_setting(&mut self, setting: Setting, value: i32) -> Result<(), Error> {
        let value = u32::try_from(value).map_err(|_| {
            Error::ParameterError(format!("Invalid value for setting '{setting}': {value}"))
        })?;
        let automatic_if_zero = |ms: u32| if ms == 0 { None } else { Some(ms) };
        match setting {
            Setting::UseAntiAliasFilter => {
                self.resampler.enable_aa_filter(value != 0);
                Ok(())
            }
            Setting::AntiAliasFilterLength => self.resampler.set_aa_filter_length(value as usize),
            Setting::UseQuickSeek => {
                self.stretch.set_seek_mode(if value != 0 {
                    SeekMode::Quick
                } else {
                    SeekMode::Full
                });
                Ok(())
            }
            Setting::SequenceMs => self.stretch.set_sequence_ms(automatic_if_zero(value)),
            Setting::SeekWindowMs => self.stretch.set_seek_window_ms(automatic_if_zero(value)),
            Setting::OverlapMs => self.stretch.set_overlap_ms(value),
        }
    }

    /// Current time stretching parameters.
    pub fn stretch_parameters(&self) -> StretchParameters {
        self.stretch.parameters()
    }

    /// Number of input frames which are buffered in the processing stages and not yet turned
    /// into output frames.
    pub fn num_unprocessed_samples(&self) -> usize {
        self.stretch.num_unprocessed_samples() + self.resampler.num_unprocessed_samples()
    }

    /// Process all pending input by feeding silence, then truncate the output to the expected
    /// number of frames. Call at the end of a stream to receive its last frames.
    pub fn flush(&mut self) {
        let expected_pending = self.stretch.num_unprocessed_samples() as f64
            / (self.tempo * self.rate)
            + self.resampler.num_unprocessed_samples() as f64 / self.rate;
        let expected_frames = self.output_buffer.len() + expected_pending.round() as usize;

        let silence = vec![0.0; Self::FLUSH_BLOCK_FRAMES * self.channel_count];
        let max_blocks = Self::MIN_FLUSH_BLOCKS.max(
            self.stretch.input_frames_required().saturating_mul(4) / Self::FLUSH_BLOCK_FRAMES,
        );
        let mut blocks = 0;
        while self.output_buffer.len() < expected_frames && blocks < max_blocks {
            self.put_samples(&silence);
            blocks += 1;
        }
        if self.output_buffer.len() < expected_frames {
            log::warn!(
                "Failed to flush all pending frames: got {} of {} frames",
                self.output_buffer.len(),
                expected_frames
            );
        }
        self.output_buffer.truncate(expected_frames);

        self.stretch.clear();
        self.resampler.clear();
    }

    fn update_ratios(
        &mut self,
        virtual_tempo: f64,
        virtual_rate: f64,
        virtual_pitch: f64,
    ) -> Result<(), Error> {
        for (name, value) in [
            ("tempo", virtual_tempo),
            ("rate", virtual_rate),
            ("pitch", virtual_pitch),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::ParameterError(format!(
                    "Invalid {name}: must be > 0, but is {value}"
                )));
            }
        }
        let tempo = virtual_tempo / virtual_pitch;
        let rate = virtual_pitch * virtual_rate;
        self.resampler.set_rate(rate)?;
        if let Err(err) = self.stretch.set_tempo(tempo) {
            // keep both stages in sync
            self.resampler.set_rate(self.rate)?;
            return Err(err);
        }
        self.virtual_tempo = virtual_tempo;
        self.virtual_rate = virtual_rate;
        self.virtual_pitch = virtual_pitch;
        if self.tempo != tempo || self.rate != rate {
            log::debug!("Effective tempo {tempo:.4}, rate {rate:.4}");
        }
        self.tempo = tempo;
        self.rate = rate;
        Ok(())
    }

    fn stretch_is_active(&self) -> bool {
        // a stretcher which still holds input keeps running until flushed or cleared
        self.tempo != 1.0 || self.stretch.num_unprocessed_samples() > 0
    }
}

impl SamplePipe for TempoPitchProcessor {
    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn samples(&self) -> &[f32] {
        self.output_buffer.samples()
    }

    fn put_samples(&mut self, samples: &[f32]) {
        let resample = self.rate != 1.0 || self.resampler.num_unprocessed_samples() > 0;
        if self.stretch_is_active() {
            self.stretch.put_samples(samples);
            if resample {
                self.resampler.move_samples_from(&mut self.stretch);
                self.output_buffer.move_samples_from(&mut self.resampler);
            } else {
                self.output_buffer.move_samples_from(&mut self.stretch);
            }
        } else if resample {
            self.resampler.put_samples(samples);
            self.output_buffer.move_samples_from(&mut self.resampler);
        } else {
            self.output_buffer.put_samples(samples);
        }
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
        self.stretch.clear();
        self.resampler.clear();
    }

    fn truncate(&mut self, frames: usize) -> usize {
        self.output_buffer.truncate(frames)
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::{f32::consts::PI, str::FromStr};

    use super::*;

    const SAMPLE_RATE: u32 = 44100;

    fn sine(frames: usize, frequency: f32) -> Vec<f32> {
        (0..frames)
            .map(|i| (2.0 * PI * frequency * i as f32 / SAMPLE_RATE as f32).sin())
            .collect()
    }

    fn process(processor: &mut TempoPitchProcessor, input: &[f32], block_frames: usize) -> Vec<f32> {
        let channel_count = processor.channel_count();
        let mut output = Vec::new();
        let mut receive = |processor: &mut TempoPitchProcessor| {
            let mut received = vec![0.0; processor.len() * channel_count];
            let frames = processor.receive_samples(&mut received);
            output.extend_from_slice(&received[..frames * channel_count]);
        };
        for block in input.chunks(block_frames * channel_count) {
            processor.put_samples(block);
            receive(processor);
        }
        processor.flush();
        receive(processor);
        output
    }

    /// Estimated frequency of a mono signal from its rising zero crossings.
    fn zero_crossing_frequency(signal: &[f32]) -> f32 {
        let crossings = signal
            .windows(2)
            .filter(|pair| pair[0] < 0.0 && pair[1] >= 0.0)
            .count();
        crossings as f32 * SAMPLE_RATE as f32 / signal.len() as f32
    }

    #[test]
    fn unit_ratios_pass_through() {
        let mut processor = TempoPitchProcessor::new(SAMPLE_RATE, 2).unwrap();
        let input = (0..2 * 5000).map(|i| (i as f32 * 0.01).sin()).collect::<Vec<_>>();
        let output = process(&mut processor, &input, 333);
        assert_eq!(output, input);
        assert_eq!(processor.num_unprocessed_samples(), 0);
    }

    #[test]
    fn faster_tempo_keeps_pitch() {
        const FRAMES: usize = 100_000;
        let mut processor = TempoPitchProcessor::new(SAMPLE_RATE, 1).unwrap();
        processor.set_tempo(1.25).unwrap();
        assert_eq!(processor.rate(), 1.0);

        let output = process(&mut processor, &sine(FRAMES, 440.0), 4096);
        let overlap_length = 352;
        assert!(
            (output.len() as i64 - 80_000).abs() <= overlap_length,
            "got {} frames",
            output.len()
        );

        // no seams: the tail contains the end of stream transition into silence
        let checked = &output[..output.len() - 4000];
        for (n, pair) in checked.windows(2).enumerate() {
            assert!((pair[1] - pair[0]).abs() < 0.1, "discontinuity at {n}");
        }
        let frequency = zero_crossing_frequency(&checked[2000..]);
        assert!((frequency - 440.0).abs() < 20.0, "frequency {frequency}");
    }

    #[test]
    fn octave_up_keeps_duration() {
        const FRAMES: usize = 88_200;
        let mut processor = TempoPitchProcessor::new(SAMPLE_RATE, 1).unwrap();
        processor.set_pitch_semitones(12.0).unwrap();
        assert!((processor.pitch() - 2.0).abs() < 1e-9);
        assert!((processor.tempo() - 0.5).abs() < 1e-9);
        assert!((processor.rate() - 2.0).abs() < 1e-9);

        let output = process(&mut processor, &sine(FRAMES, 220.0), 1024);
        assert!(
            (output.len() as i64 - FRAMES as i64).abs() <= 352 + 64,
            "got {} frames",
            output.len()
        );
        let frequency = zero_crossing_frequency(&output[4000..output.len() - 8000]);
        assert!((frequency - 440.0).abs() < 20.0, "frequency {frequency}");
    }

    #[test]
    fn rate_change_resamples() {
        const FRAMES: usize = 10_000;
        let mut processor = TempoPitchProcessor::new(SAMPLE_RATE, 2).unwrap();
        processor.set_rate_change(-50.0).unwrap();
        assert_eq!(processor.tempo(), 1.0);
        assert_eq!(processor.rate(), 0.5);
        let input = sine(FRAMES, 100.0)
            .into_iter()
            .flat_map(|v| [v, -v])
            .collect::<Vec<_>>();
        let output = process(&mut processor, &input, 512);
        let output_frames = output.len() / 2;
        assert!(
            (output_frames as i64 - 2 * FRAMES as i64).abs() <= 4,
            "got {output_frames} frames"
        );
        assert_eq!(processor.num_unprocessed_samples(), 0);
    }

    #[test]
    fn virtual_ratios() {
        let mut processor = TempoPitchProcessor::new(SAMPLE_RATE, 2).unwrap();
        processor.set_tempo_change(50.0).unwrap();
        processor.set_pitch_octaves(1.0).unwrap();
        assert_eq!(processor.virtual_tempo(), 1.5);
        assert_eq!(processor.tempo(), 0.75);
        assert_eq!(processor.rate(), 2.0);
        processor.set_rate(0.5).unwrap();
        assert_eq!(processor.rate(), 1.0);
        assert_eq!(processor.tempo(), 0.75);

        // invalid values keep the current setup
        assert!(processor.set_tempo(0.0).is_err());
        assert!(processor.set_pitch(f64::INFINITY).is_err());
        assert!(processor.set_rate_change(-100.0).is_err());
        assert_eq!(processor.virtual_tempo(), 1.5);
        assert_eq!(processor.virtual_rate(), 0.5);
        assert_eq!(processor.pitch(), 2.0);
    }

    #[test]
    fn settings() {
        let mut processor = TempoPitchProcessor::new(SAMPLE_RATE, 2).unwrap();
        assert_eq!(processor.setting(Setting::UseAntiAliasFilter), 1);
        assert_eq!(processor.setting(Setting::AntiAliasFilterLength), 64);
        assert_eq!(processor.setting(Setting::UseQuickSeek), 1);
        assert_eq!(processor.setting(Setting::SequenceMs), 0);
        assert_eq!(processor.setting(Setting::SeekWindowMs), 0);
        assert_eq!(processor.setting(Setting::OverlapMs), 8);

        processor.set_setting(Setting::UseQuickSeek, 0).unwrap();
        processor.set_setting(Setting::UseAntiAliasFilter, 0).unwrap();
        processor.set_setting(Setting::AntiAliasFilterLength, 32).unwrap();
        processor.set_setting(Setting::SequenceMs, 40).unwrap();
        processor.set_setting(Setting::SeekWindowMs, 15).unwrap();
        processor.set_setting(Setting::OverlapMs, 10).unwrap();
        assert_eq!(processor.setting(Setting::UseQuickSeek), 0);
        assert_eq!(processor.setting(Setting::UseAntiAliasFilter), 0);
        assert_eq!(processor.setting(Setting::AntiAliasFilterLength), 32);
        assert_eq!(processor.setting(Setting::SequenceMs), 40);
        assert_eq!(processor.setting(Setting::SeekWindowMs), 15);
        assert_eq!(processor.setting(Setting::OverlapMs), 10);
        assert_eq!(processor.stretch_parameters().sequence_ms, Some(40));

        assert_eq!(
            processor.set_setting(Setting::AntiAliasFilterLength, 30),
            Err(Error::FilterLengthError(30))
        );
        assert!(processor.set_setting(Setting::OverlapMs, 0).is_err());
        assert!(processor.set_setting(Setting::SequenceMs, -1).is_err());
        processor.set_setting(Setting::SequenceMs, 0).unwrap();
        assert_eq!(processor.setting(Setting::SequenceMs), 0);

        assert_eq!(
            Setting::from_str("UseQuickSeek").unwrap(),
            Setting::UseQuickSeek
        );
        assert_eq!(Setting::OverlapMs.to_string(), "OverlapMs");
    }

    #[test]
    fn channel_and_rate_changes() {
        let mut processor = TempoPitchProcessor::new(SAMPLE_RATE, 2).unwrap();
        assert!(processor.set_channel_count(0).is_err());
        assert_eq!(processor.channel_count(), 2);
        processor.set_channel_count(1).unwrap();
        processor.set_sample_rate(48000).unwrap();
        assert_eq!(processor.sample_rate(), 48000);
        assert!(processor.set_sample_rate(0).is_err());

        processor.set_tempo(0.8).unwrap();
        processor.put_samples(&sine(20_000, 440.0));
        assert!(!processor.is_empty());
        assert!(processor.num_unprocessed_samples() > 0);
        processor.clear();
        assert!(processor.is_empty());
        assert_eq!(processor.num_unprocessed_samples(), 0);
    }
}
