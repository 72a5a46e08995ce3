//! Changes the tempo and pitch of a WAV file and writes the result into a new WAV file.
//!
//! Example: `cargo run --example stretch-file -- -i in.wav -o out.wav --tempo 1.25 --pitch 2`

use std::{error::Error, path::PathBuf};

use arg::{parse_args, Args};

use strum::VariantNames;

use timewarp::{SamplePipe, SeekMode, Setting, TempoPitchProcessor};

// -------------------------------------------------------------------------------------------------

const DEFAULT_LOG_LEVEL: log::Level = if cfg!(debug_assertions) {
    log::Level::Debug
} else {
    log::Level::Warn
};

const BLOCK_FRAMES: usize = 4096;

// -------------------------------------------------------------------------------------------------

/// Program arguments.
#[derive(Args, Debug, Default)]
struct Arguments {
    #[arg(short = "i", long = "input")]
    /// WAV file to read.
    input_path: Option<PathBuf>,
    #[arg(short = "o", long = "output")]
    /// WAV file to write. By default \"<input>-stretched.wav\".
    output_path: Option<PathBuf>,
    #[arg(short = "t", long = "tempo")]
    /// Tempo ratio: 1 is the original tempo. By default 1.
    tempo: Option<f64>,
    #[arg(short = "p", long = "pitch")]
    /// Pitch change in semitones. By default 0.
    pitch: Option<f64>,
    #[arg(short = "r", long = "rate")]
    /// Playback rate, which changes tempo and pitch. By default 1.
    rate: Option<f64>,
    #[arg(short = "s", long = "seek-mode")]
    /// Overlap position search: \"Quick\" or the slower, exhaustive \"Full\" search.
    /// By default \"Quick\".
    seek_mode: Option<String>,
    #[arg(short = "l", long = "log-level")]
    /// Set logging level to \"debug\", \"info\", \"warn\" or \"error\".
    /// By default \"debug\" in dev builds and \"warn\" in release builds.
    log_level: Option<log::Level>,
}

// -------------------------------------------------------------------------------------------------

fn read_wav(path: &PathBuf) -> Result<(hound::WavSpec, Vec<f32>), Box<dyn Error>> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|value| value as f32 * scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };
    Ok((spec, samples))
}

fn write_wav(
    path: &PathBuf,
    sample_rate: u32,
    channel_count: usize,
    samples: &[f32],
) -> Result<(), Box<dyn Error>> {
    let spec = hound::WavSpec {
        channels: channel_count as u16,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for sample in samples {
        writer.write_sample(*sample)?;
    }
    writer.finalize()?;
    Ok(())
}

// -------------------------------------------------------------------------------------------------

fn main() -> Result<(), Box<dyn Error>> {
    // Parse arguments and init logger
    let args = parse_args::<Arguments>();
    simple_logger::SimpleLogger::new()
        .with_level(args.log_level.unwrap_or(DEFAULT_LOG_LEVEL).to_level_filter())
        .init()?;

    let input_path = args
        .input_path
        .clone()
        .ok_or("Missing input file path: pass it via `--input`")?;
    let output_path = args.output_path.clone().unwrap_or_else(|| {
        let stem = input_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        input_path.with_file_name(format!("{stem}-stretched.wav"))
    });

    // Read input
    let (spec, input) = read_wav(&input_path)?;
    let channel_count = spec.channels as usize;
    log::info!(
        "Read {} frames from '{}'",
        input.len() / channel_count,
        input_path.display()
    );

    // Configure processor
    let mut processor = TempoPitchProcessor::new(spec.sample_rate, channel_count)?;
    processor.set_tempo(args.tempo.unwrap_or(1.0))?;
    processor.set_rate(args.rate.unwrap_or(1.0))?;
    processor.set_pitch_semitones(args.pitch.unwrap_or(0.0))?;
    let seek_mode = match &args.seek_mode {
        Some(name) => name.parse::<SeekMode>().map_err(|_| {
            format!(
                "Invalid seek mode '{name}': expected one of {}",
                SeekMode::VARIANTS.join(", ")
            )
        })?,
        None => SeekMode::default(),
    };
    log::info!("Using {seek_mode} overlap seeking");
    processor.set_setting(Setting::UseQuickSeek, (seek_mode == SeekMode::Quick) as i32)?;

    // Process
    let mut output = Vec::new();
    let mut receive = |processor: &mut TempoPitchProcessor| {
        let start = output.len();
        output.resize(start + processor.len() * channel_count, 0.0);
        processor.receive_samples(&mut output[start..]);
    };
    for block in input.chunks(BLOCK_FRAMES * channel_count) {
        processor.put_samples(block);
        receive(&mut processor);
    }
    processor.flush();
    receive(&mut processor);

    // Write output
    write_wav(&output_path, spec.sample_rate, channel_count, &output)?;
    log::info!(
        "Wrote {} frames to '{}'",
        output.len() / channel_count,
        output_path.display()
    );

    Ok(())
}
