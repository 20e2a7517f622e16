extern crate symphonia;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rhythm_track::analyzer::segments::parts_for_length;
use rhythm_track::{
    AnalysisConfig, BeatApproach, NoveltyApproach, RhythmAnalyzer, Segmentation, TempoApproach,
};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{self, DecoderOptions},
    errors::Error,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};

#[derive(Parser)]
#[command(name = "rhythm-track", version, about = "Tempo, beat and rhythm-track estimation")]
struct Cli {
    /// Audio file to analyse
    path: PathBuf,

    /// Only analyse the first this many seconds
    #[arg(short, long)]
    duration: Option<f64>,

    /// Onset novelty: energy or spectral
    #[arg(long, default_value = "spectral")]
    novelty: NoveltyApproach,

    /// Tempo estimation: autocorrelation, fourier or hybrid
    #[arg(long, default_value = "autocorrelation")]
    tempo: TempoApproach,

    /// Known tempo in BPM, skips tempo estimation
    #[arg(long)]
    bpm: Option<f64>,

    /// Beat tracking objective: score or penalty
    #[arg(long, default_value = "score")]
    beats: BeatApproach,

    /// Segmentation: parts or chorus-verse
    #[arg(long, default_value = "parts")]
    segmentation: String,

    /// Number of equal parts
    #[arg(long, default_value_t = 4)]
    parts: usize,

    /// Length of each equal part in seconds, overrides --parts
    #[arg(long)]
    part_seconds: Option<f64>,

    /// Samples per analysis frame
    #[arg(long, default_value_t = 2048)]
    frame_length: usize,

    /// Samples between frames
    #[arg(long, default_value_t = 512)]
    hop_length: usize,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Decodes the first audio track of `path` into mono samples.
fn decode(path: &Path, max_seconds: Option<f64>) -> Result<(Vec<f32>, u32)> {
    // Open the media source.
    let src = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    // Create the media source stream.
    let mss = MediaSourceStream::new(Box::new(src), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    // Use the default options for metadata and format readers.
    let meta_opts: MetadataOptions = Default::default();
    let fmt_opts: FormatOptions = Default::default();

    // Probe the media source.
    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &fmt_opts, &meta_opts)
        .context("unsupported format")?;

    // Get the instantiated format reader.
    let mut format = probed.format;

    // Find the first audio track with a known (decodeable) codec.
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != codecs::CODEC_TYPE_NULL)
        .context("no supported audio tracks")?;

    // Use the default options for the decoder.
    let dec_opts: DecoderOptions = Default::default();

    // Create a decoder for the track.
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &dec_opts)
        .context("unsupported codec")?;

    // Store the track identifier, it will be used to filter packets.
    let track_id = track.id;

    let sample_rate = track
        .codec_params
        .sample_rate
        .context("track has no sample rate")?;
    let limit = max_seconds.map(|s| (s.max(0.0) * sample_rate as f64) as usize);

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf = None;

    // The decode loop.
    while limit.map_or(true, |l| samples.len() < l) {
        // Get the next packet from the media format.
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(Error::ResetRequired) => {
                // The track list changed (chained streams). Treat it as the end.
                log::warn!("Track list changed mid-stream, stopping");
                break;
            }
            Err(Error::IoError(_)) => {
                // Assume all IO errors are EOF.
                break;
            }
            Err(err) => return Err(err).context("failed to read packet"),
        };

        // If the packet does not belong to the selected track, skip over it.
        if packet.track_id() != track_id {
            continue;
        }

        // Decode the packet into audio samples.
        match decoder.decode(&packet) {
            Ok(decoded) => {
                // If this is the *first* decoded packet, create a sample buffer matching the
                // decoded audio buffer format.
                if sample_buf.is_none() {
                    let spec = *decoded.spec();
                    // Note: This is capacity, not length!
                    let duration = decoded.capacity() as u64;
                    sample_buf = Some(SampleBuffer::<f32>::new(duration, spec));
                }

                if let Some(buf) = &mut sample_buf {
                    // Sum all channels into one mono channel.
                    let channel_count = decoded.spec().channels.count();
                    buf.copy_interleaved_ref(decoded);
                    samples.extend(
                        buf.samples()
                            .chunks_exact(channel_count)
                            .map(|x| x.iter().sum::<f32>() / x.len() as f32),
                    );
                }
            }
            Err(Error::IoError(_)) | Err(Error::DecodeError(_)) => {
                // The packet failed to decode, skip it.
                continue;
            }
            Err(err) => return Err(err).context("failed to decode packet"),
        }
    }

    if let Some(limit) = limit {
        samples.truncate(limit);
    }
    Ok((samples, sample_rate))
}

fn format_times(times: &[f64]) -> String {
    times
        .iter()
        .map(|t| format!("{t:.3}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let start = Instant::now();
    let (samples, sample_rate) = decode(&cli.path, cli.duration)?;
    if samples.is_empty() {
        bail!("no audio decoded from {}", cli.path.display());
    }
    log::info!(
        "Decoded {} samples at {} Hz in {:.2}s",
        samples.len(),
        sample_rate,
        start.elapsed().as_secs_f64()
    );

    let parts = match cli.part_seconds {
        Some(seconds) => parts_for_length(samples.len() as f64 / sample_rate as f64, seconds),
        None => cli.parts,
    };

    let mut config = AnalysisConfig {
        sample_rate,
        frame_length: cli.frame_length,
        hop_length: cli.hop_length,
        novelty: cli.novelty,
        known_tempo: cli.bpm,
        segmentation: Segmentation::parse(&cli.segmentation, parts)?,
        ..Default::default()
    };
    config.tempo.approach = cli.tempo;
    config.beat.approach = cli.beats;

    let analyzer = RhythmAnalyzer::new(config).context("invalid analysis configuration")?;
    let analysis = analyzer.analyze(&samples)?;

    println!(
        "Tempo: {:.2} bpm (confidence {:.2}{})",
        analysis.tempo.bpm,
        analysis.tempo.confidence,
        if analysis.tempo.reliable { "" } else { ", unreliable" }
    );
    println!(
        "Beats ({}): {}",
        analysis.beats.len(),
        format_times(analysis.beats.times())
    );
    for segment in &analysis.segments {
        println!("Segment: {:.2}s - {:.2}s", segment.start, segment.end);
    }
    println!(
        "Rhythm track ({}): {}",
        analysis.rhythm.len(),
        format_times(analysis.rhythm.times())
    );
    println!(
        "Analysed {:.2} seconds in {:.2} seconds",
        analysis.duration,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
