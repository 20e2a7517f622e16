extern crate apodize;
extern crate rustfft;

#[cfg(test)]
#[macro_use]
extern crate approx;

#[cfg(all(target_arch = "wasm32", target_os = "unknown"))]
#[global_allocator]
static ALLOC: wee_alloc::WeeAlloc = wee_alloc::WeeAlloc::INIT;

pub mod analyzer;
pub mod config;
pub mod dsp;
pub mod error;

pub use analyzer::{
    Analysis, BeatSequence, NoveltyCurve, RhythmAnalyzer, RhythmTrack, Segment, TempoEstimate,
};
pub use config::{
    AnalysisConfig, BeatApproach, NoveltyApproach, Segmentation, TempoApproach,
};
pub use error::ConfigError;

use wasm_bindgen::prelude::wasm_bindgen;

/// Config for a signal at `sample_rate` with approaches chosen by numeric code.
fn config_from_codes(
    sample_rate: u32,
    novelty_code: u32,
    beat_code: u32,
) -> Result<AnalysisConfig, ConfigError> {
    let mut config = AnalysisConfig {
        sample_rate,
        novelty: NoveltyApproach::from_code(novelty_code)?,
        ..Default::default()
    };
    config.beat.approach = BeatApproach::from_code(beat_code)?;
    Ok(config)
}

fn analyze(samples: &[f32], config: AnalysisConfig) -> Result<Analysis, ConfigError> {
    RhythmAnalyzer::new(config)?.analyze(samples)
}

/// Estimated tempo in BPM, or NaN when the configuration is rejected.
#[wasm_bindgen]
pub fn detect_bpm(samples: &[f32], sample_rate: u32) -> f64 {
    let config = AnalysisConfig {
        sample_rate,
        ..Default::default()
    };
    RhythmAnalyzer::new(config)
        .and_then(|analyzer| {
            let novelty = analyzer.novelty(samples)?;
            analyzer.tempo(&novelty)
        })
        .map_or(f64::NAN, |tempo| tempo.bpm)
}

/// Beat times in seconds. Empty when the configuration is rejected.
#[wasm_bindgen]
pub fn track_beats(samples: &[f32], sample_rate: u32, novelty_code: u32, beat_code: u32) -> Vec<f64> {
    config_from_codes(sample_rate, novelty_code, beat_code)
        .and_then(|config| analyze(samples, config))
        .map(|analysis| analysis.beats.times().to_vec())
        .unwrap_or_else(|err| {
            log::error!("Beat tracking failed: {err}");
            Vec::new()
        })
}

/// Rhythm-track times in seconds over `parts` equal segments. Empty when the
/// configuration is rejected.
#[wasm_bindgen]
pub fn track_rhythm(
    samples: &[f32],
    sample_rate: u32,
    novelty_code: u32,
    beat_code: u32,
    parts: u32,
) -> Vec<f64> {
    config_from_codes(sample_rate, novelty_code, beat_code)
        .map(|config| AnalysisConfig {
            segmentation: Segmentation::Parts(parts as usize),
            ..config
        })
        .and_then(|config| analyze(samples, config))
        .map(|analysis| analysis.rhythm.times().to_vec())
        .unwrap_or_else(|err| {
            log::error!("Rhythm tracking failed: {err}");
            Vec::new()
        })
}
