//! The analysis pipeline: novelty, tempo, beats, segments, rhythm track.

pub mod beats;
pub mod novelty;
pub mod rhythm;
pub mod segments;
pub mod tempo;

pub use beats::BeatSequence;
pub use novelty::NoveltyCurve;
pub use rhythm::RhythmTrack;
pub use segments::Segment;
pub use tempo::{fold_tempo, TempoEstimate, Tempogram};

use crate::config::AnalysisConfig;
use crate::error::ConfigError;

/// Everything one pass of the pipeline produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    /// Length of the analysed signal in seconds.
    pub duration: f64,
    pub novelty: NoveltyCurve,
    pub tempo: TempoEstimate,
    pub beats: BeatSequence,
    pub segments: Vec<Segment>,
    pub rhythm: RhythmTrack,
}

/// Runs the whole pipeline with a fixed, validated configuration.
///
/// The analyzer holds no state between calls; one instance can analyse any
/// number of signals sampled at the configured rate.
#[derive(Debug, Clone)]
pub struct RhythmAnalyzer {
    config: AnalysisConfig,
}

impl RhythmAnalyzer {
    pub fn new(config: AnalysisConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        log::debug!(
            "Analyzer: {} Hz, frame {}, hop {}, novelty {}, tempo {}, beats {}, segmentation {}",
            config.sample_rate,
            config.frame_length,
            config.hop_length,
            config.novelty,
            config
                .known_tempo
                .map_or_else(|| config.tempo.approach.to_string(), |bpm| format!("{bpm} BPM (known)")),
            config.beat.approach,
            config.segmentation
        );
        Ok(RhythmAnalyzer { config })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn novelty(&self, samples: &[f32]) -> Result<NoveltyCurve, ConfigError> {
        self.config.novelty.compute(samples, &self.config)
    }

    /// The known tempo when one is configured, otherwise an estimate from `novelty`.
    pub fn tempo(&self, novelty: &NoveltyCurve) -> Result<TempoEstimate, ConfigError> {
        match self.config.known_tempo {
            Some(bpm) => TempoEstimate::known(bpm),
            None => self.config.tempo.approach.estimate(novelty, &self.config.tempo),
        }
    }

    pub fn beats(&self, novelty: &NoveltyCurve, bpm: f64) -> Result<BeatSequence, ConfigError> {
        self.config.beat.approach.track(novelty, bpm, &self.config.beat)
    }

    pub fn segments(&self, samples: &[f32]) -> Result<Vec<Segment>, ConfigError> {
        self.config.segmentation.segment(samples, &self.config)
    }

    pub fn rhythm(
        &self,
        beats: &BeatSequence,
        novelty: &NoveltyCurve,
        segments: &[Segment],
    ) -> Result<RhythmTrack, ConfigError> {
        rhythm::generate(beats, novelty, segments, &self.config.rhythm)
    }

    pub fn analyze(&self, samples: &[f32]) -> Result<Analysis, ConfigError> {
        let duration = self.config.layout().duration(samples.len());

        let novelty = self.novelty(samples)?;
        let tempo = self.tempo(&novelty)?;
        let beats = self.beats(&novelty, tempo.bpm)?;
        let segments = self.segments(samples)?;
        let rhythm = self.rhythm(&beats, &novelty, &segments)?;

        log::info!(
            "Analyzed {:.2}s: {:.2} BPM{}, {} beats, {} segments, {} rhythm clicks",
            duration,
            tempo.bpm,
            if tempo.reliable { "" } else { " (low confidence)" },
            beats.len(),
            segments.len(),
            rhythm.len()
        );

        Ok(Analysis {
            duration,
            novelty,
            tempo,
            beats,
            segments,
            rhythm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::novelty::tests::{click_track, test_config};
    use crate::config::{BeatApproach, NoveltyApproach};

    #[test]
    fn known_tempo_skips_estimation() {
        let config = AnalysisConfig {
            known_tempo: Some(100.0),
            novelty: NoveltyApproach::Energy,
            ..test_config()
        };
        let analyzer = RhythmAnalyzer::new(config).unwrap();
        let clicks: Vec<f64> = (0..16).map(|k| 0.2 + 0.6 * k as f64).collect();
        let analysis = analyzer.analyze(&click_track(8000, 10.0, &clicks)).unwrap();

        assert_eq!(analysis.tempo, TempoEstimate::known(100.0).unwrap());
        assert_eq!(analysis.beats.len(), 16);
        assert_abs_diff_eq!(analysis.beats.times()[0], 0.2, epsilon = 1e-9);
    }

    #[test]
    fn stages_match_full_analysis() {
        let config = AnalysisConfig {
            novelty: NoveltyApproach::Energy,
            ..test_config()
        };
        let analyzer = RhythmAnalyzer::new(config).unwrap();
        let clicks: Vec<f64> = (0..20).map(|k| 0.1 + 0.5 * k as f64).collect();
        let samples = click_track(8000, 10.0, &clicks);

        let analysis = analyzer.analyze(&samples).unwrap();
        let novelty = analyzer.novelty(&samples).unwrap();
        let tempo = analyzer.tempo(&novelty).unwrap();
        let beats = analyzer.beats(&novelty, tempo.bpm).unwrap();

        assert_eq!(analysis.novelty, novelty);
        assert_eq!(analysis.tempo, tempo);
        assert_eq!(analysis.beats, beats);
        assert_ulps_eq!(analysis.duration, 10.0);
    }

    #[test]
    fn rejects_invalid_configuration_up_front() {
        let config = AnalysisConfig {
            known_tempo: Some(-1.0),
            ..test_config()
        };
        assert_eq!(
            RhythmAnalyzer::new(config).unwrap_err(),
            ConfigError::InvalidTempo(-1.0)
        );

        let config = AnalysisConfig {
            known_tempo: Some(0.01),
            ..test_config()
        };
        assert_eq!(
            RhythmAnalyzer::new(config).unwrap_err(),
            ConfigError::TempoOutOfRange {
                bpm: 0.01,
                min: 30.0,
                max: 300.0
            }
        );

        let config = AnalysisConfig {
            frame_length: 0,
            beat: crate::config::BeatConfig {
                approach: BeatApproach::Penalty,
                ..Default::default()
            },
            ..test_config()
        };
        assert_eq!(
            RhythmAnalyzer::new(config).unwrap_err(),
            ConfigError::ZeroFrameLength
        );
    }
}
