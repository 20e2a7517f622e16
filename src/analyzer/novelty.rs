//! Onset novelty curves.
//!
//! Both approaches follow the same recipe: a per-frame feature is log-compressed,
//! differentiated and half-wave rectified (only increases count as onsets), then
//! locally normalised so thresholds downstream do not depend on the approach.
//! The first frame has no predecessor and always gets novelty 0.

use crate::config::{AnalysisConfig, NoveltyApproach};
use crate::dsp::math;
use crate::dsp::spectrum::Spectrum;
use crate::dsp::FrameLayout;
use crate::error::ConfigError;

/// Per-frame onset strength in `[0, 1]`, one value per analysis frame.
#[derive(Debug, Clone, PartialEq)]
pub struct NoveltyCurve {
    values: Vec<f64>,
    hop_seconds: f64,
}

impl NoveltyCurve {
    pub fn new(values: Vec<f64>, hop_seconds: f64) -> Self {
        NoveltyCurve {
            values,
            hop_seconds,
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn hop_seconds(&self) -> f64 {
        self.hop_seconds
    }

    pub fn time(&self, frame: usize) -> f64 {
        frame as f64 * self.hop_seconds
    }

    /// True when no frame carries any onset evidence.
    pub fn is_silent(&self) -> bool {
        self.values.iter().all(|x| *x <= math::EPS)
    }
}

impl NoveltyApproach {
    /// Computes the novelty curve of `samples` with this approach.
    pub fn compute(
        &self,
        samples: &[f32],
        config: &AnalysisConfig,
    ) -> Result<NoveltyCurve, ConfigError> {
        match self {
            NoveltyApproach::Energy => energy_novelty(samples, config),
            NoveltyApproach::Spectral => spectral_novelty(samples, config),
        }
    }
}

/// Root-mean-square energy of each frame.
pub fn rms_energy(samples: &[f32], layout: &FrameLayout) -> Vec<f64> {
    let mut frames = layout.frames(samples);
    let mut energy = Vec::with_capacity(frames.len());
    while let Some((_, frame)) = frames.next_frame() {
        let sum = frame.iter().map(|x| x * x).sum::<f64>();
        energy.push((sum / frame.len() as f64).sqrt());
    }
    energy
}

pub fn energy_novelty(
    samples: &[f32],
    config: &AnalysisConfig,
) -> Result<NoveltyCurve, ConfigError> {
    let layout = config.layout();
    layout.validate()?;
    ConfigError::positive("gamma", config.gamma)?;

    let mut energy = rms_energy(samples, &layout);
    math::log_compress(&mut energy, config.gamma);
    let flux = math::rectified_diff(&energy);

    log::debug!(
        "Energy novelty: {} samples -> {} frames",
        samples.len(),
        flux.len()
    );
    Ok(finish(flux, config))
}

pub fn spectral_novelty(
    samples: &[f32],
    config: &AnalysisConfig,
) -> Result<NoveltyCurve, ConfigError> {
    let layout = config.layout();
    layout.validate()?;
    ConfigError::positive("gamma", config.gamma)?;

    let mut frames = layout.frames(samples);
    let mut flux = Vec::with_capacity(frames.len());
    if frames.is_empty() {
        return Ok(finish(flux, config));
    }

    let mut spectrum = Spectrum::new(layout.frame_length);
    let mut current = vec![0.0; spectrum.bins()];
    let mut previous = vec![0.0; spectrum.bins()];

    while let Some((index, frame)) = frames.next_frame() {
        spectrum.process(frame, &mut current);
        math::log_compress(&mut current, config.gamma);

        let value = if index == 0 {
            0.0
        } else {
            current
                .iter()
                .zip(previous.iter())
                .map(|(now, before)| (now - before).max(0.0))
                .sum()
        };
        flux.push(value);
        std::mem::swap(&mut current, &mut previous);
    }

    log::debug!(
        "Spectral novelty: {} samples -> {} frames of {} bins",
        samples.len(),
        flux.len(),
        spectrum.bins()
    );
    Ok(finish(flux, config))
}

/// Local-average subtraction followed by max normalisation.
fn finish(mut values: Vec<f64>, config: &AnalysisConfig) -> NoveltyCurve {
    math::subtract_local_average(&mut values, config.neighbourhood_frames());
    math::normalize_max(&mut values);

    if !values.is_empty() && values.iter().all(|x| *x == 0.0) {
        log::warn!("Novelty curve is silent ({} frames)", values.len());
    }
    NoveltyCurve::new(values, config.layout().hop_seconds())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::f32::consts::PI;

    /// 10 ms bursts of a 1 kHz tone at the given times.
    pub(crate) fn click_track(sample_rate: u32, seconds: f64, clicks: &[f64]) -> Vec<f32> {
        let len = (seconds * sample_rate as f64) as usize;
        let burst = (sample_rate / 100) as usize;
        let mut samples = vec![0.0f32; len];
        for &time in clicks {
            let start = (time * sample_rate as f64).round() as usize;
            for i in 0..burst {
                if let Some(s) = samples.get_mut(start + i) {
                    *s = (2.0 * PI * 1000.0 * i as f32 / sample_rate as f32).sin();
                }
            }
        }
        samples
    }

    /// 8 kHz audio with 20 ms frames every 10 ms.
    pub(crate) fn test_config() -> AnalysisConfig {
        AnalysisConfig {
            sample_rate: 8000,
            frame_length: 160,
            hop_length: 80,
            ..Default::default()
        }
    }

    fn clicks_at_120_bpm() -> Vec<f64> {
        (0..20).map(|k| 0.1 + 0.5 * k as f64).collect()
    }

    #[test]
    fn energy_peaks_at_click_frames() {
        let config = test_config();
        let samples = click_track(8000, 10.0, &clicks_at_120_bpm());
        let novelty = energy_novelty(&samples, &config).unwrap();

        assert_eq!(novelty.len(), config.layout().frame_count(samples.len()));
        assert_eq!(novelty.len(), 1001);
        for (i, value) in novelty.values().iter().enumerate() {
            if i >= 10 && (i - 10) % 50 == 0 {
                assert_ulps_eq!(*value, 1.0, epsilon = 1e-9);
            } else {
                assert_eq!(*value, 0.0, "frame {i}");
            }
        }
    }

    #[test]
    fn spectral_flux_stays_near_clicks() {
        let config = test_config();
        let samples = click_track(8000, 10.0, &clicks_at_120_bpm());
        let novelty = spectral_novelty(&samples, &config).unwrap();

        assert_eq!(novelty.len(), 1001);
        assert!(novelty.values().iter().all(|x| *x >= 0.0 && *x <= 1.0));
        assert_ulps_eq!(math::max(novelty.values()).unwrap().1, 1.0);
        for (i, value) in novelty.values().iter().enumerate() {
            if *value > 0.0 {
                let offset = (i as i64 - 10).rem_euclid(50);
                assert!(offset <= 2, "frame {i} has novelty {value}");
            }
        }
    }

    #[test]
    fn short_signal_gives_empty_curve() {
        let config = test_config();
        let novelty = energy_novelty(&[0.5; 100], &config).unwrap();
        assert!(novelty.is_empty());
        let novelty = spectral_novelty(&[0.5; 100], &config).unwrap();
        assert!(novelty.is_empty());
    }

    #[test]
    fn silence_gives_zero_curve() {
        let config = test_config();
        let samples = vec![0.0; 8000];
        for approach in [NoveltyApproach::Energy, NoveltyApproach::Spectral] {
            let novelty = approach.compute(&samples, &config).unwrap();
            assert_eq!(novelty.len(), 101);
            assert!(novelty.is_silent());
            assert!(novelty.values().iter().all(|x| *x == 0.0));
        }
    }

    #[test]
    fn novelty_is_deterministic() {
        let config = test_config();
        let samples = click_track(8000, 3.0, &[0.3, 1.1, 2.05]);
        for approach in [NoveltyApproach::Energy, NoveltyApproach::Spectral] {
            let first = approach.compute(&samples, &config).unwrap();
            let second = approach.compute(&samples, &config).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn rejects_zero_hop() {
        let config = AnalysisConfig {
            hop_length: 0,
            ..test_config()
        };
        assert_eq!(
            energy_novelty(&[0.0; 1000], &config),
            Err(ConfigError::ZeroHopLength)
        );
    }
}
