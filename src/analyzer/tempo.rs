//! Global tempo estimation from a novelty curve.

use std::f64::consts::PI;

use rustfft::num_complex::Complex64;
use rustfft::FftPlanner;

use crate::analyzer::novelty::NoveltyCurve;
use crate::config::{TempoApproach, TempoConfig};
use crate::dsp::math::{self, EPS};
use crate::error::ConfigError;

/// A single dominant tempo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoEstimate {
    pub bpm: f64,

    /// Strength of the periodicity behind `bpm`, in `[0, 1]`.
    pub confidence: f64,

    /// False when the estimate is a fallback or its confidence is below the
    /// configured minimum.
    pub reliable: bool,
}

impl TempoEstimate {
    /// A tempo supplied by the caller rather than estimated.
    pub fn known(bpm: f64) -> Result<Self, ConfigError> {
        check_tempo(bpm)?;
        Ok(TempoEstimate {
            bpm,
            confidence: 1.0,
            reliable: true,
        })
    }

    fn fallback(config: &TempoConfig) -> Self {
        log::warn!(
            "No usable periodicity in novelty curve, falling back to {} BPM",
            config.fallback_bpm
        );
        TempoEstimate {
            bpm: config.fallback_bpm,
            confidence: 0.0,
            reliable: false,
        }
    }

    /// Seconds between consecutive beats.
    pub fn interval_seconds(&self) -> f64 {
        60.0 / self.bpm
    }
}

pub(crate) fn check_tempo(bpm: f64) -> Result<(), ConfigError> {
    if bpm.is_finite() && bpm > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidTempo(bpm))
    }
}

/// Periodicity strength evaluated at integer BPMs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tempogram {
    pub bpms: Vec<f64>,
    pub strengths: Vec<f64>,
}

impl Tempogram {
    fn over_range(config: &TempoConfig, strength: impl FnMut(f64) -> f64) -> Self {
        let bpms: Vec<f64> = (config.min_bpm.ceil() as usize..=config.max_bpm.floor() as usize)
            .map(|b| b as f64)
            .collect();
        let strengths = bpms.iter().copied().map(strength).collect();
        Tempogram { bpms, strengths }
    }

    pub fn is_empty(&self) -> bool {
        self.bpms.is_empty()
    }

    /// BPM with the highest strength.
    pub fn peak(&self) -> Option<f64> {
        math::max(&self.strengths).map(|(i, _)| self.bpms[i])
    }

    fn is_silent(&self) -> bool {
        self.strengths.iter().all(|x| *x <= EPS)
    }
}

/// Doubles or halves `bpm` until it lies within `[min_bpm, max_bpm]`.
///
/// The range must span at least one octave.
pub fn fold_tempo(bpm: f64, min_bpm: f64, max_bpm: f64) -> f64 {
    if !(bpm.is_finite() && bpm > 0.0) {
        return bpm;
    }

    let mut bpm = bpm;
    while bpm > max_bpm {
        bpm /= 2.0;
    }
    while bpm < min_bpm {
        bpm *= 2.0;
    }
    bpm
}

impl TempoApproach {
    pub fn estimate(
        &self,
        novelty: &NoveltyCurve,
        config: &TempoConfig,
    ) -> Result<TempoEstimate, ConfigError> {
        config.validate()?;
        ConfigError::positive("hop_seconds", novelty.hop_seconds())?;

        let estimate = match self {
            TempoApproach::Autocorrelation => estimate_autocorrelation(novelty, config),
            TempoApproach::Fourier => {
                dominant_tempo(&fourier_tempogram(novelty, config), config)
            }
            TempoApproach::Hybrid => dominant_tempo(&hybrid_tempogram(novelty, config), config),
        };

        let estimate = match estimate {
            Some((bpm, confidence)) => TempoEstimate {
                bpm: fold_tempo(bpm, config.min_bpm, config.max_bpm),
                confidence,
                reliable: confidence >= config.min_confidence,
            },
            None => TempoEstimate::fallback(config),
        };

        log::debug!(
            "Tempo ({}): {:.2} BPM, confidence {:.3}",
            self,
            estimate.bpm,
            estimate.confidence
        );
        Ok(estimate)
    }

    /// Per-BPM periodicity strength as seen by this approach.
    pub fn tempogram(
        &self,
        novelty: &NoveltyCurve,
        config: &TempoConfig,
    ) -> Result<Tempogram, ConfigError> {
        config.validate()?;
        ConfigError::positive("hop_seconds", novelty.hop_seconds())?;

        Ok(match self {
            TempoApproach::Autocorrelation => autocorrelation_tempogram(novelty, config),
            TempoApproach::Fourier => fourier_tempogram(novelty, config),
            TempoApproach::Hybrid => hybrid_tempogram(novelty, config),
        })
    }
}

/// Autocorrelation of `data` for every lag, normalised so lag 0 is 1.
/// All zeros when `data` carries no energy.
pub fn autocorrelation(data: &[f64]) -> Vec<f64> {
    let len = data.len();
    if len == 0 {
        return Vec::new();
    }

    // zero padding to twice the length avoids circular wrap-around
    let fft_len = (2 * len).next_power_of_two();
    let mut planner = FftPlanner::new();
    let forward = planner.plan_fft_forward(fft_len);
    let inverse = planner.plan_fft_inverse(fft_len);

    let mut buffer = vec![Complex64::new(0.0, 0.0); fft_len];
    buffer
        .iter_mut()
        .zip(data.iter())
        .for_each(|(b, x)| *b = Complex64::new(*x, 0.0));

    forward.process(&mut buffer);
    buffer
        .iter_mut()
        .for_each(|b| *b = Complex64::new(b.norm_sqr(), 0.0));
    inverse.process(&mut buffer);

    let zero = buffer[0].re;
    if zero <= EPS {
        return vec![0.0; len];
    }
    buffer.iter().take(len).map(|b| b.re / zero).collect()
}

fn lag_to_bpm(lag: f64, hop_seconds: f64) -> f64 {
    60.0 / (lag * hop_seconds)
}

fn bpm_to_lag(bpm: f64, hop_seconds: f64) -> f64 {
    60.0 / (bpm * hop_seconds)
}

/// Linearly interpolated value of `data` at a fractional index.
fn interpolate(data: &[f64], index: f64) -> f64 {
    if data.is_empty() || index < 0.0 || index > (data.len() - 1) as f64 {
        return 0.0;
    }
    let i = index.floor() as usize;
    let frac = index - i as f64;
    match data.get(i + 1) {
        Some(next) => data[i] * (1.0 - frac) + next * frac,
        None => data[i],
    }
}

/// Picks the prior-weighted autocorrelation peak, refines it and checks
/// whether half the lag (double the tempo) is nearly as periodic.
fn estimate_autocorrelation(novelty: &NoveltyCurve, config: &TempoConfig) -> Option<(f64, f64)> {
    let hop = novelty.hop_seconds();
    let acf = autocorrelation(novelty.values());
    if acf.iter().all(|x| *x <= EPS) {
        return None;
    }

    let min_lag = (bpm_to_lag(config.max_bpm, hop).floor() as usize).max(1);
    let max_lag = (bpm_to_lag(config.min_bpm, hop).ceil() as usize).min(acf.len() - 1);
    if min_lag > max_lag {
        log::debug!(
            "Novelty curve of {} frames too short for lags {}..{}",
            acf.len(),
            min_lag,
            max_lag
        );
        return None;
    }

    let weighted: Vec<f64> = (min_lag..=max_lag)
        .map(|lag| {
            let bpm = lag_to_bpm(lag as f64, hop);
            acf[lag] * math::tempo_prior(bpm, config.preferred_bpm, config.prior_octaves)
        })
        .collect();
    let (offset, score) = math::max(&weighted)?;
    if score <= EPS {
        return None;
    }

    let mut lag = min_lag + offset;
    let mut refined = lag as f64 + refine(&weighted, offset);
    log::trace!("Autocorrelation peak at lag {lag} ({refined:.3})");

    let half = (refined / 2.0).round() as usize;
    if half >= 1 && lag_to_bpm(refined / 2.0, hop) <= config.max_bpm {
        let first = half.saturating_sub(1).max(1);
        let neighbourhood = &acf[first..=(half + 1).min(acf.len() - 1)];
        if let Some((i, strength)) = math::max(neighbourhood) {
            if strength >= config.octave_ratio * acf[lag] {
                lag = first + i;
                refined = lag as f64 + refine(&acf, lag);
                log::debug!("Octave check moved the peak to lag {lag}");
            }
        }
    }

    Some((lag_to_bpm(refined, hop), acf[lag].clamp(0.0, 1.0)))
}

/// Parabolic offset of the peak at `index`, zero at the edges.
fn refine(data: &[f64], index: usize) -> f64 {
    if index == 0 || index + 1 >= data.len() {
        return 0.0;
    }
    math::parabolic_offset(data[index - 1], data[index], data[index + 1])
}

/// Autocorrelation strength at the lag of each BPM.
pub fn autocorrelation_tempogram(novelty: &NoveltyCurve, config: &TempoConfig) -> Tempogram {
    let hop = novelty.hop_seconds();
    let acf = autocorrelation(novelty.values());
    Tempogram::over_range(config, |bpm| {
        interpolate(&acf, bpm_to_lag(bpm, hop)).max(0.0)
    })
}

/// Short-time Fourier tempogram: the magnitude of Hann-windowed novelty at
/// each BPM's frequency, summed over half-overlapping windows and scaled to a
/// maximum of 1.
pub fn fourier_tempogram(novelty: &NoveltyCurve, config: &TempoConfig) -> Tempogram {
    let values = novelty.values();
    let hop = novelty.hop_seconds();
    if values.len() < 2 {
        return Tempogram::over_range(config, |_| 0.0);
    }

    let win_len = ((config.window_seconds / hop).round() as usize).clamp(2, values.len());
    let step = (win_len / 2).max(1);
    let window: Vec<f64> = apodize::hanning_iter(win_len).collect();
    let starts: Vec<usize> = (0..=values.len() - win_len).step_by(step).collect();

    let mut tempogram = Tempogram::over_range(config, |bpm| {
        let omega = 2.0 * PI * bpm / 60.0 * hop;
        let kernel: Vec<Complex64> = (0..win_len)
            .map(|n| Complex64::from_polar(window[n], -omega * n as f64))
            .collect();

        starts
            .iter()
            .map(|&start| {
                values[start..start + win_len]
                    .iter()
                    .zip(kernel.iter())
                    .map(|(x, k)| k.scale(*x))
                    .sum::<Complex64>()
                    .norm()
            })
            .sum()
    });
    math::normalize_max(&mut tempogram.strengths);

    log::trace!(
        "Fourier tempogram: {} windows of {} frames",
        starts.len(),
        win_len
    );
    tempogram
}

/// Product of Fourier and autocorrelation strengths, log-compressed.
/// Periodicities only one of the two sees are suppressed.
pub fn hybrid_tempogram(novelty: &NoveltyCurve, config: &TempoConfig) -> Tempogram {
    let fourier = fourier_tempogram(novelty, config);
    let acf = autocorrelation_tempogram(novelty, config);

    let mut strengths: Vec<f64> = fourier
        .strengths
        .iter()
        .zip(acf.strengths.iter())
        .map(|(f, a)| (5.0 * f * a).ln_1p())
        .collect();
    math::normalize_max(&mut strengths);

    Tempogram {
        bpms: fourier.bpms,
        strengths,
    }
}

/// Groups the strongest prior-weighted BPMs and returns the rank-weighted mean
/// of the heaviest group, with the tempogram's peak contrast as confidence.
fn dominant_tempo(tempogram: &Tempogram, config: &TempoConfig) -> Option<(f64, f64)> {
    if tempogram.is_empty() || tempogram.is_silent() {
        return None;
    }

    let weighted: Vec<f64> = tempogram
        .bpms
        .iter()
        .zip(tempogram.strengths.iter())
        .map(|(bpm, s)| s * math::tempo_prior(*bpm, config.preferred_bpm, config.prior_octaves))
        .collect();

    let mut ranked: Vec<usize> = (0..weighted.len()).collect();
    ranked.sort_by(|a, b| weighted[*b].total_cmp(&weighted[*a]));
    ranked.truncate(config.dominant_values);

    // rank 0 weighs `dominant_values`, the last one weighs 1
    let candidates: Vec<(f64, f64)> = ranked
        .iter()
        .enumerate()
        .map(|(rank, i)| (tempogram.bpms[*i], (config.dominant_values - rank) as f64))
        .collect();

    let group_of = |centre: f64| {
        candidates
            .iter()
            .filter(move |(bpm, _)| (bpm - centre).abs() <= config.similarity_bpm)
    };
    let (centre, _) = candidates.iter().copied().fold(None, |best, (bpm, _)| {
        let weight = group_of(bpm).map(|(_, w)| w).sum::<f64>();
        match best {
            Some((_, w)) if weight <= w => best,
            _ => Some((bpm, weight)),
        }
    })?;

    let (sum, total) = group_of(centre).fold((0.0, 0.0), |(sum, total), (bpm, w)| {
        (sum + bpm * w, total + w)
    });
    let bpm = sum / total;

    let max = weighted.iter().copied().fold(0.0, f64::max);
    let mean = weighted.iter().sum::<f64>() / weighted.len() as f64;
    let confidence = (1.0 - mean / max).clamp(0.0, 1.0);

    log::trace!("Dominant tempo candidates {:?} -> {:.2}", candidates, bpm);
    Some((bpm, confidence))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOP: f64 = 0.01;

    /// Unit impulses every `period` frames starting at frame 10.
    fn impulses(len: usize, period: usize) -> NoveltyCurve {
        let mut values = vec![0.0; len];
        values
            .iter_mut()
            .skip(10)
            .step_by(period)
            .for_each(|x| *x = 1.0);
        NoveltyCurve::new(values, HOP)
    }

    #[test]
    fn folds_into_range() {
        assert_eq!(fold_tempo(500.0, 30.0, 300.0), 250.0);
        assert_eq!(fold_tempo(20.0, 30.0, 300.0), 40.0);
        assert_eq!(fold_tempo(120.0, 30.0, 300.0), 120.0);
        assert_eq!(fold_tempo(1000.0, 30.0, 300.0), 250.0);
    }

    #[test]
    fn autocorrelation_of_impulse_train() {
        let acf = autocorrelation(&[1.0, 0.0, 1.0, 0.0, 1.0, 0.0]);
        assert_abs_diff_eq!(acf[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(acf[1], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(acf[2], 2.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(acf[4], 1.0 / 3.0, epsilon = 1e-12);
        assert_eq!(autocorrelation(&[0.0; 4]), vec![0.0; 4]);
    }

    #[test]
    fn autocorrelation_finds_click_tempo() {
        let config = TempoConfig::default();
        let estimate = TempoApproach::Autocorrelation
            .estimate(&impulses(1001, 50), &config)
            .unwrap();
        assert_abs_diff_eq!(estimate.bpm, 120.0, epsilon = 1e-6);
        assert_abs_diff_eq!(estimate.confidence, 0.95, epsilon = 1e-9);
        assert!(estimate.reliable);
    }

    #[test]
    fn prior_keeps_slow_tempo_at_its_octave() {
        let config = TempoConfig::default();
        let estimate = TempoApproach::Autocorrelation
            .estimate(&impulses(1001, 100), &config)
            .unwrap();
        assert_abs_diff_eq!(estimate.bpm, 60.0, epsilon = 1e-6);
    }

    /// Accents every 100 frames from frame 10 with `offbeat` halfway between.
    fn accented(offbeat: f64) -> NoveltyCurve {
        let mut values = vec![0.0; 1001];
        (10..1001).step_by(100).for_each(|i| values[i] = 1.0);
        (60..1001).step_by(100).for_each(|i| values[i] = offbeat);
        NoveltyCurve::new(values, HOP)
    }

    #[test]
    fn strong_half_lag_doubles_the_tempo() {
        let config = TempoConfig {
            preferred_bpm: 60.0,
            prior_octaves: 0.5,
            ..Default::default()
        };
        // acf: 0.9 at lag 100 (picked by the prior), 9.5 / 12.5 = 0.76 at lag 50
        let estimate = TempoApproach::Autocorrelation
            .estimate(&accented(0.5), &config)
            .unwrap();
        assert_abs_diff_eq!(estimate.bpm, 120.0, epsilon = 1e-6);
        assert_abs_diff_eq!(estimate.confidence, 0.76, epsilon = 1e-9);
    }

    #[test]
    fn weak_half_lag_keeps_the_tempo() {
        let config = TempoConfig {
            preferred_bpm: 60.0,
            prior_octaves: 0.5,
            ..Default::default()
        };
        // 4.75 / 10.625 at lag 50 stays below 0.8 of the lag-100 peak
        let estimate = TempoApproach::Autocorrelation
            .estimate(&accented(0.25), &config)
            .unwrap();
        assert_abs_diff_eq!(estimate.bpm, 60.0, epsilon = 1e-6);
        assert_abs_diff_eq!(estimate.confidence, 0.9, epsilon = 1e-9);

        let lenient = TempoConfig {
            octave_ratio: 0.4,
            ..config
        };
        let estimate = TempoApproach::Autocorrelation
            .estimate(&accented(0.25), &lenient)
            .unwrap();
        assert_abs_diff_eq!(estimate.bpm, 120.0, epsilon = 1e-6);
    }

    #[test]
    fn fourier_and_hybrid_find_click_tempo() {
        let config = TempoConfig::default();
        let novelty = impulses(1001, 50);
        for approach in [TempoApproach::Fourier, TempoApproach::Hybrid] {
            let estimate = approach.estimate(&novelty, &config).unwrap();
            assert_abs_diff_eq!(estimate.bpm, 120.0, epsilon = 2.0);
            assert!(estimate.confidence > 0.0 && estimate.confidence <= 1.0);
        }
    }

    #[test]
    fn tempogram_spans_search_range() {
        let config = TempoConfig::default();
        let tempogram = TempoApproach::Fourier
            .tempogram(&impulses(1001, 50), &config)
            .unwrap();
        assert_eq!(tempogram.bpms.len(), 271);
        assert_eq!(tempogram.bpms[0], 30.0);
        assert_eq!(tempogram.bpms[270], 300.0);
        assert!(tempogram.strengths.iter().all(|s| (0.0..=1.0).contains(s)));

        let tempogram = TempoApproach::Autocorrelation
            .tempogram(&impulses(1001, 50), &config)
            .unwrap();
        assert_eq!(tempogram.peak(), Some(120.0));
        assert_abs_diff_eq!(tempogram.strengths[90], 0.95, epsilon = 1e-9);
    }

    #[test]
    fn silence_falls_back() {
        let config = TempoConfig::default();
        let silent = NoveltyCurve::new(vec![0.0; 500], HOP);
        let empty = NoveltyCurve::new(Vec::new(), HOP);
        for approach in [
            TempoApproach::Autocorrelation,
            TempoApproach::Fourier,
            TempoApproach::Hybrid,
        ] {
            for novelty in [&silent, &empty] {
                let estimate = approach.estimate(novelty, &config).unwrap();
                assert_eq!(estimate.bpm, 120.0);
                assert_eq!(estimate.confidence, 0.0);
                assert!(!estimate.reliable);
            }
        }
    }

    #[test]
    fn estimates_are_deterministic() {
        let config = TempoConfig::default();
        let novelty = impulses(700, 37);
        for approach in [
            TempoApproach::Autocorrelation,
            TempoApproach::Fourier,
            TempoApproach::Hybrid,
        ] {
            assert_eq!(
                approach.estimate(&novelty, &config),
                approach.estimate(&novelty, &config)
            );
        }
    }

    #[test]
    fn rejects_invalid_tempo() {
        assert_eq!(TempoEstimate::known(0.0), Err(ConfigError::InvalidTempo(0.0)));
        assert!(TempoEstimate::known(f64::NAN).is_err());
        assert_eq!(TempoEstimate::known(90.0).unwrap().interval_seconds(), 60.0 / 90.0);
    }
}
