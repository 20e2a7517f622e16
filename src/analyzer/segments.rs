//! Partitioning a piece into contiguous segments.

use crate::analyzer::novelty::rms_energy;
use crate::config::{AnalysisConfig, Segmentation, StructureConfig};
use crate::dsp::spectrum::Spectrum;
use crate::error::ConfigError;

/// Lowest edge of the first descriptor band.
const LOWEST_BAND_HZ: f64 = 50.0;

/// Floor added to band energies before taking logarithms. Keeps leakage and
/// rounding noise in near-empty bands from dominating descriptor distances.
const ENERGY_FLOOR: f64 = 1e-6;

/// Half-open time range `[start, end)` in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
}

impl Segment {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn contains(&self, time: f64) -> bool {
        self.start <= time && time < self.end
    }
}

/// Turns sorted interior boundaries into segments covering `[0, duration)`.
fn from_boundaries(boundaries: &[f64], duration: f64) -> Vec<Segment> {
    if duration <= 0.0 {
        return Vec::new();
    }

    std::iter::once(0.0)
        .chain(boundaries.iter().copied())
        .chain(std::iter::once(duration))
        .collect::<Vec<_>>()
        .windows(2)
        .map(|w| Segment {
            start: w[0],
            end: w[1],
        })
        .collect()
}

/// `count` equal-length segments covering `[0, duration)`. Empty when the
/// duration is zero.
pub fn equal_parts(duration: f64, count: usize) -> Result<Vec<Segment>, ConfigError> {
    if count == 0 {
        return Err(ConfigError::ZeroSegmentCount);
    }
    if !duration.is_finite() || duration < 0.0 {
        return Err(ConfigError::InvalidParameter {
            name: "duration",
            value: duration,
        });
    }

    let boundaries: Vec<f64> = (1..count)
        .map(|i| duration * i as f64 / count as f64)
        .collect();
    Ok(from_boundaries(&boundaries, duration))
}

/// Number of equal parts of roughly `seconds` each, at least 1.
pub fn parts_for_length(duration: f64, seconds: f64) -> usize {
    if !(seconds > 0.0) || !(duration > 0.0) {
        return 1;
    }
    ((duration / seconds).round() as usize).max(1)
}

impl Segmentation {
    pub fn segment(
        &self,
        samples: &[f32],
        config: &AnalysisConfig,
    ) -> Result<Vec<Segment>, ConfigError> {
        let layout = config.layout();
        layout.validate()?;
        let duration = layout.duration(samples.len());

        let segments = match self {
            Segmentation::Parts(count) => equal_parts(duration, *count)?,
            Segmentation::ChorusVerse => chorus_verse(samples, config)?,
        };
        log::debug!(
            "Segmentation ({}): {:?}",
            self,
            segments
                .iter()
                .map(|s| (s.start, s.end))
                .collect::<Vec<_>>()
        );
        Ok(segments)
    }
}

/// Log band energies plus log RMS for consecutive blocks of frames.
pub fn block_descriptors(
    samples: &[f32],
    config: &AnalysisConfig,
) -> Result<Vec<Vec<f64>>, ConfigError> {
    let layout = config.layout();
    layout.validate()?;
    let structure = &config.structure;
    structure.validate()?;

    let per_block = ((structure.block_seconds / layout.hop_seconds()).round() as usize).max(1);
    let block_count = layout.frame_count(samples.len()) / per_block;
    if block_count == 0 {
        return Ok(Vec::new());
    }

    let mut spectrum = Spectrum::new(layout.frame_length);
    let band_of = band_map(
        spectrum.bins(),
        layout.frame_length,
        layout.sample_rate,
        structure.bands,
    );
    let mut bins_per_band = vec![0usize; structure.bands];
    band_of
        .iter()
        .flatten()
        .for_each(|band| bins_per_band[*band] += 1);

    let mut energies = vec![vec![0.0; structure.bands]; block_count];
    let mut magnitudes = vec![0.0; spectrum.bins()];
    let mut frames = layout.frames(samples);
    while let Some((index, frame)) = frames.next_frame() {
        let block = index / per_block;
        if block >= block_count {
            break;
        }
        spectrum.process(frame, &mut magnitudes);
        for (mag, band) in magnitudes.iter().zip(band_of.iter()) {
            if let Some(band) = band {
                energies[block][*band] += mag * mag;
            }
        }
    }

    let rms = rms_energy(samples, &layout);
    let descriptors = energies
        .into_iter()
        .enumerate()
        .map(|(block, bands)| {
            let mut descriptor: Vec<f64> = bands
                .iter()
                .zip(bins_per_band.iter())
                .map(|(energy, bins)| {
                    let mean = energy / (per_block * (*bins).max(1)) as f64;
                    (mean + ENERGY_FLOOR).ln()
                })
                .collect();
            let loudness = rms[block * per_block..(block + 1) * per_block]
                .iter()
                .sum::<f64>()
                / per_block as f64;
            descriptor.push((loudness + ENERGY_FLOOR).ln());
            descriptor
        })
        .collect();

    Ok(descriptors)
}

/// Band index of every spectrum bin, `None` outside the banded range.
fn band_map(bins: usize, frame_length: usize, sample_rate: u32, bands: usize) -> Vec<Option<usize>> {
    let nyquist = (sample_rate as f64 / 2.0).max(2.0 * LOWEST_BAND_HZ);
    let ratio = (nyquist / LOWEST_BAND_HZ).powf(1.0 / bands as f64);

    (0..bins)
        .map(|bin| {
            let freq = bin as f64 * sample_rate as f64 / frame_length as f64;
            if freq < LOWEST_BAND_HZ {
                return None;
            }
            let band = ((freq / LOWEST_BAND_HZ).ln() / ratio.ln()).floor() as usize;
            Some(band.min(bands - 1))
        })
        .collect()
}

/// Dissimilarity between the blocks before and after each block boundary,
/// mapped into `[0, 1)`. Entry `b` scores the boundary at the start of block `b`;
/// entry 0 is always 0.
pub fn boundary_scores(descriptors: &[Vec<f64>], history: usize) -> Vec<f64> {
    let len = descriptors.len();
    let mean = |range: std::ops::Range<usize>| {
        let count = range.len() as f64;
        let mut sum = vec![0.0; descriptors[range.start].len()];
        descriptors[range].iter().for_each(|d| {
            sum.iter_mut().zip(d.iter()).for_each(|(s, x)| *s += x);
        });
        sum.iter_mut().for_each(|s| *s /= count);
        sum
    };

    (0..len)
        .map(|b| {
            if b == 0 {
                return 0.0;
            }
            let before = mean(b.saturating_sub(history)..b);
            let after = mean(b..(b + history).min(len));
            let distance = (before
                .iter()
                .zip(after.iter())
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f64>()
                / before.len() as f64)
                .sqrt();
            1.0 - (-distance).exp()
        })
        .collect()
}

/// Greedy selection of the strongest, well-separated boundaries, in seconds.
fn pick_boundaries(scores: &[f64], block_seconds: f64, duration: f64, config: &StructureConfig) -> Vec<f64> {
    let limit = (duration / config.seconds_per_part).floor() as usize;
    let mut ranked: Vec<usize> = (1..scores.len()).collect();
    ranked.sort_by(|a, b| scores[*b].total_cmp(&scores[*a]));

    let mut chosen: Vec<f64> = Vec::new();
    for block in ranked {
        if chosen.len() >= limit || scores[block] < config.min_dissimilarity {
            break;
        }
        let time = block as f64 * block_seconds;
        let spaced = time >= config.min_segment_seconds
            && duration - time >= config.min_segment_seconds
            && chosen
                .iter()
                .all(|t| (t - time).abs() >= config.min_segment_seconds);
        if spaced {
            log::trace!("Boundary at {time:.2}s, score {:.3}", scores[block]);
            chosen.push(time);
        }
    }

    chosen.sort_by(f64::total_cmp);
    chosen
}

/// Sections bounded where the spectral character changes most against its
/// recent history.
pub fn chorus_verse(samples: &[f32], config: &AnalysisConfig) -> Result<Vec<Segment>, ConfigError> {
    let descriptors = block_descriptors(samples, config)?;
    let layout = config.layout();
    let duration = layout.duration(samples.len());

    let per_block = ((config.structure.block_seconds / layout.hop_seconds()).round() as usize).max(1);
    let block_seconds = layout.frame_time(per_block);

    let scores = boundary_scores(&descriptors, config.structure.history_blocks);
    let boundaries = pick_boundaries(&scores, block_seconds, duration, &config.structure);
    Ok(from_boundaries(&boundaries, duration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::novelty::tests::test_config;
    use std::f64::consts::PI;

    fn is_partition(segments: &[Segment], duration: f64) -> bool {
        segments.first().map(|s| s.start) == Some(0.0)
            && segments.last().map(|s| s.end) == Some(duration)
            && segments.windows(2).all(|w| w[0].end == w[1].start)
            && segments.iter().all(|s| s.start < s.end)
    }

    /// Sine sections at 8 kHz with the phase carried across section changes.
    fn tones(sections: &[(f64, usize)]) -> Vec<f32> {
        let mut phase = 0.0f64;
        let mut samples = Vec::new();
        for &(freq, seconds) in sections {
            let step = 2.0 * PI * freq / 8000.0;
            for _ in 0..seconds * 8000 {
                samples.push((0.5 * phase.sin()) as f32);
                phase = (phase + step) % (2.0 * PI);
            }
        }
        samples
    }

    #[test]
    fn equal_parts_cover_the_piece() {
        let segments = equal_parts(40.0, 4).unwrap();
        assert_eq!(segments.len(), 4);
        assert!(is_partition(&segments, 40.0));
        for (i, segment) in segments.iter().enumerate() {
            assert_ulps_eq!(segment.start, 10.0 * i as f64);
            assert_ulps_eq!(segment.duration(), 10.0);
        }

        let segments = equal_parts(7.3, 3).unwrap();
        assert!(is_partition(&segments, 7.3));
        assert!(equal_parts(0.0, 3).unwrap().is_empty());
        assert_eq!(equal_parts(10.0, 0), Err(ConfigError::ZeroSegmentCount));
    }

    #[test]
    fn part_count_from_length() {
        assert_eq!(parts_for_length(40.0, 10.0), 4);
        assert_eq!(parts_for_length(44.0, 10.0), 4);
        assert_eq!(parts_for_length(3.0, 10.0), 1);
        assert_eq!(parts_for_length(40.0, 0.0), 1);
    }

    #[test]
    fn segment_is_half_open() {
        let segment = Segment {
            start: 1.0,
            end: 2.0,
        };
        assert!(segment.contains(1.0));
        assert!(segment.contains(1.999));
        assert!(!segment.contains(2.0));
    }

    #[test]
    fn segmentation_uses_signal_duration() {
        let config = test_config();
        let samples = vec![0.0; 8000 * 40];
        let segments = Segmentation::Parts(4).segment(&samples, &config).unwrap();
        assert_eq!(segments.len(), 4);
        assert!(is_partition(&segments, 40.0));
    }

    #[test]
    fn boundary_scores_peak_at_change() {
        let descriptors: Vec<Vec<f64>> = (0..20)
            .map(|i| vec![if i < 12 { 0.0 } else { 2.0 }; 3])
            .collect();
        let scores = boundary_scores(&descriptors, 4);
        assert_eq!(scores.len(), 20);
        assert_eq!(scores[0], 0.0);
        assert_eq!(math_max_index(&scores), 12);
        assert_abs_diff_eq!(scores[12], 1.0 - (-2.0f64).exp(), epsilon = 1e-12);
        assert_eq!(scores[5], 0.0);
    }

    fn math_max_index(data: &[f64]) -> usize {
        crate::dsp::math::max(data).unwrap().0
    }

    #[test]
    fn chorus_verse_finds_timbre_change() {
        let config = test_config();
        let samples = tones(&[(440.0, 30), (3000.0, 30)]);
        let segments = Segmentation::ChorusVerse.segment(&samples, &config).unwrap();

        assert_eq!(segments.len(), 2);
        assert!(is_partition(&segments, 60.0));
        // the block holding the change may win over the one after it
        let block = config.structure.block_seconds;
        assert_abs_diff_eq!(segments[0].end, 30.0, epsilon = block + 1e-9);
    }

    #[test]
    fn steady_signal_stays_whole() {
        let config = test_config();
        let samples = tones(&[(440.0, 60)]);
        let segments = Segmentation::ChorusVerse.segment(&samples, &config).unwrap();
        assert_eq!(segments.len(), 1);
        assert!(is_partition(&segments, 60.0));

        let silence = vec![0.0; 8000 * 30];
        let segments = chorus_verse(&silence, &config).unwrap();
        assert_eq!(segments, vec![Segment { start: 0.0, end: 30.0 }]);
    }

    #[test]
    fn short_signal_has_no_descriptors() {
        let config = test_config();
        assert!(block_descriptors(&[0.1; 100], &config).unwrap().is_empty());
        assert!(chorus_verse(&[], &config).unwrap().is_empty());
    }
}
