//! Sub-beat click placement.
//!
//! Between every pair of consecutive beats, local novelty maxima that are
//! strong relative to their segment become extra clicks. Within a segment only
//! clicks falling on the most common positions inside the beat gap survive, so
//! the added pattern repeats from beat to beat instead of following every
//! stray onset.

use crate::analyzer::beats::BeatSequence;
use crate::analyzer::novelty::NoveltyCurve;
use crate::analyzer::segments::Segment;
use crate::config::RhythmConfig;
use crate::dsp::math::EPS;
use crate::error::ConfigError;

/// Beats merged with added sub-beat clicks, in seconds.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RhythmTrack {
    times: Vec<f64>,
    added: usize,
}

impl RhythmTrack {
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Number of clicks that are not beats.
    pub fn added(&self) -> usize {
        self.added
    }
}

/// A sub-beat candidate: its time and position within the beat gap in `(0, 1)`.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    time: f64,
    phase: f64,
}

/// Index of the segment owning `time`; times past the end belong to the last one.
fn segment_of(segments: &[Segment], time: f64) -> Option<usize> {
    segments.iter().position(|s| s.contains(time)).or_else(|| {
        let last = segments.len().checked_sub(1)?;
        (time >= segments[last].end).then_some(last)
    })
}

/// Local maxima of `values` strictly inside `(first, last)` frames, at least
/// `margin` frames from both ends, reaching `threshold`.
fn local_maxima(
    values: &[f64],
    first: usize,
    last: usize,
    margin: usize,
    threshold: f64,
) -> impl Iterator<Item = usize> + '_ {
    let lo = first + margin.max(1);
    let hi = last
        .saturating_sub(margin.max(1))
        .min(values.len().saturating_sub(2));
    (lo..=hi).filter(move |&f| {
        values[f] > EPS
            && values[f] >= threshold
            && values[f] > values[f - 1]
            && values[f] >= values[f + 1]
    })
}

/// Keeps candidates near the `keep` most populated phases.
fn dominant_phase_filter(candidates: Vec<Candidate>, keep: usize, tolerance: f64) -> Vec<Candidate> {
    if keep == 0 || candidates.is_empty() {
        return candidates;
    }

    let support = |phase: f64| {
        candidates
            .iter()
            .filter(|c| (c.phase - phase).abs() <= tolerance)
            .count()
    };
    let mut ranked: Vec<(f64, usize)> = candidates.iter().map(|c| (c.phase, support(c.phase))).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.total_cmp(&b.0)));

    let mut centres: Vec<f64> = Vec::with_capacity(keep);
    for (phase, _) in ranked {
        if centres.len() >= keep {
            break;
        }
        if centres.iter().all(|c| (c - phase).abs() > tolerance) {
            centres.push(phase);
        }
    }
    log::trace!("Dominant sub-beat phases: {centres:?}");

    candidates
        .into_iter()
        .filter(|c| centres.iter().any(|p| (c.phase - p).abs() <= tolerance))
        .collect()
}

/// Adds sub-beat clicks between the beats of every segment.
pub fn generate(
    beats: &BeatSequence,
    novelty: &NoveltyCurve,
    segments: &[Segment],
    config: &RhythmConfig,
) -> Result<RhythmTrack, ConfigError> {
    config.validate()?;

    let mut added: Vec<f64> = Vec::new();
    if !novelty.is_empty() && beats.len() >= 2 && !segments.is_empty() {
        let hop = novelty.hop_seconds();
        ConfigError::positive("hop_seconds", hop)?;
        let values = novelty.values();
        let margin = (config.collapse_tolerance / hop).ceil() as usize;

        let mut per_segment: Vec<Vec<Candidate>> = vec![Vec::new(); segments.len()];
        let peaks: Vec<f64> = segments
            .iter()
            .map(|s| {
                values
                    .iter()
                    .enumerate()
                    .filter(|(f, _)| s.contains(novelty.time(*f)))
                    .map(|(_, v)| *v)
                    .fold(0.0, f64::max)
            })
            .collect();

        for pair in beats.frames().windows(2) {
            let (first, last) = (pair[0], pair[1]);
            let Some(segment) = segment_of(segments, novelty.time(first)) else {
                continue;
            };
            if peaks[segment] <= EPS || first >= values.len() {
                continue;
            }

            let threshold = config.threshold_ratio * peaks[segment];
            let gap = (last - first) as f64;
            per_segment[segment].extend(
                local_maxima(values, first, last, margin, threshold).map(|f| Candidate {
                    time: novelty.time(f),
                    phase: (f - first) as f64 / gap,
                }),
            );
        }

        for candidates in per_segment {
            let kept = dominant_phase_filter(candidates, config.dominant_phases, config.phase_tolerance);
            added.extend(kept.iter().map(|c| c.time));
        }
    }

    let track = merge(beats.times(), &added, config.collapse_tolerance);
    log::debug!(
        "Rhythm track: {} beats + {} clicks ({} candidates)",
        beats.len(),
        track.added,
        added.len()
    );
    Ok(track)
}

/// Merges beats and added clicks in time order. An entry closer than
/// `tolerance` to the previous one is dropped unless it is a beat, in which case
/// it replaces a preceding added click. Beats are never dropped, so two beats
/// closer than `tolerance` both stay; a known tempo inside the tempo range keeps
/// beats further apart than the default tolerance.
fn merge(beats: &[f64], added: &[f64], tolerance: f64) -> RhythmTrack {
    let mut entries: Vec<(f64, bool)> = beats
        .iter()
        .map(|t| (*t, true))
        .chain(added.iter().map(|t| (*t, false)))
        .collect();
    entries.sort_by(|a, b| a.0.total_cmp(&b.0).then(b.1.cmp(&a.1)));

    let mut merged: Vec<(f64, bool)> = Vec::with_capacity(entries.len());
    for (time, is_beat) in entries {
        match merged.last_mut() {
            Some((last, last_is_beat)) if time - *last < tolerance => {
                if is_beat && !*last_is_beat {
                    *last = time;
                    *last_is_beat = true;
                } else if is_beat {
                    merged.push((time, true));
                }
            }
            _ => merged.push((time, is_beat)),
        }
    }

    let added = merged.iter().filter(|(_, beat)| !beat).count();
    RhythmTrack {
        times: merged.into_iter().map(|(t, _)| t).collect(),
        added,
    }
}
