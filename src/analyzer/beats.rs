//! Beat tracking by dynamic programming over novelty frames.
//!
//! For every frame `t` the table keeps the best objective value of a beat chain
//! ending at `t` and the frame of the previous beat in that chain. Predecessors
//! are searched around one inter-beat interval before `t`; the chain with the
//! best value in the final interval is followed back to the start.
//! Chains may bridge frames without onsets, but never end on one.

use crate::analyzer::novelty::NoveltyCurve;
use crate::analyzer::tempo::check_tempo;
use crate::config::{BeatApproach, BeatConfig};
use crate::dsp::math::EPS;
use crate::error::ConfigError;

/// Beat positions in chronological order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BeatSequence {
    frames: Vec<usize>,
    times: Vec<f64>,
    period: f64,
}

impl BeatSequence {
    pub fn new(frames: Vec<usize>, hop_seconds: f64, bpm: f64) -> Self {
        let times = frames.iter().map(|f| *f as f64 * hop_seconds).collect();
        BeatSequence {
            frames,
            times,
            period: 60.0 / bpm,
        }
    }

    pub fn frames(&self) -> &[usize] {
        &self.frames
    }

    /// Beat times in seconds.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Seconds between beats implied by the tempo that was tracked.
    pub fn period(&self) -> f64 {
        self.period
    }

    pub fn mean_interval(&self) -> Option<f64> {
        if self.times.len() < 2 {
            return None;
        }
        let span = self.times[self.times.len() - 1] - self.times[0];
        Some(span / (self.times.len() - 1) as f64)
    }

    /// Offset of the beat grid: the first beat time modulo the period.
    pub fn phase(&self) -> Option<f64> {
        self.times.first().map(|t| t.rem_euclid(self.period))
    }
}

/// One of the two dual objectives the table can be filled with.
trait Objective {
    /// Contribution of a frame's own novelty.
    fn local(&self, novelty: f64) -> f64;

    /// Reward or cost of a predecessor `tau` frames away from one interval.
    fn transition(&self, tau: i64) -> f64;

    /// True when `a` is strictly better than `b`.
    fn better(&self, a: f64, b: f64) -> bool;

    /// True when a chain with this value carries onset evidence, so extending
    /// it beats starting afresh.
    fn has_evidence(&self, value: f64) -> bool;
}

/// Maximises novelty plus a log-Gaussian timing reward.
struct Score {
    tightness: f64,
    interval: f64,
}

impl Objective for Score {
    fn local(&self, novelty: f64) -> f64 {
        novelty
    }

    fn transition(&self, tau: i64) -> f64 {
        let deviation = self.tightness * tau as f64 / self.interval;
        -0.5 * deviation * deviation
    }

    fn better(&self, a: f64, b: f64) -> bool {
        a > b
    }

    fn has_evidence(&self, value: f64) -> bool {
        value > 0.0
    }
}

/// Minimises negative novelty plus a bounded quadratic deviation cost.
struct Penalty {
    weight: f64,
    interval: f64,
}

impl Objective for Penalty {
    fn local(&self, novelty: f64) -> f64 {
        -novelty
    }

    fn transition(&self, tau: i64) -> f64 {
        let tau = tau as f64;
        self.weight * (4.0 * tau * tau / (self.interval * self.interval)).min(1.0)
    }

    fn better(&self, a: f64, b: f64) -> bool {
        a < b
    }

    fn has_evidence(&self, value: f64) -> bool {
        value < 0.0
    }
}

/// Predecessor offsets within `window` and no lower than `lowest`, ordered by
/// distance from zero: 0, -1, 1, -2, 2, ...
fn offsets(window: usize, lowest: i64) -> impl Iterator<Item = i64> {
    (lowest.max(0)..=window as i64)
        .flat_map(|d| std::iter::once(-d).chain((d > 0).then_some(d)))
        .filter(move |tau| *tau >= lowest)
}

struct BeatTable {
    best: Vec<f64>,
    backlink: Vec<Option<usize>>,
}

impl BeatTable {
    fn fill(novelty: &[f64], interval: usize, window: usize, objective: &impl Objective) -> Self {
        let len = novelty.len();
        let mut best = vec![0.0; len];
        let mut backlink = vec![None; len];

        for t in 0..len {
            let mut chosen: Option<(usize, f64)> = None;
            // window < interval keeps every predecessor before t
            for tau in offsets(window, interval as i64 - t as i64) {
                let prev = (t as i64 - interval as i64 + tau) as usize;
                let candidate = best[prev] + objective.transition(tau);
                if chosen.map_or(true, |(_, c)| objective.better(candidate, c)) {
                    chosen = Some((prev, candidate));
                }
            }

            best[t] = objective.local(novelty[t]);
            match chosen {
                Some((prev, candidate)) if objective.has_evidence(candidate) => {
                    best[t] += candidate;
                    backlink[t] = Some(prev);
                }
                _ => {}
            }
        }

        BeatTable { best, backlink }
    }

    /// Follows backlinks from the best frame of the final interval. Beats the
    /// chain extrapolated past the last onset are dropped.
    fn backtrace(&self, novelty: &[f64], interval: usize, objective: &impl Objective) -> Vec<usize> {
        let first = self.best.len().saturating_sub(interval);
        let end = (first..self.best.len()).fold(None, |chosen: Option<usize>, t| match chosen {
            Some(c) if !objective.better(self.best[t], self.best[c]) => chosen,
            _ => Some(t),
        });

        let mut beats = Vec::new();
        let Some(end) = end else {
            return beats;
        };
        if !objective.has_evidence(self.best[end]) {
            return beats;
        }

        let mut current = Some(end);
        while let Some(frame) = current {
            beats.push(frame);
            current = self.backlink[frame];
        }
        beats.reverse();

        while beats.last().is_some_and(|b| novelty[*b] <= EPS) {
            beats.pop();
        }
        beats
    }
}

impl BeatApproach {
    /// Places beats on `novelty` at the given tempo.
    pub fn track(
        &self,
        novelty: &NoveltyCurve,
        bpm: f64,
        config: &BeatConfig,
    ) -> Result<BeatSequence, ConfigError> {
        check_tempo(bpm)?;
        config.validate()?;
        ConfigError::positive("hop_seconds", novelty.hop_seconds())?;

        let hop = novelty.hop_seconds();
        let interval = ((60.0 / (bpm * hop)).round() as usize).max(1);
        // predecessors must lie strictly before the frame being scored
        let window = ((interval as f64 * config.window_ratio).floor() as usize).min(interval - 1);

        let frames = match self {
            BeatApproach::Score => {
                let objective = Score {
                    tightness: config.tightness,
                    interval: interval as f64,
                };
                BeatTable::fill(novelty.values(), interval, window, &objective)
                    .backtrace(novelty.values(), interval, &objective)
            }
            BeatApproach::Penalty => {
                let objective = Penalty {
                    weight: config.penalty_weight,
                    interval: interval as f64,
                };
                BeatTable::fill(novelty.values(), interval, window, &objective)
                    .backtrace(novelty.values(), interval, &objective)
            }
        };

        log::debug!(
            "Beat tracking ({}): {} beats over {} frames, interval {} frames",
            self,
            frames.len(),
            novelty.len(),
            interval
        );
        Ok(BeatSequence::new(frames, hop, bpm))
    }
}
