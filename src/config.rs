//! Analysis configuration, threaded explicitly through every stage.

use std::fmt;
use std::str::FromStr;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::dsp::FrameLayout;
use crate::error::ConfigError;

macro_rules! approach_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $($(#[$vmeta:meta])* $variant:ident = $code:literal => $label:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(FromPrimitive, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $code),+
        }

        impl $name {
            pub const OPTIONS: &'static str = concat!($($label, " "),+);

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            /// Looks up a variant by its numeric code.
            pub fn from_code(code: u32) -> Result<Self, ConfigError> {
                <$name as FromPrimitive>::from_u32(code)
                    .ok_or(ConfigError::UnknownApproachCode { kind: $kind, code })
            }
        }

        impl FromStr for $name {
            type Err = ConfigError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($label => Ok($name::$variant),)+
                    _ => Err(ConfigError::UnknownApproach {
                        kind: $kind,
                        name: s.to_string(),
                        options: Self::OPTIONS.trim_end(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

approach_enum! {
    /// How the onset novelty curve is derived from the signal.
    NoveltyApproach, "novelty" {
        /// Rectified difference of log-compressed RMS energy.
        Energy = 0 => "energy",
        /// Spectral flux of log-compressed STFT magnitudes.
        #[default]
        Spectral = 1 => "spectral",
    }
}

approach_enum! {
    /// Periodicity analysis used to pick the global tempo.
    TempoApproach, "tempo" {
        #[default]
        Autocorrelation = 0 => "autocorrelation",
        Fourier = 1 => "fourier",
        Hybrid = 2 => "hybrid",
    }
}

approach_enum! {
    /// Objective of the beat-tracking dynamic program.
    BeatApproach, "beat" {
        /// Maximise novelty plus a log-Gaussian timing reward.
        #[default]
        Score = 0 => "score",
        /// Minimise negative novelty plus a bounded quadratic deviation cost.
        Penalty = 1 => "penalty",
    }
}

/// How the piece is partitioned before sub-beat clicks are placed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Segmentation {
    /// A fixed number of equal-length parts.
    Parts(usize),
    /// Structural sections found by descriptor self-similarity.
    ChorusVerse,
}

impl Default for Segmentation {
    fn default() -> Self {
        Segmentation::Parts(4)
    }
}

impl Segmentation {
    pub const OPTIONS: &'static str = "parts chorus-verse";

    /// Parses an approach name; `parts` takes its count from `parts`.
    pub fn parse(name: &str, parts: usize) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "parts" => Ok(Segmentation::Parts(parts)),
            "chorus-verse" | "chorus_verse" => Ok(Segmentation::ChorusVerse),
            _ => Err(ConfigError::UnknownApproach {
                kind: "segmentation",
                name: name.to_string(),
                options: Self::OPTIONS,
            }),
        }
    }

    /// Numeric code 0 is equal parts, 1 is chorus-verse.
    pub fn from_code(code: u32, parts: usize) -> Result<Self, ConfigError> {
        match code {
            0 => Ok(Segmentation::Parts(parts)),
            1 => Ok(Segmentation::ChorusVerse),
            _ => Err(ConfigError::UnknownApproachCode {
                kind: "segmentation",
                code,
            }),
        }
    }
}

impl fmt::Display for Segmentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segmentation::Parts(n) => write!(f, "parts({n})"),
            Segmentation::ChorusVerse => f.write_str("chorus-verse"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TempoConfig {
    pub approach: TempoApproach,

    /// Lowest tempo considered (default: 30.0)
    pub min_bpm: f64,

    /// Highest tempo considered (default: 300.0)
    pub max_bpm: f64,

    /// Centre of the perceptual tempo prior (default: 120.0)
    pub preferred_bpm: f64,

    /// Spread of the tempo prior in octaves (default: 1.0)
    pub prior_octaves: f64,

    /// Tempo reported when the novelty curve carries no periodicity (default: 120.0)
    pub fallback_bpm: f64,

    /// Confidence below which an estimate is flagged as unreliable (default: 0.1)
    pub min_confidence: f64,

    /// A half-lag peak at least this fraction of the chosen peak wins the
    /// octave check (default: 0.8)
    pub octave_ratio: f64,

    /// Analysis window of the Fourier tempogram in seconds (default: 8.0)
    pub window_seconds: f64,

    /// BPM candidates taken from the Fourier/hybrid tempogram (default: 5)
    pub dominant_values: usize,

    /// Candidates closer than this many BPM are grouped (default: 5.0)
    pub similarity_bpm: f64,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            approach: TempoApproach::default(),
            min_bpm: 30.0,
            max_bpm: 300.0,
            preferred_bpm: 120.0,
            prior_octaves: 1.0,
            fallback_bpm: 120.0,
            min_confidence: 0.1,
            octave_ratio: 0.8,
            window_seconds: 8.0,
            dominant_values: 5,
            similarity_bpm: 5.0,
        }
    }
}

impl TempoConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::positive("min_bpm", self.min_bpm)?;
        ConfigError::positive("max_bpm", self.max_bpm)?;
        if self.max_bpm < 2.0 * self.min_bpm {
            // folding by octaves needs at least one full octave of room
            return Err(ConfigError::InvalidParameter {
                name: "max_bpm",
                value: self.max_bpm,
            });
        }
        ConfigError::positive("preferred_bpm", self.preferred_bpm)?;
        ConfigError::positive("prior_octaves", self.prior_octaves)?;
        if !(self.fallback_bpm.is_finite() && self.fallback_bpm > 0.0) {
            return Err(ConfigError::InvalidTempo(self.fallback_bpm));
        }
        ConfigError::unit("min_confidence", self.min_confidence)?;
        ConfigError::unit("octave_ratio", self.octave_ratio)?;
        ConfigError::positive("window_seconds", self.window_seconds)?;
        if self.dominant_values == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "dominant_values",
                value: 0.0,
            });
        }
        ConfigError::positive("similarity_bpm", self.similarity_bpm)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BeatConfig {
    pub approach: BeatApproach,

    /// Sharpness of the log-Gaussian timing reward (default: 4.0)
    pub tightness: f64,

    /// Weight of the bounded quadratic deviation cost (default: 1.0)
    pub penalty_weight: f64,

    /// Half-width of the predecessor search as a fraction of the interval (default: 0.5)
    pub window_ratio: f64,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            approach: BeatApproach::default(),
            tightness: 4.0,
            penalty_weight: 1.0,
            window_ratio: 0.5,
        }
    }
}

impl BeatConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::positive("tightness", self.tightness)?;
        ConfigError::positive("penalty_weight", self.penalty_weight)?;
        ConfigError::unit("window_ratio", self.window_ratio)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RhythmConfig {
    /// Fraction of the segment's peak novelty a sub-beat maximum must reach (default: 0.3)
    pub threshold_ratio: f64,

    /// Entries closer than this many seconds are collapsed (default: 0.05)
    pub collapse_tolerance: f64,

    /// Most frequent sub-beat phases kept per segment, 0 keeps all (default: 4)
    pub dominant_phases: usize,

    /// Phase distance, as a fraction of the beat gap, that counts as the same
    /// phase (default: 0.05)
    pub phase_tolerance: f64,
}

impl Default for RhythmConfig {
    fn default() -> Self {
        Self {
            threshold_ratio: 0.3,
            collapse_tolerance: 0.05,
            dominant_phases: 4,
            phase_tolerance: 0.05,
        }
    }
}

impl RhythmConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::unit("threshold_ratio", self.threshold_ratio)?;
        ConfigError::positive("collapse_tolerance", self.collapse_tolerance)?;
        ConfigError::unit("phase_tolerance", self.phase_tolerance)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructureConfig {
    /// Length of one descriptor block in seconds (default: 1.0)
    pub block_seconds: f64,

    /// Blocks averaged on each side of a candidate boundary (default: 8)
    pub history_blocks: usize,

    /// Log-spaced frequency bands per descriptor (default: 12)
    pub bands: usize,

    /// At most one boundary per this many seconds of audio (default: 20.0)
    pub seconds_per_part: f64,

    /// Minimum distance between boundaries in seconds (default: 10.0)
    pub min_segment_seconds: f64,

    /// Boundary score, `1 - exp(-distance)` between mean log descriptors, a
    /// candidate must reach (default: 0.2)
    pub min_dissimilarity: f64,
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            block_seconds: 1.0,
            history_blocks: 8,
            bands: 12,
            seconds_per_part: 20.0,
            min_segment_seconds: 10.0,
            min_dissimilarity: 0.2,
        }
    }
}

impl StructureConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::positive("block_seconds", self.block_seconds)?;
        if self.history_blocks == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "history_blocks",
                value: 0.0,
            });
        }
        if self.bands == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "bands",
                value: 0.0,
            });
        }
        ConfigError::positive("seconds_per_part", self.seconds_per_part)?;
        ConfigError::positive("min_segment_seconds", self.min_segment_seconds)?;
        ConfigError::unit("min_dissimilarity", self.min_dissimilarity)
    }
}

/// Analysis configuration parameters
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    /// Sample rate of the input samples in Hz (default: 44100)
    pub sample_rate: u32,

    /// Samples per analysis frame (default: 2048)
    pub frame_length: usize,

    /// Samples between consecutive frames (default: 512)
    pub hop_length: usize,

    pub novelty: NoveltyApproach,

    /// Logarithmic compression factor (default: 10.0)
    pub gamma: f64,

    /// Half-width of the local-average window in seconds (default: 0.1)
    pub neighbourhood_seconds: f64,

    pub tempo: TempoConfig,

    /// Known tempo in BPM; skips tempo estimation when set. Must lie within
    /// `tempo.min_bpm..=tempo.max_bpm`
    pub known_tempo: Option<f64>,

    pub beat: BeatConfig,
    pub segmentation: Segmentation,
    pub rhythm: RhythmConfig,
    pub structure: StructureConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            frame_length: 2048,
            hop_length: 512,
            novelty: NoveltyApproach::default(),
            gamma: 10.0,
            neighbourhood_seconds: 0.1,
            tempo: TempoConfig::default(),
            known_tempo: None,
            beat: BeatConfig::default(),
            segmentation: Segmentation::default(),
            rhythm: RhythmConfig::default(),
            structure: StructureConfig::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn layout(&self) -> FrameLayout {
        FrameLayout {
            sample_rate: self.sample_rate,
            frame_length: self.frame_length,
            hop_length: self.hop_length,
        }
    }

    /// Local-average half-width in frames.
    pub fn neighbourhood_frames(&self) -> usize {
        (self.neighbourhood_seconds / self.layout().hop_seconds()).round() as usize
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.layout().validate()?;
        ConfigError::positive("gamma", self.gamma)?;
        if !(self.neighbourhood_seconds.is_finite() && self.neighbourhood_seconds >= 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "neighbourhood_seconds",
                value: self.neighbourhood_seconds,
            });
        }
        if self.segmentation == Segmentation::Parts(0) {
            return Err(ConfigError::ZeroSegmentCount);
        }
        self.tempo.validate()?;
        if let Some(bpm) = self.known_tempo {
            if !(bpm.is_finite() && bpm > 0.0) {
                return Err(ConfigError::InvalidTempo(bpm));
            }
            if !(self.tempo.min_bpm..=self.tempo.max_bpm).contains(&bpm) {
                return Err(ConfigError::TempoOutOfRange {
                    bpm,
                    min: self.tempo.min_bpm,
                    max: self.tempo.max_bpm,
                });
            }
        }
        self.beat.validate()?;
        self.rhythm.validate()?;
        self.structure.validate()
    }
}
