use thiserror::Error;

/// Rejected analysis configuration. Raised eagerly, before any samples are touched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("unknown {kind} approach {name:?}, options are: {options}")]
    UnknownApproach {
        kind: &'static str,
        name: String,
        options: &'static str,
    },
    #[error("unknown {kind} approach code {code}")]
    UnknownApproachCode { kind: &'static str, code: u32 },
    #[error("tempo must be a positive, finite BPM value, got {0}")]
    InvalidTempo(f64),
    #[error("known tempo {bpm} BPM lies outside the tempo range {min}..={max}")]
    TempoOutOfRange { bpm: f64, min: f64, max: f64 },
    #[error("sample rate must be non-zero")]
    ZeroSampleRate,
    #[error("frame length must be non-zero")]
    ZeroFrameLength,
    #[error("hop length must be non-zero")]
    ZeroHopLength,
    #[error("hop length {hop} exceeds frame length {frame}")]
    HopExceedsFrame { hop: usize, frame: usize },
    #[error("segment count must be at least 1")]
    ZeroSegmentCount,
    #[error("invalid value for {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },
}

impl ConfigError {
    /// Checks that `value` is finite and strictly positive.
    pub(crate) fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
        if value.is_finite() && value > 0.0 {
            Ok(())
        } else {
            Err(ConfigError::InvalidParameter { name, value })
        }
    }

    /// Checks that `value` is finite and within `[0, 1]`.
    pub(crate) fn unit(name: &'static str, value: f64) -> Result<(), ConfigError> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Ok(())
        } else {
            Err(ConfigError::InvalidParameter { name, value })
        }
    }
}
