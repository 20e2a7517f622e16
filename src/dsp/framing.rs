use crate::error::ConfigError;

/// Geometry shared by every stage: how samples are cut into frames and how frame
/// indices map to seconds.
///
/// Frames are centred: the signal is zero-padded by half a frame on both sides,
/// so frame `i` is centred on sample `i * hop_length`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameLayout {
    pub sample_rate: u32,
    pub frame_length: usize,
    pub hop_length: usize,
}

impl FrameLayout {
    pub fn new(
        sample_rate: u32,
        frame_length: usize,
        hop_length: usize,
    ) -> Result<Self, ConfigError> {
        let layout = FrameLayout {
            sample_rate,
            frame_length,
            hop_length,
        };
        layout.validate()?;
        Ok(layout)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::ZeroSampleRate);
        }
        if self.frame_length == 0 {
            return Err(ConfigError::ZeroFrameLength);
        }
        if self.hop_length == 0 {
            return Err(ConfigError::ZeroHopLength);
        }
        if self.hop_length > self.frame_length {
            return Err(ConfigError::HopExceedsFrame {
                hop: self.hop_length,
                frame: self.frame_length,
            });
        }
        Ok(())
    }

    /// Number of frames for a signal of `len` samples. Zero when the signal is
    /// shorter than one frame.
    pub fn frame_count(&self, len: usize) -> usize {
        if len < self.frame_length {
            0
        } else {
            1 + len / self.hop_length
        }
    }

    /// Duration of one hop in seconds.
    pub fn hop_seconds(&self) -> f64 {
        self.hop_length as f64 / self.sample_rate as f64
    }

    pub fn frame_time(&self, index: usize) -> f64 {
        index as f64 * self.hop_seconds()
    }

    /// Nearest frame index for a time in seconds. Negative times map to frame 0.
    pub fn time_to_frame(&self, seconds: f64) -> usize {
        (seconds.max(0.0) / self.hop_seconds()).round() as usize
    }

    pub fn duration(&self, len: usize) -> f64 {
        len as f64 / self.sample_rate as f64
    }

    /// Cuts `samples` into centred frames.
    pub fn frames<'a>(&self, samples: &'a [f32]) -> Frames<'a> {
        Frames {
            samples,
            layout: *self,
            count: self.frame_count(samples.len()),
            index: 0,
            buffer: vec![0.0; self.frame_length],
        }
    }
}

/// Lending iterator over the frames of a signal. Each frame is copied into an
/// internal buffer, zero-padded where it overhangs the signal.
pub struct Frames<'a> {
    samples: &'a [f32],
    layout: FrameLayout,
    count: usize,
    index: usize,
    buffer: Vec<f64>,
}

impl Frames<'_> {
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Advances to the next frame, returning its index and samples.
    pub fn next_frame(&mut self) -> Option<(usize, &[f64])> {
        if self.index >= self.count {
            return None;
        }

        let centre = self.index * self.layout.hop_length;
        let half = self.layout.frame_length / 2;
        let len = self.samples.len() as isize;
        let start = centre as isize - half as isize;

        self.buffer.iter_mut().enumerate().for_each(|(i, x)| {
            let pos = start + i as isize;
            *x = if pos >= 0 && pos < len {
                self.samples[pos as usize] as f64
            } else {
                0.0
            };
        });

        let index = self.index;
        self.index += 1;
        Some((index, &self.buffer))
    }
}
