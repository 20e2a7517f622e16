use rustfft::num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Short-time magnitude spectrum of Hann-windowed frames.
///
/// Only the magnitudes of the non-negative frequency bins are kept; phase is
/// not needed for flux or band-energy features.
pub struct Spectrum {
    frame_size: usize,
    half_size: usize,

    window: Vec<f64>,
    freq: Vec<Complex64>,

    fft: Arc<dyn Fft<f64>>,
    fft_scratch: Vec<Complex64>,
}

impl Spectrum {
    pub fn new(frame_size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(frame_size);
        let fft_scratch = vec![Complex64::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        Spectrum {
            frame_size,
            half_size: frame_size / 2 + 1,

            window: apodize::hanning_iter(frame_size).collect(),
            freq: vec![Complex64::new(0.0, 0.0); frame_size],

            fft,
            fft_scratch,
        }
    }

    /// Number of magnitude bins produced per frame.
    pub fn bins(&self) -> usize {
        self.half_size
    }

    /// Windows `frame`, transforms it and writes `bins()` magnitudes into `magnitudes`.
    pub fn process(&mut self, frame: &[f64], magnitudes: &mut [f64]) {
        assert!(frame.len() >= self.frame_size);
        assert!(magnitudes.len() >= self.half_size);

        self.freq
            .iter_mut()
            .zip(frame.iter().zip(self.window.iter()))
            .for_each(|(bin, (x, w))| *bin = Complex64::new(x * w, 0.0));

        self.fft
            .process_with_scratch(&mut self.freq, &mut self.fft_scratch);

        magnitudes
            .iter_mut()
            .zip(self.freq.iter())
            .take(self.half_size)
            .for_each(|(mag, freq)| *mag = freq.norm());
    }
}
