//! Frequency-domain analysis for the level meter
//!
//! Mirrors a web-audio analyser node: Blackman window, FFT, magnitude
//! smoothing over time, then decibels mapped into `0..=255`.

use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Lower bound of the byte range in dB
pub const MIN_DECIBELS: f32 = -100.0;

/// Upper bound of the byte range in dB
pub const MAX_DECIBELS: f32 = -30.0;

/// Windowed, smoothed FFT over the most recent samples
pub struct FrequencyAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    smoothing: f32,
    scratch: Vec<Complex<f32>>,
}

impl FrequencyAnalyzer {
    /// `fft_size` must be a power of two; `smoothing` is in `[0, 1]`
    #[must_use]
    pub fn new(fft_size: usize, smoothing: f32) -> Self {
        let fft = FftPlanner::new().plan_fft_forward(fft_size);
        Self {
            fft,
            window: blackman(fft_size),
            smoothed: vec![0.0; fft_size / 2],
            smoothing: smoothing.clamp(0.0, 1.0),
            scratch: vec![Complex::default(); fft_size],
        }
    }

    /// Number of frequency bins produced
    #[must_use]
    pub fn bin_count(&self) -> usize {
        self.smoothed.len()
    }

    /// Byte magnitudes for the latest window of samples
    ///
    /// `samples` shorter than the FFT size are zero-padded at the end.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn frequency_bytes(&mut self, samples: &[f32]) -> Vec<u8> {
        let size = self.window.len();
        for (i, slot) in self.scratch.iter_mut().enumerate() {
            let sample = samples.get(i).copied().unwrap_or(0.0);
            *slot = Complex::new(sample * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);

        let scale = 255.0 / (MAX_DECIBELS - MIN_DECIBELS);
        self.smoothed
            .iter_mut()
            .zip(&self.scratch)
            .map(|(smoothed, bin)| {
                let magnitude = bin.norm() / size as f32;
                *smoothed = self.smoothing.mul_add(*smoothed, (1.0 - self.smoothing) * magnitude);
                if *smoothed <= 0.0 {
                    return 0;
                }
                let db = 20.0 * smoothed.log10();
                (scale * (db - MIN_DECIBELS)).floor().clamp(0.0, 255.0) as u8
            })
            .collect()
    }

    /// Forget smoothing history
    pub fn reset(&mut self) {
        self.smoothed.fill(0.0);
    }
}

#[allow(clippy::cast_precision_loss)]
fn blackman(size: usize) -> Vec<f32> {
    const A0: f32 = 0.42;
    const A1: f32 = 0.5;
    const A2: f32 = 0.08;

    (0..size)
        .map(|n| {
            let x = n as f32 / size as f32;
            A2.mul_add((4.0 * PI * x).cos(), A0 - A1 * (2.0 * PI * x).cos())
        })
        .collect()
}

/// Average contiguous byte slices into `bars` levels in `[0, 1]`
///
/// Each bar covers `max(1, len / bars)` bins; the last bar also takes the
/// remainder. Bars past the end of `data` read as zero.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn bin_levels(data: &[u8], bars: usize) -> Vec<f32> {
    let len = data.len();
    let bin_size = (len / bars.max(1)).max(1);

    (0..bars)
        .map(|i| {
            let start = (i * bin_size).min(len);
            let end = if i + 1 == bars {
                len
            } else {
                (start + bin_size).min(len)
            };
            let sum: u32 = data[start..end].iter().map(|&b| u32::from(b)).sum();
            let average = sum as f32 / (end - start).max(1) as f32;
            average / 255.0
        })
        .collect()
}
