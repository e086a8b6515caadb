//! Shared forward-FFT front end.
//!
//! Every spectrum consumer (MFCC, harmonic, cadence) reads the same
//! magnitude spectrum, so it is computed once per hop. Scratch buffers are
//! pooled and recycled; nothing is allocated on the hot path after warmup.

use std::sync::Arc;

use object_pool::Pool;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::errors::{AnalysisError, AnalysisResult};
use crate::utils::DENORMAL_THRESHOLD;

struct FftScratch {
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    sample_rate: u32,
    pool: Pool<FftScratch>,
}

impl SpectrumAnalyzer {
    /// # Errors
    ///
    /// Returns an error if `fft_size` is not a power of two or the sample
    /// rate is zero.
    pub fn new(fft_size: usize, sample_rate: u32) -> AnalysisResult<Self> {
        if fft_size == 0 || !fft_size.is_power_of_two() {
            return Err(AnalysisError::invalid(
                "spectrum",
                format!("fft size must be a power of two, got {fft_size}"),
            ));
        }
        if sample_rate == 0 {
            return Err(AnalysisError::invalid("spectrum", "sample rate must be non-zero"));
        }
        let fft = FftPlanner::new().plan_fft_forward(fft_size);
        let scratch_len = fft.get_inplace_scratch_len();
        let pool = Pool::new(2, || FftScratch {
            buffer: vec![Complex::new(0., 0.); fft_size],
            scratch: vec![Complex::new(0., 0.); scratch_len],
        });
        Ok(Self {
            fft,
            fft_size,
            sample_rate,
            pool,
        })
    }

    #[must_use]
    pub const fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of magnitude bins produced per frame.
    #[must_use]
    pub const fn bins(&self) -> usize {
        self.fft_size / 2 + 1
    }

    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub const fn bin_width_hz(&self) -> f32 {
        self.sample_rate as f32 / self.fft_size as f32
    }

    /// Frequency at the center of bin `k`.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub const fn bin_to_hz(&self, bin: usize) -> f32 {
        bin as f32 * self.bin_width_hz()
    }

    /// Magnitude spectrum of a (windowed) frame, zero-padded to the FFT
    /// size. Only the non-redundant half (`fft_size / 2 + 1` bins) is
    /// written to `out`. Subnormal inputs are flushed to zero at the
    /// transform boundary.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is empty or longer than the FFT size.
    pub fn magnitudes(&self, frame: &[f32], out: &mut Vec<f32>) -> AnalysisResult<()> {
        if frame.is_empty() {
            return Err(AnalysisError::EmptySamples);
        }
        if frame.len() > self.fft_size {
            return Err(AnalysisError::invalid(
                "spectrum",
                format!("frame of {} exceeds fft size {}", frame.len(), self.fft_size),
            ));
        }
        let mut workspace = self.pool.pull(|| FftScratch {
            buffer: vec![Complex::new(0., 0.); self.fft_size],
            scratch: vec![Complex::new(0., 0.); self.fft.get_inplace_scratch_len()],
        });
        let FftScratch { buffer, scratch } = &mut *workspace;
        for (slot, &sample) in buffer.iter_mut().zip(frame) {
            let sample = if sample.abs() < DENORMAL_THRESHOLD { 0. } else { sample };
            *slot = Complex::new(sample, 0.);
        }
        for slot in buffer.iter_mut().skip(frame.len()) {
            *slot = Complex::new(0., 0.);
        }
        self.fft.process_with_scratch(buffer, scratch);

        out.clear();
        out.extend(buffer[..=self.fft_size / 2].iter().map(|c| c.re.hypot(c.im)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::sine_wave;

    #[test]
    fn test_non_power_of_two_rejected() {
        assert!(SpectrumAnalyzer::new(1000, 44_100).is_err());
        assert!(SpectrumAnalyzer::new(1024, 44_100).is_ok());
    }

    #[test]
    fn test_tone_peaks_at_expected_bin() {
        let analyzer = SpectrumAnalyzer::new(1024, 44_100).unwrap();
        // 430.66 Hz sits exactly on bin 10 at 44.1 kHz / 1024
        let tone = sine_wave(analyzer.bin_to_hz(10), 0.1, 44_100, 1.0);
        let mut magnitudes = Vec::new();
        analyzer.magnitudes(&tone[..1024], &mut magnitudes).unwrap();

        let peak_bin = magnitudes
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak_bin, 10);
    }

    #[test]
    fn test_silence_is_all_zero() {
        let analyzer = SpectrumAnalyzer::new(512, 44_100).unwrap();
        let mut magnitudes = Vec::new();
        analyzer.magnitudes(&vec![0.; 512], &mut magnitudes).unwrap();
        assert_eq!(magnitudes.len(), 257);
        assert!(magnitudes.iter().all(|&m| m.abs() < 1e-9));
    }

    #[test]
    fn test_zero_padding_matches_frame_energy() {
        let analyzer = SpectrumAnalyzer::new(2048, 44_100).unwrap();
        let tone = sine_wave(440., 0.1, 44_100, 0.5);
        let mut padded = Vec::new();
        analyzer.magnitudes(&tone[..1024], &mut padded).unwrap();
        // Zero padding interpolates the spectrum but keeps total energy
        // in the same ballpark; the peak must stay near 440 Hz.
        let peak_bin = padded
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        let peak_hz = analyzer.bin_to_hz(peak_bin);
        assert!((peak_hz - 440.).abs() < 2. * analyzer.bin_width_hz());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let analyzer = SpectrumAnalyzer::new(512, 44_100).unwrap();
        let mut out = Vec::new();
        assert!(analyzer.magnitudes(&vec![0.; 1024], &mut out).is_err());
    }
}
