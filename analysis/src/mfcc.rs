//! Mel-frequency cepstral coefficient extraction.
//!
//! Magnitude spectrum → mel filter bank → log compression → DCT-II,
//! optionally liftered. The zeroth coefficient is the frame log-energy, the
//! remaining coefficients are the usual cepstral ones.

use std::f32::consts::PI;

use ndarray::{Array1, Array2, ArrayView1};

use crate::errors::{AnalysisError, AnalysisResult};

/// Parameters of the mel front end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MfccConfig {
    /// Retained cepstral coefficients, `c0` included.
    pub coefficients: usize,
    /// Triangular mel filters.
    pub filters: usize,
    /// Lower edge of the filter bank in Hz.
    pub fmin_hz: f32,
    /// Upper edge of the filter bank in Hz; `0.` means Nyquist.
    pub fmax_hz: f32,
    /// Cepstral liftering parameter `L`; `0` disables liftering.
    pub lifter: usize,
}

impl Default for MfccConfig {
    fn default() -> Self {
        Self {
            coefficients: 13,
            filters: 26,
            fmin_hz: 0.,
            fmax_hz: 0.,
            lifter: 0,
        }
    }
}

#[must_use]
#[inline]
fn hz_to_mel(hz: f32) -> f32 {
    2595. * (1. + hz / 700.).log10()
}

#[must_use]
#[inline]
fn mel_to_hz(mel: f32) -> f32 {
    700. * (10.0f32.powf(mel / 2595.) - 1.)
}

/// Triangular mel filter bank over the non-redundant spectrum half.
#[derive(Debug, Clone)]
pub struct MelFilterBank {
    /// `n_filters` rows of `bins` weights.
    weights: Array2<f32>,
}

impl MelFilterBank {
    /// # Errors
    ///
    /// Returns an error for a degenerate band or fewer than two filters.
    #[allow(clippy::cast_precision_loss)]
    pub fn new(
        n_filters: usize,
        fft_size: usize,
        sample_rate: u32,
        fmin_hz: f32,
        fmax_hz: f32,
    ) -> AnalysisResult<Self> {
        let nyquist = sample_rate as f32 / 2.;
        let fmax = if fmax_hz <= 0. { nyquist } else { fmax_hz };
        if n_filters < 2 {
            return Err(AnalysisError::invalid("mel bank", "need at least two filters"));
        }
        if !(0. ..nyquist).contains(&fmin_hz) || fmax <= fmin_hz || fmax > nyquist {
            return Err(AnalysisError::invalid(
                "mel bank",
                format!("invalid band {fmin_hz}..{fmax} Hz at {sample_rate} Hz"),
            ));
        }

        let bins = fft_size / 2 + 1;
        let bin_width = sample_rate as f32 / fft_size as f32;
        let mel_lo = hz_to_mel(fmin_hz);
        let mel_hi = hz_to_mel(fmax);
        let edges: Vec<f32> = (0..n_filters + 2)
            .map(|i| mel_to_hz(mel_lo + (mel_hi - mel_lo) * i as f32 / (n_filters + 1) as f32))
            .collect();

        let mut weights = Array2::zeros((n_filters, bins));
        for m in 0..n_filters {
            let (left, center, right) = (edges[m], edges[m + 1], edges[m + 2]);
            for bin in 0..bins {
                let f = bin as f32 * bin_width;
                if f > left && f < center {
                    weights[[m, bin]] = (f - left) / (center - left);
                } else if f >= center && f < right {
                    weights[[m, bin]] = (right - f) / (right - center);
                }
            }
        }
        Ok(Self { weights })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.weights.nrows()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.weights.nrows() == 0
    }

    /// Log mel energies of a power spectrum, floored at 1e-10.
    #[must_use]
    pub fn apply_log(&self, power: &[f32]) -> Array1<f32> {
        let mut energies = self.weights.dot(&ArrayView1::from(power));
        energies.mapv_inplace(|e| e.max(1e-10).ln());
        energies
    }

    #[cfg(test)]
    fn row(&self, filter: usize) -> ArrayView1<'_, f32> {
        self.weights.row(filter)
    }
}

/// Streaming MFCC extractor. Feed one magnitude spectrum per hop with
/// [`MfccDesc::do_`]; the accumulated frame sequence is available through
/// [`MfccDesc::frames`].
pub struct MfccDesc {
    bank: MelFilterBank,
    /// DCT-II basis, `coefficients` rows over `filters` columns.
    dct_basis: Array2<f32>,
    lifter_weights: Array1<f32>,
    coefficients: usize,
    frames: Vec<Vec<f32>>,
    power_scratch: Vec<f32>,
}

impl MfccDesc {
    /// # Errors
    ///
    /// Returns an error if the coefficient count exceeds the filter count
    /// or the band is invalid.
    #[allow(clippy::cast_precision_loss)]
    pub fn new(config: &MfccConfig, fft_size: usize, sample_rate: u32) -> AnalysisResult<Self> {
        if config.coefficients < 2 || config.coefficients > config.filters {
            return Err(AnalysisError::invalid(
                "mfcc",
                format!(
                    "coefficient count must be in 2..={}, got {}",
                    config.filters, config.coefficients
                ),
            ));
        }
        let bank = MelFilterBank::new(
            config.filters,
            fft_size,
            sample_rate,
            config.fmin_hz,
            config.fmax_hz,
        )?;

        let m = config.filters;
        let dct_basis = Array2::from_shape_fn((config.coefficients, m), |(k, i)| {
            (PI * k as f32 * (2 * i + 1) as f32 / (2 * m) as f32).cos()
        });

        let lifter_weights = Array1::from_shape_fn(config.coefficients, |k| {
            if config.lifter == 0 || k == 0 {
                1.
            } else {
                1. + (config.lifter as f32 / 2.) * (PI * k as f32 / config.lifter as f32).sin()
            }
        });

        Ok(Self {
            bank,
            dct_basis,
            lifter_weights,
            coefficients: config.coefficients,
            frames: Vec::new(),
            power_scratch: Vec::new(),
        })
    }

    #[must_use]
    pub const fn coefficients(&self) -> usize {
        self.coefficients
    }

    /// Compute one MFCC vector from a magnitude spectrum and append it to
    /// the frame sequence.
    ///
    /// # Errors
    ///
    /// Returns an error on an empty spectrum.
    pub fn do_(&mut self, magnitudes: &[f32]) -> AnalysisResult<&[f32]> {
        if magnitudes.is_empty() {
            return Err(AnalysisError::EmptySamples);
        }
        self.power_scratch.clear();
        self.power_scratch.extend(magnitudes.iter().map(|&m| m * m));
        let frame_energy: f32 = self.power_scratch.iter().sum();

        let mel_log = self.bank.apply_log(&self.power_scratch);
        let mut coefficients = self.dct_basis.dot(&mel_log) * &self.lifter_weights;
        // c0 carries the frame log-energy rather than the DCT DC term.
        coefficients[0] = frame_energy.max(1e-10).ln();

        self.frames.push(coefficients.to_vec());
        Ok(self.frames.last().map(Vec::as_slice).unwrap_or_default())
    }

    #[must_use]
    pub fn frames(&self) -> &[Vec<f32>] {
        &self.frames
    }

    pub fn reset(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrum::SpectrumAnalyzer;
    use crate::utils::sine_wave;
    use crate::window::{Window, WindowFunction};

    fn mfcc_of_tone(frequency_hz: f32, amplitude: f32) -> Vec<Vec<f32>> {
        let analyzer = SpectrumAnalyzer::new(1024, 44_100).unwrap();
        let window = Window::new(WindowFunction::Hann, 1024).unwrap();
        let mut desc = MfccDesc::new(&MfccConfig::default(), 1024, 44_100).unwrap();
        let tone = sine_wave(frequency_hz, 0.5, 44_100, amplitude);

        let mut windowed = Vec::new();
        let mut magnitudes = Vec::new();
        for frame in tone.windows(1024).step_by(512) {
            window.apply_into(frame, &mut windowed);
            analyzer.magnitudes(&windowed, &mut magnitudes).unwrap();
            desc.do_(&magnitudes).unwrap();
        }
        desc.frames().to_vec()
    }

    #[test]
    fn test_mel_round_trip() {
        let hz = 1000.;
        let back = mel_to_hz(hz_to_mel(hz));
        assert!((hz - back).abs() < 0.1, "{hz} -> {back}");
    }

    #[test]
    fn test_filterbank_shape_and_sign() {
        let bank = MelFilterBank::new(26, 1024, 44_100, 0., 0.).unwrap();
        assert_eq!(bank.len(), 26);
        for filter in 0..bank.len() {
            let row = bank.row(filter);
            assert_eq!(row.len(), 513);
            assert!(row.iter().all(|&w| w >= 0.));
            assert!(row.iter().any(|&w| w > 0.), "empty filter {filter}");
        }
    }

    #[test]
    fn test_invalid_band_rejected() {
        assert!(MelFilterBank::new(26, 1024, 44_100, 4000., 1000.).is_err());
        assert!(MelFilterBank::new(1, 1024, 44_100, 0., 0.).is_err());
        assert!(MfccDesc::new(
            &MfccConfig {
                coefficients: 40,
                ..MfccConfig::default()
            },
            1024,
            44_100
        )
        .is_err());
    }

    #[test]
    fn test_frame_shape() {
        let frames = mfcc_of_tone(440., 0.6);
        assert!(frames.len() > 20);
        assert!(frames.iter().all(|f| f.len() == 13));
    }

    #[test]
    fn test_distinct_tones_have_distinct_cepstra() {
        let low = mfcc_of_tone(440., 0.6);
        let high = mfcc_of_tone(880., 0.6);
        let distance: f32 = low[5]
            .iter()
            .zip(&high[5])
            .skip(1) // ignore the energy coefficient
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt();
        assert!(distance > 1.0, "cepstra too close: {distance}");
    }

    #[test]
    fn test_identical_input_is_bitwise_deterministic() {
        let a = mfcc_of_tone(440., 0.6);
        let b = mfcc_of_tone(440., 0.6);
        assert_eq!(a, b);
    }

    #[test]
    fn test_c0_tracks_energy() {
        let loud = mfcc_of_tone(440., 0.6);
        let quiet = mfcc_of_tone(440., 0.06);
        assert!(loud[5][0] > quiet[5][0]);
    }

    #[test]
    fn test_liftering_rescales_upper_coefficients() {
        let plain = MfccDesc::new(&MfccConfig::default(), 1024, 44_100).unwrap();
        let liftered = MfccDesc::new(
            &MfccConfig {
                lifter: 22,
                ..MfccConfig::default()
            },
            1024,
            44_100,
        )
        .unwrap();
        // The lifter leaves c0 alone and boosts mid coefficients
        assert!((liftered.lifter_weights[0] - 1.).abs() < f32::EPSILON);
        assert!(liftered.lifter_weights[6] > plain.lifter_weights[6]);
    }
}
