//! Tonal-quality analysis.
//!
//! From each magnitude spectrum: the fundamental peak (pitch-guided when a
//! voiced estimate is available), a ladder of up to eight harmonic peaks,
//! the spectral centroid, a harmonic-to-noise energy ratio, and up to four
//! formant candidates picked from a smoothed log-magnitude spectrum.

use crate::errors::{AnalysisError, AnalysisResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarmonicConfig {
    pub max_harmonics: usize,
    pub max_formants: usize,
    /// Search floor for the fundamental when no pitch hint exists.
    pub fmin_hz: f32,
    /// Harmonic peaks weaker than this (relative to the fundamental) are
    /// rejected.
    pub rejection_db: f32,
    pub formant_min_hz: f32,
    pub formant_max_hz: f32,
    pub formant_min_distance_hz: f32,
    /// Moving-average width (in bins) for the formant spectrum.
    pub smoothing_bins: usize,
}

impl Default for HarmonicConfig {
    fn default() -> Self {
        Self {
            max_harmonics: 8,
            max_formants: 4,
            fmin_hz: 60.,
            rejection_db: -40.,
            formant_min_hz: 200.,
            formant_max_hz: 4000.,
            formant_min_distance_hz: 300.,
            smoothing_bins: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HarmonicObservation {
    pub time_sec: f32,
    pub centroid_hz: f32,
    /// Frequencies of accepted harmonic peaks, fundamental first.
    pub harmonics_hz: Vec<f32>,
    /// Harmonic energy over residual energy, capped at 100.
    pub hnr: f32,
    pub formants_hz: Vec<f32>,
    /// `min(1, harmonic energy / frame energy)`; `0.` for silent frames.
    pub confidence: f32,
}

pub struct HarmonicDesc {
    bin_width_hz: f32,
    config: HarmonicConfig,
    observations: Vec<HarmonicObservation>,
    smoothed: Vec<f32>,
}

impl HarmonicDesc {
    const SILENCE_ENERGY: f64 = 1e-12;

    /// # Errors
    ///
    /// Returns an error for a zero smoothing width or an inverted formant
    /// band.
    #[allow(clippy::cast_precision_loss)]
    pub fn new(config: HarmonicConfig, fft_size: usize, sample_rate: u32) -> AnalysisResult<Self> {
        if config.smoothing_bins == 0 {
            return Err(AnalysisError::invalid("harmonic", "smoothing width must be non-zero"));
        }
        if config.formant_max_hz <= config.formant_min_hz {
            return Err(AnalysisError::invalid("harmonic", "inverted formant band"));
        }
        if config.max_harmonics == 0 {
            return Err(AnalysisError::invalid("harmonic", "need at least one harmonic"));
        }
        Ok(Self {
            bin_width_hz: sample_rate as f32 / fft_size as f32,
            config,
            observations: Vec::new(),
            smoothed: Vec::new(),
        })
    }

    /// Analyze one magnitude spectrum. `f0_hint` carries the pitch
    /// tracker's voiced estimate when there is one.
    ///
    /// # Errors
    ///
    /// Returns an error on an empty spectrum.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn do_(
        &mut self,
        magnitudes: &[f32],
        f0_hint: Option<f32>,
        time_sec: f32,
    ) -> AnalysisResult<&HarmonicObservation> {
        if magnitudes.is_empty() {
            return Err(AnalysisError::EmptySamples);
        }

        let total_energy: f64 = magnitudes.iter().map(|&m| f64::from(m) * f64::from(m)).sum();
        if total_energy < Self::SILENCE_ENERGY {
            self.observations.push(HarmonicObservation {
                time_sec,
                centroid_hz: 0.,
                harmonics_hz: Vec::new(),
                hnr: 0.,
                formants_hz: Vec::new(),
                confidence: 0.,
            });
            return Ok(self.observations.last().expect("just pushed"));
        }

        // Spectral centroid
        let mut weighted = 0.0f64;
        let mut magnitude_sum = 0.0f64;
        for (bin, &m) in magnitudes.iter().enumerate() {
            weighted += f64::from(bin as f32 * self.bin_width_hz) * f64::from(m);
            magnitude_sum += f64::from(m);
        }
        let centroid_hz = (weighted / magnitude_sum) as f32;

        // Fundamental peak
        let fundamental_bin = match f0_hint {
            Some(f0) if f0 > 0. => {
                let target = (f0 / self.bin_width_hz).round() as usize;
                local_peak(magnitudes, target, 2)
            }
            _ => {
                let floor_bin = (self.config.fmin_hz / self.bin_width_hz).ceil() as usize;
                magnitudes
                    .iter()
                    .enumerate()
                    .skip(floor_bin.min(magnitudes.len().saturating_sub(1)))
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .map_or(0, |(bin, _)| bin)
            }
        };
        let fundamental_mag = magnitudes[fundamental_bin];
        let rejection = fundamental_mag * 10.0f32.powf(self.config.rejection_db / 20.);

        // Harmonic ladder, fundamental included
        let mut harmonics_hz = Vec::with_capacity(self.config.max_harmonics);
        let mut harmonic_bins = Vec::with_capacity(self.config.max_harmonics);
        for k in 1..=self.config.max_harmonics {
            let target = fundamental_bin * k;
            if target >= magnitudes.len() {
                break;
            }
            let peak = local_peak(magnitudes, target, 2);
            if magnitudes[peak] >= rejection {
                harmonics_hz.push(peak as f32 * self.bin_width_hz);
                harmonic_bins.push(peak);
            }
        }

        // Energy in harmonic bins (peak plus immediate neighbors) vs rest
        let mut harmonic_energy = 0.0f64;
        let mut counted = vec![false; magnitudes.len()];
        for &bin in &harmonic_bins {
            for neighbor in bin.saturating_sub(1)..=(bin + 1).min(magnitudes.len() - 1) {
                if !counted[neighbor] {
                    counted[neighbor] = true;
                    harmonic_energy += f64::from(magnitudes[neighbor]) * f64::from(magnitudes[neighbor]);
                }
            }
        }
        let residual = (total_energy - harmonic_energy).max(1e-12);
        let hnr = ((harmonic_energy / residual) as f32).min(100.);
        let confidence = ((harmonic_energy / total_energy) as f32).min(1.);

        let formants_hz = self.find_formants(magnitudes);

        self.observations.push(HarmonicObservation {
            time_sec,
            centroid_hz,
            harmonics_hz,
            hnr,
            formants_hz,
            confidence,
        });
        Ok(self.observations.last().expect("just pushed"))
    }

    /// Peaks of the smoothed log-magnitude spectrum inside the formant
    /// band, separated by the configured minimum distance, strongest first
    /// in selection then reported in ascending frequency.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn find_formants(&mut self, magnitudes: &[f32]) -> Vec<f32> {
        let half = self.config.smoothing_bins / 2;
        self.smoothed.clear();
        for bin in 0..magnitudes.len() {
            let lo = bin.saturating_sub(half);
            let hi = (bin + half + 1).min(magnitudes.len());
            let mean: f32 = magnitudes[lo..hi]
                .iter()
                .map(|&m| m.max(1e-10).ln())
                .sum::<f32>()
                / (hi - lo) as f32;
            self.smoothed.push(mean);
        }

        let lo_bin = (self.config.formant_min_hz / self.bin_width_hz).ceil() as usize;
        let hi_bin = ((self.config.formant_max_hz / self.bin_width_hz).floor() as usize)
            .min(magnitudes.len().saturating_sub(2));
        let mut candidates: Vec<(usize, f32)> = (lo_bin.max(1)..=hi_bin)
            .filter(|&bin| {
                self.smoothed[bin] > self.smoothed[bin - 1] && self.smoothed[bin] >= self.smoothed[bin + 1]
            })
            .map(|bin| (bin, self.smoothed[bin]))
            .collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

        let min_distance_bins = (self.config.formant_min_distance_hz / self.bin_width_hz) as usize;
        let mut picked: Vec<usize> = Vec::with_capacity(self.config.max_formants);
        for (bin, _) in candidates {
            if picked.len() >= self.config.max_formants {
                break;
            }
            if picked.iter().all(|&p| p.abs_diff(bin) >= min_distance_bins) {
                picked.push(bin);
            }
        }
        picked.sort_unstable();
        picked.into_iter().map(|bin| bin as f32 * self.bin_width_hz).collect()
    }

    #[must_use]
    pub fn observations(&self) -> &[HarmonicObservation] {
        &self.observations
    }

    /// Mean centroid over frames with non-zero confidence.
    #[must_use]
    pub fn mean_centroid_hz(&self) -> f32 {
        let values: Vec<f32> = self
            .observations
            .iter()
            .filter(|o| o.confidence > 0.)
            .map(|o| o.centroid_hz)
            .collect();
        crate::utils::mean(&values)
    }

    #[must_use]
    pub fn mean_confidence(&self) -> f32 {
        let values: Vec<f32> = self.observations.iter().map(|o| o.confidence).collect();
        crate::utils::mean(&values)
    }

    /// Per-slot mean of the formant estimates.
    #[must_use]
    pub fn mean_formants_hz(&self) -> Vec<f32> {
        let slots = self
            .observations
            .iter()
            .map(|o| o.formants_hz.len())
            .max()
            .unwrap_or(0);
        (0..slots)
            .map(|slot| {
                let values: Vec<f32> = self
                    .observations
                    .iter()
                    .filter_map(|o| o.formants_hz.get(slot).copied())
                    .collect();
                crate::utils::mean(&values)
            })
            .collect()
    }

    pub fn reset(&mut self) {
        self.observations.clear();
    }
}

/// Index of the largest magnitude within `radius` bins of `target`.
fn local_peak(magnitudes: &[f32], target: usize, radius: usize) -> usize {
    let target = target.min(magnitudes.len().saturating_sub(1));
    let lo = target.saturating_sub(radius);
    let hi = (target + radius).min(magnitudes.len().saturating_sub(1));
    (lo..=hi)
        .max_by(|&a, &b| magnitudes[a].total_cmp(&magnitudes[b]))
        .unwrap_or(target)
}
