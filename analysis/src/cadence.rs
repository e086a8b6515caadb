//! Rhythm feature extraction.
//!
//! Onset detection uses a normalized spectral-flux signal with an adaptive
//! local-median threshold and a refractory period. Tempo is estimated at
//! finalize time by autocorrelating the onset-strength sequence inside the
//! plausible inter-onset-interval range.

use log::debug;
use ndarray::arr1;
use ndarray_stats::interpolate::Midpoint;
use ndarray_stats::Quantile1dExt;
use noisy_float::prelude::*;

use crate::errors::{AnalysisError, AnalysisResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CadenceConfig {
    /// Dead time after an accepted onset.
    pub refractory_ms: f32,
    /// Offset added to the local flux median to form the pick threshold.
    pub threshold_delta: f32,
    /// Flux frames considered by the adaptive median.
    pub median_window: usize,
    /// Inter-onset-interval search range for tempo.
    pub min_ioi_ms: f32,
    pub max_ioi_ms: f32,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            refractory_ms: 50.,
            threshold_delta: 0.1,
            median_window: 11,
            min_ioi_ms: 200.,
            max_ioi_ms: 2000.,
        }
    }
}

/// Tempo summary produced after the full recording was observed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoEstimate {
    pub bpm: f32,
    /// `1 - mean/peak` of the interval autocorrelation: 0 for a flat
    /// onset-strength signal, approaching 1 for a strongly periodic one.
    pub rhythm_strength: f32,
}

pub struct CadenceDesc {
    #[allow(dead_code)]
    sample_rate: u32,
    frame_period_sec: f32,
    config: CadenceConfig,
    refractory_frames: usize,
    previous: Vec<f32>,
    flux: Vec<f32>,
    flux_times: Vec<f32>,
    onsets_sec: Vec<f32>,
    last_onset_frame: Option<usize>,
    median_scratch: Vec<f32>,
}

impl CadenceDesc {
    /// # Errors
    ///
    /// Returns an error for a zero hop or an inverted interval range.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn new(config: CadenceConfig, sample_rate: u32, hop_samples: usize) -> AnalysisResult<Self> {
        if hop_samples == 0 || sample_rate == 0 {
            return Err(AnalysisError::invalid("cadence", "hop and sample rate must be non-zero"));
        }
        if config.max_ioi_ms <= config.min_ioi_ms || config.min_ioi_ms <= 0. {
            return Err(AnalysisError::invalid("cadence", "inverted inter-onset range"));
        }
        if config.median_window == 0 {
            return Err(AnalysisError::invalid("cadence", "median window must be non-zero"));
        }
        let frame_period_sec = hop_samples as f32 / sample_rate as f32;
        let refractory_frames = (config.refractory_ms / 1000. / frame_period_sec).ceil() as usize;
        Ok(Self {
            sample_rate,
            frame_period_sec,
            config,
            refractory_frames: refractory_frames.max(1),
            previous: Vec::new(),
            flux: Vec::new(),
            flux_times: Vec::new(),
            onsets_sec: Vec::new(),
            last_onset_frame: None,
            median_scratch: Vec::new(),
        })
    }

    /// Feed one magnitude spectrum. Onset decisions lag one frame behind
    /// the input so each candidate can be confirmed as a local peak.
    ///
    /// # Errors
    ///
    /// Returns an error on an empty spectrum.
    pub fn do_(&mut self, magnitudes: &[f32], time_sec: f32) -> AnalysisResult<()> {
        if magnitudes.is_empty() {
            return Err(AnalysisError::EmptySamples);
        }
        let mut rise = 0.0f64;
        let mut total = 0.0f64;
        for (i, &m) in magnitudes.iter().enumerate() {
            let prev = self.previous.get(i).copied().unwrap_or(0.);
            rise += f64::from((m - prev).max(0.));
            total += f64::from(m);
        }
        #[allow(clippy::cast_possible_truncation)]
        let flux = if total > 1e-9 { (rise / (total + 1e-9)) as f32 } else { 0. };

        self.previous.clear();
        self.previous.extend_from_slice(magnitudes);
        self.flux.push(flux);
        self.flux_times.push(time_sec);

        self.pick_peak();
        Ok(())
    }

    /// Evaluate the previous flux frame as an onset candidate.
    fn pick_peak(&mut self) {
        let t = self.flux.len();
        if t < 2 {
            return;
        }
        let candidate_index = t - 2;
        let candidate = self.flux[candidate_index];
        let before = candidate_index
            .checked_sub(1)
            .map_or(0., |i| self.flux[i]);
        let after = self.flux[t - 1];
        if candidate < before || candidate <= after {
            return;
        }

        // Adaptive threshold: local median plus a fixed delta
        let window_start = candidate_index.saturating_sub(self.config.median_window);
        self.median_scratch.clear();
        self.median_scratch
            .extend_from_slice(&self.flux[window_start..candidate_index]);
        let median = if self.median_scratch.is_empty() {
            0.
        } else {
            arr1(&self.median_scratch)
                .mapv(n32)
                .quantile_mut(n64(0.5), &Midpoint)
                .map_or(0., N32::raw)
        };
        if candidate <= median + self.config.threshold_delta {
            return;
        }

        if let Some(last) = self.last_onset_frame {
            if candidate_index - last < self.refractory_frames {
                return;
            }
        }
        self.last_onset_frame = Some(candidate_index);
        self.onsets_sec.push(self.flux_times[candidate_index]);
    }

    #[must_use]
    pub fn onsets_sec(&self) -> &[f32] {
        &self.onsets_sec
    }

    /// Autocorrelation tempo estimate over the configured interval range.
    /// `None` until the onset-strength sequence spans at least two minimal
    /// intervals, or when the signal carries no energy.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    #[must_use]
    pub fn tempo(&self) -> Option<TempoEstimate> {
        let min_lag = ((self.config.min_ioi_ms / 1000.) / self.frame_period_sec).round() as usize;
        let max_lag = ((self.config.max_ioi_ms / 1000.) / self.frame_period_sec).round() as usize;
        let min_lag = min_lag.max(1);
        if self.flux.len() < min_lag * 2 + 1 {
            debug!(
                "onset-strength sequence of {} frames is too short for tempo estimation",
                self.flux.len()
            );
            return None;
        }
        let max_lag = max_lag.min(self.flux.len() - 1);

        let mut best_lag = 0usize;
        let mut best_value = 0.0f64;
        let mut sum = 0.0f64;
        let mut count = 0usize;
        for lag in min_lag..=max_lag {
            let mut acc = 0.0f64;
            for t in 0..self.flux.len() - lag {
                acc += f64::from(self.flux[t]) * f64::from(self.flux[t + lag]);
            }
            // Biased estimator: dividing by the full length (not n - lag)
            // keeps harmonics of the true period below the period itself.
            let value = acc / self.flux.len() as f64;
            sum += value;
            count += 1;
            if value > best_value {
                best_value = value;
                best_lag = lag;
            }
        }
        if best_lag == 0 || best_value <= 0. {
            return None;
        }
        let mean = sum / count as f64;
        let interval_sec = best_lag as f32 * self.frame_period_sec;
        Some(TempoEstimate {
            bpm: 60. / interval_sec,
            rhythm_strength: ((1. - mean / best_value) as f32).clamp(0., 1.),
        })
    }

    pub fn reset(&mut self) {
        self.previous.clear();
        self.flux.clear();
        self.flux_times.clear();
        self.onsets_sec.clear();
        self.last_onset_frame = None;
    }
}
