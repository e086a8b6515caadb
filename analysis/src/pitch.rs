//! Fundamental-frequency estimation.
//!
//! Implements the YIN estimator: a cumulative-mean-normalized difference
//! function over the candidate lag range, first-minimum-below-threshold
//! selection, and parabolic refinement of the chosen lag. Confidence is
//! `1 - d'(tau)` for the refined lag.

use crate::errors::{AnalysisError, AnalysisResult};
use crate::utils::{median_filter, parabolic_interpolation, rms};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchConfig {
    pub fmin_hz: f32,
    pub fmax_hz: f32,
    /// Aperiodicity threshold below which a lag qualifies as voiced.
    pub threshold: f32,
    /// Odd length of the median smoother over voiced observations;
    /// `0` or `1` disables smoothing.
    pub median: usize,
}

impl Default for PitchConfig {
    fn default() -> Self {
        Self {
            fmin_hz: 60.,
            fmax_hz: 1000.,
            threshold: 0.15,
            median: 5,
        }
    }
}

/// One per-frame pitch estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchObservation {
    pub time_sec: f32,
    /// Estimated fundamental in Hz; `0.` when unvoiced.
    pub f0_hz: f32,
    /// `1 - d'(tau)` clamped to [0, 1]; `0.` when unvoiced.
    pub confidence: f32,
    pub voiced: bool,
}

impl PitchObservation {
    #[must_use]
    const fn unvoiced(time_sec: f32) -> Self {
        Self {
            time_sec,
            f0_hz: 0.,
            confidence: 0.,
            voiced: false,
        }
    }
}

pub struct PitchDesc {
    sample_rate: u32,
    config: PitchConfig,
    tau_min: usize,
    tau_max: usize,
    /// Integration window length for the difference function.
    window: usize,
    observations: Vec<PitchObservation>,
    difference: Vec<f32>,
    cmnd: Vec<f32>,
}

impl PitchDesc {
    /// Frames quieter than this RMS are unvoiced without running YIN.
    const SILENCE_RMS: f32 = 1e-4;

    /// # Errors
    ///
    /// Returns an error if the pitch band is degenerate or the frame is too
    /// short to cover it.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn new(sample_rate: u32, frame_samples: usize, config: PitchConfig) -> AnalysisResult<Self> {
        if config.fmin_hz <= 0. || config.fmax_hz <= config.fmin_hz {
            return Err(AnalysisError::invalid(
                "pitch",
                format!("invalid band {}..{} Hz", config.fmin_hz, config.fmax_hz),
            ));
        }
        if config.fmax_hz > sample_rate as f32 / 2. {
            return Err(AnalysisError::invalid("pitch", "fmax above Nyquist"));
        }
        if !(0.0..1.0).contains(&config.threshold) {
            return Err(AnalysisError::invalid("pitch", "threshold must be in (0, 1)"));
        }
        if config.median > 1 && config.median % 2 == 0 {
            return Err(AnalysisError::invalid("pitch", "median length must be odd"));
        }
        let tau_min = ((sample_rate as f32 / config.fmax_hz).floor() as usize).max(2);
        // The difference function needs at least half a frame of support,
        // so the lag ceiling is clamped accordingly. At small frame sizes
        // the effective f0 floor rises above `fmin_hz`.
        let tau_max = ((sample_rate as f32 / config.fmin_hz).ceil() as usize).min(frame_samples / 2);
        if tau_max <= tau_min + 2 {
            return Err(AnalysisError::invalid(
                "pitch",
                format!("frame of {frame_samples} samples cannot cover the pitch band"),
            ));
        }
        Ok(Self {
            sample_rate,
            config,
            tau_min,
            tau_max,
            window: frame_samples - tau_max,
            observations: Vec::new(),
            difference: vec![0.; tau_max + 1],
            cmnd: vec![0.; tau_max + 1],
        })
    }

    /// Estimate the pitch of one frame and append the observation.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is shorter than the configured frame
    /// size.
    #[allow(clippy::cast_precision_loss)]
    pub fn do_(&mut self, frame: &[f32], time_sec: f32) -> AnalysisResult<PitchObservation> {
        if frame.len() < self.window + self.tau_max {
            return Err(AnalysisError::EmptySamples);
        }
        if rms(frame) < Self::SILENCE_RMS {
            let observation = PitchObservation::unvoiced(time_sec);
            self.observations.push(observation);
            return Ok(observation);
        }

        // d(tau): squared difference over a fixed integration window
        self.difference[0] = 0.;
        for tau in 1..=self.tau_max {
            let mut sum = 0.0f64;
            for j in 0..self.window {
                let delta = f64::from(frame[j]) - f64::from(frame[j + tau]);
                sum += delta * delta;
            }
            #[allow(clippy::cast_possible_truncation)]
            {
                self.difference[tau] = sum as f32;
            }
        }

        // d'(tau): cumulative-mean normalization
        self.cmnd[0] = 1.;
        let mut running = 0.0f64;
        for tau in 1..=self.tau_max {
            running += f64::from(self.difference[tau]);
            #[allow(clippy::cast_possible_truncation)]
            {
                self.cmnd[tau] = if running > 0. {
                    (f64::from(self.difference[tau]) * tau as f64 / running) as f32
                } else {
                    1.
                };
            }
        }

        let observation = self
            .select_lag()
            .map_or_else(
                || PitchObservation::unvoiced(time_sec),
                |(tau, aperiodicity)| PitchObservation {
                    time_sec,
                    f0_hz: self.sample_rate as f32 / tau,
                    confidence: (1. - aperiodicity).clamp(0., 1.),
                    voiced: true,
                },
            );
        self.observations.push(observation);
        Ok(observation)
    }

    /// First local minimum of `d'` below the threshold, parabolic refined.
    #[allow(clippy::cast_precision_loss)]
    fn select_lag(&self) -> Option<(f32, f32)> {
        let mut tau = self.tau_min;
        while tau < self.tau_max {
            if self.cmnd[tau] < self.config.threshold {
                while tau + 1 <= self.tau_max && self.cmnd[tau + 1] < self.cmnd[tau] {
                    tau += 1;
                }
                let offset = if tau > 0 && tau < self.tau_max {
                    parabolic_interpolation(self.cmnd[tau - 1], self.cmnd[tau], self.cmnd[tau + 1])
                } else {
                    0.
                };
                return Some((tau as f32 + offset, self.cmnd[tau]));
            }
            tau += 1;
        }
        None
    }

    #[must_use]
    pub fn observations(&self) -> &[PitchObservation] {
        &self.observations
    }

    /// Observations with the voiced f0 values median-smoothed in place.
    #[must_use]
    pub fn smoothed_contour(&self) -> Vec<PitchObservation> {
        let voiced_f0: Vec<f32> = self
            .observations
            .iter()
            .filter(|o| o.voiced)
            .map(|o| o.f0_hz)
            .collect();
        if voiced_f0.is_empty() {
            return self.observations.clone();
        }
        let smoothed = median_filter(&voiced_f0, self.config.median.max(1) | 1);
        let mut iter = smoothed.into_iter();
        self.observations
            .iter()
            .map(|o| {
                if o.voiced {
                    PitchObservation {
                        f0_hz: iter.next().unwrap_or(o.f0_hz),
                        ..*o
                    }
                } else {
                    *o
                }
            })
            .collect()
    }

    /// Mean f0 over voiced observations of the smoothed contour.
    #[must_use]
    pub fn mean_f0_hz(&self) -> Option<f32> {
        let contour = self.smoothed_contour();
        let voiced: Vec<f32> = contour.iter().filter(|o| o.voiced).map(|o| o.f0_hz).collect();
        if voiced.is_empty() {
            None
        } else {
            Some(crate::utils::mean(&voiced))
        }
    }

    /// Mean confidence over voiced observations.
    #[must_use]
    pub fn mean_confidence(&self) -> f32 {
        let voiced: Vec<f32> = self
            .observations
            .iter()
            .filter(|o| o.voiced)
            .map(|o| o.confidence)
            .collect();
        crate::utils::mean(&voiced)
    }

    pub fn reset(&mut self) {
        self.observations.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::sine_wave;

    fn track(samples: &[f32]) -> PitchDesc {
        let mut desc = PitchDesc::new(44_100, 1024, PitchConfig::default()).unwrap();
        #[allow(clippy::cast_precision_loss)]
        for (i, frame) in samples.windows(1024).step_by(512).enumerate() {
            desc.do_(frame, i as f32 * 512. / 44_100.).unwrap();
        }
        desc
    }

    /// Deterministic pseudo-noise, no RNG dependency needed.
    fn white_noise(count: usize) -> Vec<f32> {
        let mut state = 0x2545_f491u32;
        (0..count)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                #[allow(clippy::cast_precision_loss)]
                {
                    (f64::from(state) / f64::from(u32::MAX) * 2. - 1.) as f32
                }
            })
            .collect()
    }

    #[test]
    fn test_tone_440() {
        let desc = track(&sine_wave(440., 1.0, 44_100, 0.5));
        let f0 = desc.mean_f0_hz().unwrap();
        assert!((439.5..=440.5).contains(&f0), "{f0} out of band");
        assert!(desc.mean_confidence() > 0.9);
    }

    #[test]
    fn test_tone_880_doubles() {
        let low = track(&sine_wave(440., 1.0, 44_100, 0.5));
        let high = track(&sine_wave(880., 1.0, 44_100, 0.5));
        let ratio = high.mean_f0_hz().unwrap() / low.mean_f0_hz().unwrap();
        assert!((1.99..=2.01).contains(&ratio), "{ratio} !~= 2.0");
    }

    #[test]
    fn test_silence_is_unvoiced() {
        let desc = track(&vec![0.; 44_100]);
        assert!(desc.observations().iter().all(|o| !o.voiced));
        assert!(desc.mean_f0_hz().is_none());
    }

    #[test]
    fn test_noise_rarely_voiced() {
        let desc = track(&white_noise(44_100));
        let voiced = desc.observations().iter().filter(|o| o.voiced).count();
        #[allow(clippy::cast_precision_loss)]
        let ratio = voiced as f32 / desc.observations().len() as f32;
        assert!(ratio < 0.2, "noise voiced in {ratio} of frames");
    }

    #[test]
    fn test_band_validation() {
        assert!(PitchDesc::new(44_100, 1024, PitchConfig { fmin_hz: 0., ..PitchConfig::default() }).is_err());
        assert!(PitchDesc::new(
            44_100,
            1024,
            PitchConfig { fmax_hz: 40_000., ..PitchConfig::default() }
        )
        .is_err());
        // A 64-sample frame cannot cover a 60 Hz floor at 44.1 kHz
        assert!(PitchDesc::new(44_100, 64, PitchConfig::default()).is_err());
    }

    #[test]
    fn test_median_smoothing_removes_spikes() {
        let mut desc = track(&sine_wave(440., 1.0, 44_100, 0.5));
        // Inject one octave-error spike into the raw observations
        let spike_index = desc.observations.len() / 2;
        desc.observations[spike_index].f0_hz = 880.;
        let contour = desc.smoothed_contour();
        assert!((contour[spike_index].f0_hz - 440.).abs() < 5.);
    }
}
