//! Loudness envelopes and level calibration.
//!
//! Per hop the meter records windowed RMS and peak in dBFS. Long-term RMS
//! is accumulated in f64 so multi-minute sessions do not drift; it feeds
//! the normalization gain that aligns user and master levels before
//! scoring. A calibration advisor watches the voiced frames for overload
//! and too-quiet input.

use crate::utils::{amplitude_to_dbfs, DBFS_FLOOR};

/// Normalization gain is clamped to this symmetric range.
pub const MAX_NORMALIZATION_DB: f32 = 24.;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnessObservation {
    pub time_sec: f32,
    pub rms_dbfs: f32,
    pub peak_dbfs: f32,
}

#[derive(Default)]
pub struct LoudnessDesc {
    observations: Vec<LoudnessObservation>,
    sum_squares: f64,
    sample_count: u64,
}

impl LoudnessDesc {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Measure one hop window.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn do_(&mut self, window: &[f32], time_sec: f32) -> LoudnessObservation {
        let mut peak = 0.0f32;
        let mut squares = 0.0f64;
        for &sample in window {
            peak = peak.max(sample.abs());
            squares += f64::from(sample) * f64::from(sample);
        }
        self.sum_squares += squares;
        self.sample_count += window.len() as u64;

        let rms = if window.is_empty() {
            0.
        } else {
            ((squares / window.len() as f64).sqrt()) as f32
        };
        let observation = LoudnessObservation {
            time_sec,
            rms_dbfs: amplitude_to_dbfs(rms),
            peak_dbfs: amplitude_to_dbfs(peak),
        };
        self.observations.push(observation);
        observation
    }

    #[must_use]
    pub fn observations(&self) -> &[LoudnessObservation] {
        &self.observations
    }

    /// RMS over every sample seen so far, in dBFS.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    #[must_use]
    pub fn long_term_rms_dbfs(&self) -> f32 {
        if self.sample_count == 0 {
            return DBFS_FLOOR;
        }
        let rms = (self.sum_squares / self.sample_count as f64).sqrt();
        amplitude_to_dbfs(rms as f32)
    }

    /// Highest windowed peak seen so far, in dBFS.
    #[must_use]
    pub fn max_peak_dbfs(&self) -> f32 {
        self.observations
            .iter()
            .map(|o| o.peak_dbfs)
            .fold(DBFS_FLOOR, f32::max)
    }

    pub fn reset(&mut self) {
        self.observations.clear();
        self.sum_squares = 0.;
        self.sample_count = 0;
    }
}

/// Gain (dB) to apply to the user signal so its long-term RMS matches the
/// master's, clamped to ±[`MAX_NORMALIZATION_DB`].
#[must_use]
#[inline]
pub fn normalization_gain_db(master_rms_dbfs: f32, user_rms_dbfs: f32) -> f32 {
    (master_rms_dbfs - user_rms_dbfs).clamp(-MAX_NORMALIZATION_DB, MAX_NORMALIZATION_DB)
}

/// Input-level advice derived from the voiced portion of a take.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CalibrationReport {
    /// Margin between the loudest peak and 0 dBFS.
    pub headroom_db: f32,
    /// True when more than 1 % of voiced frames peaked above -1 dBFS.
    pub overload: bool,
    /// True when more than half of the voiced frames stayed below -40 dBFS.
    pub low_level: bool,
}

#[derive(Debug, Default)]
pub struct CalibrationAdvisor {
    voiced_frames: u32,
    overload_frames: u32,
    low_frames: u32,
    max_peak_dbfs: f32,
    any_frame: bool,
}

impl CalibrationAdvisor {
    const OVERLOAD_PEAK_DBFS: f32 = -1.;
    const OVERLOAD_RATIO: f32 = 0.01;
    const LOW_RMS_DBFS: f32 = -40.;
    const LOW_RATIO: f32 = 0.5;

    #[must_use]
    pub fn new() -> Self {
        Self {
            max_peak_dbfs: DBFS_FLOOR,
            ..Self::default()
        }
    }

    pub fn observe(&mut self, observation: &LoudnessObservation, voiced: bool) {
        self.any_frame = true;
        self.max_peak_dbfs = self.max_peak_dbfs.max(observation.peak_dbfs);
        if !voiced {
            return;
        }
        self.voiced_frames += 1;
        if observation.peak_dbfs > Self::OVERLOAD_PEAK_DBFS {
            self.overload_frames += 1;
        }
        if observation.rms_dbfs < Self::LOW_RMS_DBFS {
            self.low_frames += 1;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn report(&self) -> CalibrationReport {
        if !self.any_frame {
            return CalibrationReport::default();
        }
        let voiced = self.voiced_frames.max(1) as f32;
        CalibrationReport {
            headroom_db: -self.max_peak_dbfs,
            overload: self.voiced_frames > 0
                && self.overload_frames as f32 / voiced > Self::OVERLOAD_RATIO,
            low_level: self.voiced_frames > 0 && self.low_frames as f32 / voiced > Self::LOW_RATIO,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
