//! Session configuration surface.
//!
//! All options are fixed at session creation; unknown keys in a serialized
//! config are rejected at deserialization time, which is how the engine
//! keeps the `InvalidConfig` contract for misspelled options.

use serde::{Deserialize, Deserializer};

use huntmaster_analysis::{
    CadenceConfig, DtwParams, HarmonicConfig, MfccConfig, PitchConfig, VadConfig, WindowFunction,
};

use crate::error::{EngineError, EngineResult};

/// Largest chunk `processAudioChunk` accepts, in samples.
pub const MAX_CHUNK_SAMPLES: usize = 16_384;

/// Per-component fusion weights; must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(from = "[f32; 4]")]
pub struct FusionWeights {
    pub mfcc: f32,
    pub pitch: f32,
    pub harmonic: f32,
    pub cadence: f32,
}

impl From<[f32; 4]> for FusionWeights {
    fn from([mfcc, pitch, harmonic, cadence]: [f32; 4]) -> Self {
        Self {
            mfcc,
            pitch,
            harmonic,
            cadence,
        }
    }
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            mfcc: 0.4,
            pitch: 0.25,
            harmonic: 0.2,
            cadence: 0.15,
        }
    }
}

impl FusionWeights {
    #[must_use]
    pub fn sum(&self) -> f32 {
        self.mfcc + self.pitch + self.harmonic + self.cadence
    }
}

fn window_function<'de, D>(deserializer: D) -> Result<WindowFunction, D::Error>
where
    D: Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    name.parse()
        .map_err(|_| serde::de::Error::custom(format!("unknown window function: {name}")))
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Immutable for the life of the session.
    pub sample_rate: u32,
    /// Input ring capacity in samples.
    pub buffer_size: usize,
    pub frame_samples: usize,
    pub hop_samples: usize,
    pub fft_size: usize,
    pub mfcc_coefficients: usize,
    pub mel_filters: usize,
    #[serde(deserialize_with = "window_function")]
    pub window_function: WindowFunction,

    pub pitch_f_min: f32,
    pub pitch_f_max: f32,
    pub pitch_threshold: f32,
    pub pitch_median_k: usize,

    pub vad_energy_on: f32,
    pub vad_energy_off: f32,
    pub vad_flatness_on: f32,
    pub vad_flatness_off: f32,
    pub vad_min_sound_ms: f32,
    pub vad_min_silence_ms: f32,

    pub dtw_band_ratio: f32,
    pub dtw_early_stop: f64,

    pub scorer_update_interval_frames: usize,
    pub scorer_window_frames: usize,
    pub scorer_min_frames: usize,
    pub scorer_min_score: f32,

    pub fusion_weights: FusionWeights,

    pub enable_pitch: bool,
    pub enable_harmonic: bool,
    pub enable_cadence: bool,
    pub enable_realtime: bool,

    /// Reject chunks with `Backpressure` instead of dropping old samples.
    pub strict_backpressure: bool,

    /// Soft per-chunk processing budget; two consecutive misses downgrade
    /// the session's quality tier.
    pub chunk_budget_ms: f32,
    /// Hard finalize budget before the degraded streaming-features path.
    pub finalize_budget_ms: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            buffer_size: 1 << 18,
            frame_samples: 1024,
            hop_samples: 512,
            fft_size: 1024,
            mfcc_coefficients: 13,
            mel_filters: 26,
            window_function: WindowFunction::Hann,
            pitch_f_min: 60.,
            pitch_f_max: 1000.,
            pitch_threshold: 0.15,
            pitch_median_k: 5,
            vad_energy_on: -40.,
            vad_energy_off: -48.,
            vad_flatness_on: 0.9,
            vad_flatness_off: 0.95,
            vad_min_sound_ms: 100.,
            vad_min_silence_ms: 200.,
            dtw_band_ratio: 0.1,
            dtw_early_stop: 1e5,
            scorer_update_interval_frames: 8,
            scorer_window_frames: 64,
            scorer_min_frames: 10,
            scorer_min_score: 0.25,
            fusion_weights: FusionWeights::default(),
            enable_pitch: true,
            enable_harmonic: true,
            enable_cadence: true,
            enable_realtime: true,
            strict_backpressure: false,
            chunk_budget_ms: 12.,
            finalize_budget_ms: 40.,
        }
    }
}

impl SessionConfig {
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first offending option.
    pub fn validate(&self) -> EngineResult<()> {
        let fail = |message: String| Err(EngineError::InvalidConfig(message));

        if !(8_000..=192_000).contains(&self.sample_rate) {
            return fail(format!("sampleRate {} out of 8000..=192000", self.sample_rate));
        }
        if self.frame_samples == 0 {
            return fail("frameSamples must be non-zero".into());
        }
        if self.hop_samples == 0 || self.hop_samples > self.frame_samples {
            return fail(format!(
                "hopSamples {} must be in 1..=frameSamples ({})",
                self.hop_samples, self.frame_samples
            ));
        }
        if !self.fft_size.is_power_of_two() || self.fft_size < self.frame_samples {
            return fail(format!(
                "fftSize {} must be a power of two >= frameSamples ({})",
                self.fft_size, self.frame_samples
            ));
        }
        if self.buffer_size < self.frame_samples * 4 {
            return fail(format!(
                "bufferSize {} must hold at least four frames ({})",
                self.buffer_size,
                self.frame_samples * 4
            ));
        }
        if self.mel_filters < 2 || self.mfcc_coefficients < 2 || self.mfcc_coefficients > self.mel_filters {
            return fail(format!(
                "mfccCoefficients {} must be in 2..=melFilters ({})",
                self.mfcc_coefficients, self.mel_filters
            ));
        }
        if self.pitch_f_min <= 0.
            || self.pitch_f_max <= self.pitch_f_min
            || self.pitch_f_max > self.sample_rate as f32 / 2.
        {
            return fail(format!(
                "pitch band {}..{} Hz invalid at {} Hz",
                self.pitch_f_min, self.pitch_f_max, self.sample_rate
            ));
        }
        if !(0.0..1.0).contains(&self.pitch_threshold) || self.pitch_threshold == 0. {
            return fail(format!("pitchThreshold {} must be in (0, 1)", self.pitch_threshold));
        }
        if self.pitch_median_k > 1 && self.pitch_median_k % 2 == 0 {
            return fail(format!("pitchMedianK {} must be odd", self.pitch_median_k));
        }
        if self.vad_energy_off > self.vad_energy_on {
            return fail("vadEnergyOff must not exceed vadEnergyOn".into());
        }
        if self.vad_flatness_on > self.vad_flatness_off {
            return fail("vadFlatnessOn must not exceed vadFlatnessOff".into());
        }
        if self.vad_min_sound_ms <= 0. || self.vad_min_silence_ms <= 0. {
            return fail("VAD durations must be positive".into());
        }
        if !(0.0..=1.0).contains(&self.dtw_band_ratio) || self.dtw_band_ratio == 0. {
            return fail(format!("dtwBandRatio {} must be in (0, 1]", self.dtw_band_ratio));
        }
        if self.dtw_early_stop <= 0. {
            return fail("dtwEarlyStop must be positive".into());
        }
        if self.scorer_update_interval_frames == 0
            || self.scorer_window_frames < 4
            || self.scorer_min_frames == 0
        {
            return fail("realtime scorer frame counts are out of range".into());
        }
        if !(0.0..1.0).contains(&self.scorer_min_score) {
            return fail(format!("scorerMinScore {} must be in [0, 1)", self.scorer_min_score));
        }
        let weights = &self.fusion_weights;
        if weights.mfcc < 0. || weights.pitch < 0. || weights.harmonic < 0. || weights.cadence < 0. {
            return fail("fusion weights must be non-negative".into());
        }
        if (weights.sum() - 1.).abs() > 1e-3 {
            return fail(format!("fusion weights sum to {}, expected 1", weights.sum()));
        }
        if self.chunk_budget_ms <= 0. || self.finalize_budget_ms <= 0. {
            return fail("processing budgets must be positive".into());
        }
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn frame_period_sec(&self) -> f32 {
        self.hop_samples as f32 / self.sample_rate as f32
    }

    #[must_use]
    pub fn mfcc_config(&self) -> MfccConfig {
        MfccConfig {
            coefficients: self.mfcc_coefficients,
            filters: self.mel_filters,
            ..MfccConfig::default()
        }
    }

    #[must_use]
    pub fn pitch_config(&self) -> PitchConfig {
        PitchConfig {
            fmin_hz: self.pitch_f_min,
            fmax_hz: self.pitch_f_max,
            threshold: self.pitch_threshold,
            median: self.pitch_median_k,
        }
    }

    #[must_use]
    pub fn vad_config(&self) -> VadConfig {
        VadConfig {
            energy_on_dbfs: self.vad_energy_on,
            energy_off_dbfs: self.vad_energy_off,
            flatness_on: self.vad_flatness_on,
            flatness_off: self.vad_flatness_off,
            min_sound_ms: self.vad_min_sound_ms,
            min_silence_ms: self.vad_min_silence_ms,
        }
    }

    #[must_use]
    pub fn harmonic_config(&self) -> HarmonicConfig {
        HarmonicConfig {
            fmin_hz: self.pitch_f_min,
            ..HarmonicConfig::default()
        }
    }

    #[must_use]
    pub fn cadence_config(&self) -> CadenceConfig {
        CadenceConfig::default()
    }

    #[must_use]
    pub fn dtw_params(&self) -> DtwParams {
        DtwParams {
            band_ratio: self.dtw_band_ratio,
            early_stop: self.dtw_early_stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_is_valid() {
        SessionConfig::default().validate().unwrap();
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result: Result<SessionConfig, _> =
            serde_json::from_str(r#"{"sampleRate": 48000, "definitelyNotAKey": 1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: SessionConfig = serde_json::from_str(r#"{"sampleRate": 48000}"#).unwrap();
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.frame_samples, 1024);
        assert_eq!(config.window_function, WindowFunction::Hann);
    }

    #[test]
    fn test_window_function_parses() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"windowFunction": "blackman"}"#).unwrap();
        assert_eq!(config.window_function, WindowFunction::Blackman);
        let bad: Result<SessionConfig, _> =
            serde_json::from_str(r#"{"windowFunction": "kaiser"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_fusion_weights_from_array() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"fusionWeights": [0.7, 0.1, 0.1, 0.1]}"#).unwrap();
        assert!((config.fusion_weights.mfcc - 0.7).abs() < f32::EPSILON);
        config.validate().unwrap();
    }

    #[test]
    fn test_bad_weights_fail_validation() {
        let config = SessionConfig {
            fusion_weights: FusionWeights::from([0.5, 0.5, 0.5, 0.5]),
            ..SessionConfig::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_fft_must_cover_frame() {
        let config = SessionConfig {
            fft_size: 512,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_hop_bounds() {
        let config = SessionConfig {
            hop_samples: 2048,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_even_median_rejected() {
        let config = SessionConfig {
            pitch_median_k: 4,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
