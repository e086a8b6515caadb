//! Master-call templates.
//!
//! A template is the immutable, precomputed feature bundle of a reference
//! recording: MFCC frames, pitch contour, harmonic centroid trajectory,
//! cadence profile and loudness envelope. Templates are built once (from
//! decoded PCM or a persisted bundle), shared read-only behind an `Arc`,
//! and never mutated afterwards.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::debug;

use huntmaster_analysis::{
    utils, CadenceDesc, HarmonicDesc, LoudnessDesc, MfccDesc, PitchDesc, SpectrumAnalyzer, Window,
};

use crate::config::SessionConfig;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchPoint {
    pub time_sec: f32,
    pub f0_hz: f32,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectoryPoint {
    pub time_sec: f32,
    pub centroid_hz: f32,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnessPoint {
    pub time_sec: f32,
    pub rms_dbfs: f32,
    pub peak_dbfs: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MasterCallTemplate {
    pub id: String,
    pub sample_rate: u32,
    pub frame_samples: u32,
    pub hop_samples: u32,
    pub duration_sec: f32,
    /// F frames of C coefficients.
    pub mfcc: Vec<Vec<f32>>,
    pub pitch: Vec<PitchPoint>,
    pub harmonics: Vec<TrajectoryPoint>,
    /// Mean formant estimates in ascending frequency, up to four.
    /// Derived at build time; not part of the persisted bundle.
    pub formants_hz: Vec<f32>,
    pub onsets_sec: Vec<f32>,
    pub tempo_bpm: f32,
    pub rhythm_strength: f32,
    pub loudness: Vec<LoudnessPoint>,
}

impl MasterCallTemplate {
    /// Build a template from decoded mono PCM using the same extractor
    /// bank a session runs. `config` supplies the frame grid and analyzer
    /// parameters; its sample rate is ignored in favor of `sample_rate`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAudioData` for empty, non-finite or too-short
    /// input, `InvalidConfig` for a bad analyzer configuration.
    #[allow(clippy::cast_precision_loss)]
    pub fn from_samples(
        id: impl Into<String>,
        samples: &[f32],
        sample_rate: u32,
        config: &SessionConfig,
    ) -> EngineResult<Self> {
        if samples.is_empty() {
            return Err(EngineError::InvalidAudioData("master PCM is empty".into()));
        }
        if utils::has_non_finite(samples) {
            return Err(EngineError::InvalidAudioData(
                "master PCM contains a NaN or infinite sample".into(),
            ));
        }
        let frame = config.frame_samples;
        let hop = config.hop_samples;
        if samples.len() < frame {
            return Err(EngineError::InvalidAudioData(format!(
                "master PCM of {} samples is shorter than one frame ({frame})",
                samples.len()
            )));
        }

        let window = Window::new(config.window_function, frame)?;
        let spectrum = SpectrumAnalyzer::new(config.fft_size, sample_rate)?;
        let mut mfcc = MfccDesc::new(&config.mfcc_config(), config.fft_size, sample_rate)?;
        let mut pitch = PitchDesc::new(sample_rate, frame, config.pitch_config())?;
        let mut harmonic = HarmonicDesc::new(config.harmonic_config(), config.fft_size, sample_rate)?;
        let mut cadence = CadenceDesc::new(config.cadence_config(), sample_rate, hop)?;
        let mut loudness = LoudnessDesc::new();

        let mut windowed = Vec::with_capacity(frame);
        let mut magnitudes = Vec::new();
        for (index, raw) in samples.windows(frame).step_by(hop).enumerate() {
            let time_sec = index as f32 * hop as f32 / sample_rate as f32;
            loudness.do_(raw, time_sec);
            window.apply_into(raw, &mut windowed);
            spectrum.magnitudes(&windowed, &mut magnitudes)?;
            let observation = pitch.do_(raw, time_sec)?;
            let hint = observation.voiced.then_some(observation.f0_hz);
            harmonic.do_(&magnitudes, hint, time_sec)?;
            cadence.do_(&magnitudes, time_sec)?;
            mfcc.do_(&magnitudes)?;
        }

        let tempo = cadence.tempo();
        let template = Self {
            id: id.into(),
            sample_rate,
            frame_samples: u32::try_from(frame).unwrap_or(u32::MAX),
            hop_samples: u32::try_from(hop).unwrap_or(u32::MAX),
            duration_sec: samples.len() as f32 / sample_rate as f32,
            mfcc: mfcc.frames().to_vec(),
            pitch: pitch
                .smoothed_contour()
                .iter()
                .map(|o| PitchPoint {
                    time_sec: o.time_sec,
                    f0_hz: o.f0_hz,
                    confidence: o.confidence,
                })
                .collect(),
            harmonics: harmonic
                .observations()
                .iter()
                .map(|o| TrajectoryPoint {
                    time_sec: o.time_sec,
                    centroid_hz: o.centroid_hz,
                    confidence: o.confidence,
                })
                .collect(),
            formants_hz: harmonic.mean_formants_hz(),
            onsets_sec: cadence.onsets_sec().to_vec(),
            tempo_bpm: tempo.map_or(0., |t| t.bpm),
            rhythm_strength: tempo.map_or(0., |t| t.rhythm_strength),
            loudness: loudness
                .observations()
                .iter()
                .map(|o| LoudnessPoint {
                    time_sec: o.time_sec,
                    rms_dbfs: o.rms_dbfs,
                    peak_dbfs: o.peak_dbfs,
                })
                .collect(),
        };
        debug!(
            "built master template '{}': {} mfcc frames, {:.2}s",
            template.id,
            template.mfcc.len(),
            template.duration_sec
        );
        Ok(template)
    }

    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn frame_period_sec(&self) -> f32 {
        self.hop_samples as f32 / self.sample_rate as f32
    }

    /// Mean f0 over voiced contour points.
    #[must_use]
    pub fn mean_f0_hz(&self) -> Option<f32> {
        let voiced: Vec<f32> = self
            .pitch
            .iter()
            .filter(|p| p.f0_hz > 0.)
            .map(|p| p.f0_hz)
            .collect();
        if voiced.is_empty() {
            None
        } else {
            Some(utils::mean(&voiced))
        }
    }

    /// Mean spectral centroid over frames with harmonic content.
    #[must_use]
    pub fn mean_centroid_hz(&self) -> f32 {
        let values: Vec<f32> = self
            .harmonics
            .iter()
            .filter(|p| p.confidence > 0.)
            .map(|p| p.centroid_hz)
            .collect();
        utils::mean(&values)
    }

    /// Long-term RMS in dBFS, power-averaged over the envelope.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    #[must_use]
    pub fn long_term_rms_dbfs(&self) -> f32 {
        if self.loudness.is_empty() {
            return utils::DBFS_FLOOR;
        }
        let mean_power: f64 = self
            .loudness
            .iter()
            .map(|p| 10f64.powf(f64::from(p.rms_dbfs) / 10.))
            .sum::<f64>()
            / self.loudness.len() as f64;
        ((10. * mean_power.log10()) as f32).max(utils::DBFS_FLOOR)
    }

    /// Deterministically re-time the template onto another session grid.
    ///
    /// Contour points carry absolute timestamps and survive unchanged;
    /// only the MFCC frame grid is interpolated onto the new frame period.
    /// Returns a clone when the grid already matches.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    #[must_use]
    pub fn retimed(&self, sample_rate: u32, frame_samples: usize, hop_samples: usize) -> Self {
        if sample_rate == self.sample_rate
            && frame_samples == self.frame_samples as usize
            && hop_samples == self.hop_samples as usize
        {
            return self.clone();
        }
        let source_period = f64::from(self.frame_period_sec());
        let target_period = hop_samples as f64 / f64::from(sample_rate);
        let source_frames = self.mfcc.len();
        let mut mfcc = Vec::new();
        if source_frames > 0 {
            let target_frames =
                ((f64::from(self.duration_sec) / target_period).floor() as usize).max(1);
            for k in 0..target_frames {
                let position = (k as f64 * target_period / source_period)
                    .min((source_frames - 1) as f64);
                let base = position.floor() as usize;
                let fraction = (position - base as f64) as f32;
                let next = (base + 1).min(source_frames - 1);
                let frame: Vec<f32> = self.mfcc[base]
                    .iter()
                    .zip(&self.mfcc[next])
                    .map(|(&a, &b)| a + (b - a) * fraction)
                    .collect();
                mfcc.push(frame);
            }
        }
        Self {
            sample_rate,
            frame_samples: u32::try_from(frame_samples).unwrap_or(u32::MAX),
            hop_samples: u32::try_from(hop_samples).unwrap_or(u32::MAX),
            mfcc,
            ..self.clone()
        }
    }
}

/// Registry of loaded templates. Templates stay alive for as long as any
/// session still holds an `Arc` to them, `unload` only drops the store's
/// own reference.
#[derive(Default)]
pub struct MasterStore {
    inner: RwLock<HashMap<String, Arc<MasterCallTemplate>>>,
}

impl MasterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a template.
    pub fn load(&self, template: MasterCallTemplate) {
        let id = template.id.clone();
        let mut inner = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if inner.insert(id.clone(), Arc::new(template)).is_some() {
            debug!("replaced master call '{id}'");
        }
    }

    /// # Errors
    ///
    /// Returns `MasterNotFound` for an unknown id.
    pub fn get(&self, id: &str) -> EngineResult<Arc<MasterCallTemplate>> {
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::MasterNotFound(id.into()))
    }

    /// # Errors
    ///
    /// Returns `MasterNotFound` for an unknown id.
    pub fn unload(&self, id: &str) -> EngineResult<()> {
        self.inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| EngineError::MasterNotFound(id.into()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
