//! Finalized analysis results.

use serde::Serialize;
use strum::Display;

/// Letter grade bands over the fused overall score. The variant order makes
/// `F < D < C < B < A` hold under derived comparison.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Grade {
    F,
    D,
    C,
    B,
    A,
}

impl Grade {
    /// Deterministic banding; boundary values round up to the higher
    /// grade.
    #[must_use]
    pub fn from_overall(overall: f32) -> Self {
        if overall >= 0.90 {
            Self::A
        } else if overall >= 0.80 {
            Self::B
        } else if overall >= 0.65 {
            Self::C
        } else if overall >= 0.50 {
            Self::D
        } else {
            Self::F
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
pub struct PitchScores {
    pub score: f32,
    pub f0_mean_hz: f32,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct HarmonicScores {
    pub score: f32,
    pub spectral_centroid_hz: f32,
    /// Mean formant estimates in ascending frequency, up to four.
    pub formants_hz: Vec<f32>,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
pub struct CadenceScores {
    pub score: f32,
    pub tempo_bpm: f32,
    pub rhythm_strength: f32,
    /// First-onset offset against the master, in seconds.
    pub alignment_offset_sec: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
pub struct LoudnessScores {
    pub rms_dbfs: f32,
    pub peak_dbfs: f32,
    pub normalization_gain_db: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct ComponentScores {
    pub mfcc: f32,
    pub pitch: PitchScores,
    pub harmonic: HarmonicScores,
    pub cadence: CadenceScores,
    pub loudness: LoudnessScores,
}

/// One voiced segment as reported in the summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SegmentReport {
    pub start_sec: f32,
    pub end_sec: f32,
    pub vad_confidence: f32,
    /// MFCC-DTW distance against the master; the selection key.
    pub mfcc_distance: f64,
    pub is_best: bool,
}

/// Input-level advice carried over from the calibration advisor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
pub struct CalibrationAdvice {
    pub headroom_db: f32,
    pub overload: bool,
    pub low_level: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct SummaryDiagnostics {
    /// No voiced segment was detected; the summary is the zero summary.
    pub no_voiced_audio: bool,
    /// The longest voiced segment was under 300 ms; scored with reduced
    /// confidence.
    pub short_voiced_audio: bool,
    /// Samples discarded by the input ring under drop-oldest pressure.
    pub dropped_samples: u64,
    /// Components disabled by repeated failures or budget downgrades.
    pub disabled_components: Vec<String>,
    /// Times the per-chunk budget ladder fired.
    pub downgrade_events: u32,
    /// Finalize exceeded its budget and fell back to streaming features.
    pub degraded_finalize: bool,
    pub calibration: CalibrationAdvice,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct FeedbackSeeds {
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub tips: Vec<String>,
}

/// The finalized result of one practice attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnhancedSummary {
    /// Fused score over the enabled components, in [0, 1].
    pub overall: f32,
    /// Raw MFCC alignment similarity, in [0, 1].
    pub similarity: f32,
    /// Weighted geometric mean of the per-component confidences.
    pub confidence: f32,
    pub grade: Grade,
    pub components: ComponentScores,
    pub segments: Vec<SegmentReport>,
    /// Index into `segments` of the best match, if any segment exists.
    pub best_segment: Option<usize>,
    pub feedback: FeedbackSeeds,
    pub diagnostics: SummaryDiagnostics,
    pub processing_time_ms: f32,
}

impl EnhancedSummary {
    /// The degraded summary used when no voiced audio was found.
    #[must_use]
    pub fn empty(diagnostics: SummaryDiagnostics) -> Self {
        Self {
            overall: 0.,
            similarity: 0.,
            confidence: 0.,
            grade: Grade::F,
            components: ComponentScores::default(),
            segments: Vec::new(),
            best_segment: None,
            feedback: FeedbackSeeds::default(),
            diagnostics,
            processing_time_ms: 0.,
        }
    }
}
