//! Streaming DSP primitives for game-call analysis.
//!
//! This crate is the leaf layer of the huntmaster workspace: ring buffering
//! and windowing, the shared FFT front end, the per-feature extractors
//! (MFCC, YIN pitch, harmonic profile, cadence, loudness), voice activity
//! detection with segment tracking, and the banded DTW used for sequence
//! alignment. Everything here is synchronous and allocation-free on the
//! hot path after construction; session lifecycle, scoring and grading
//! live in `huntmaster-engine`.
//!
//! The extractors follow a common shape: configuration at construction,
//! a `do_` method fed once per hop, and summary getters read at finalize
//! time. For the same input samples and configuration the outputs are
//! bit-identical across runs.

pub mod cadence;
pub mod dtw;
pub mod errors;
pub mod harmonic;
pub mod loudness;
pub mod mfcc;
pub mod pitch;
pub mod ring;
pub mod spectrum;
pub mod utils;
pub mod vad;
pub mod window;

/// The type of individual feature values.
pub type Feature = f32;

pub use cadence::{CadenceConfig, CadenceDesc, TempoEstimate};
pub use dtw::{
    dtw_distance_frames, dtw_distance_scalar, normalize_by_reference, reference_stats, DtwParams,
};
pub use errors::{AnalysisError, AnalysisResult, ComponentKind};
pub use harmonic::{HarmonicConfig, HarmonicDesc, HarmonicObservation};
pub use loudness::{
    normalization_gain_db, CalibrationAdvisor, CalibrationReport, LoudnessDesc, LoudnessObservation,
};
pub use mfcc::{MelFilterBank, MfccConfig, MfccDesc};
pub use pitch::{PitchConfig, PitchDesc, PitchObservation};
pub use ring::{DropPolicy, InputRing, ReaderId};
pub use spectrum::SpectrumAnalyzer;
pub use utils::spectral_flatness;
pub use vad::{SegmentTracker, VadConfig, VoicedSegment};
pub use window::{Window, WindowFunction};
