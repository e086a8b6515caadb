//! Real-time audio similarity and coaching engine for game-call practice.
//!
//! The engine compares a user's attempt at reproducing a reference
//! "master call" against the master's precomputed feature template and
//! produces a deterministic grade with per-dimension scores and coaching
//! feedback. Audio arrives as already-decoded mono f32 PCM chunks at the
//! session's declared sample rate; decoding, capture and resampling live
//! outside this crate.
//!
//! ```no_run
//! use huntmaster_engine::{Engine, MasterCallTemplate, SessionConfig};
//!
//! # fn main() -> Result<(), huntmaster_engine::EngineError> {
//! # let master_pcm: Vec<f32> = Vec::new();
//! # let mic_chunks: Vec<Vec<f32>> = Vec::new();
//! let engine = Engine::new()?;
//! let config = SessionConfig::default();
//! engine.load_master_call(MasterCallTemplate::from_samples(
//!     "buck-grunt",
//!     &master_pcm,
//!     44_100,
//!     &config,
//! )?);
//!
//! let session = engine.create_session(config)?;
//! engine.set_master_call(session, "buck-grunt")?;
//! for chunk in &mic_chunks {
//!     engine.process_audio_chunk(session, chunk)?;
//! }
//! let summary = engine.finalize_session_analysis(session)?;
//! println!("grade {} ({:.0}%)", summary.grade, summary.overall * 100.);
//! # Ok(())
//! # }
//! ```
//!
//! Feature math lives in `huntmaster-analysis`; this crate owns session
//! lifecycle, master templates and their persisted bundle format, the
//! realtime scorer, segment selection, score fusion, grading and the
//! coaching rules.

pub mod bundle;
pub mod config;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod master;
pub mod realtime;
pub mod score;
mod segment;
pub mod session;
pub mod summary;

pub use config::{FusionWeights, SessionConfig, MAX_CHUNK_SAMPLES};
pub use engine::{Engine, SessionId, SessionInfo, SystemMetrics};
pub use error::{EngineError, EngineResult};
pub use master::{
    LoudnessPoint, MasterCallTemplate, MasterStore, PitchPoint, TrajectoryPoint,
};
pub use realtime::{RealtimeShared, RealtimeSnapshot};
pub use session::SessionState;
pub use summary::{
    CadenceScores, CalibrationAdvice, ComponentScores, EnhancedSummary, FeedbackSeeds, Grade,
    HarmonicScores, LoudnessScores, PitchScores, SegmentReport, SummaryDiagnostics,
};
