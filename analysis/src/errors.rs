use strum::Display;
use thiserror::Error;

/// The feature extractor a [`AnalysisError::Component`] error originated from.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Mfcc,
    Pitch,
    Harmonic,
    Cadence,
    Loudness,
    Dtw,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("invalid parameter for {context}: {message}")]
    InvalidParameter {
        context: &'static str,
        message: String,
    },
    #[error("input contains a NaN or infinite sample")]
    NonFiniteSample,
    #[error("ring buffer is full and the drop policy is strict")]
    RingFull,
    #[error("unknown ring reader id: {0}")]
    UnknownReader(usize),
    #[error("samples are empty or too short")]
    EmptySamples,
    #[error("{kind} extractor failed: {message}")]
    Component {
        kind: ComponentKind,
        message: String,
    },
}

impl AnalysisError {
    /// Shorthand for an [`AnalysisError::InvalidParameter`].
    #[must_use]
    #[inline]
    pub fn invalid(context: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            context,
            message: message.into(),
        }
    }
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
