//! Engine error taxonomy.
//!
//! Every public operation returns `EngineResult`; nothing panics across the
//! crate boundary. Each error carries a stable machine code and a
//! locale-independent message.

use huntmaster_analysis::{AnalysisError, ComponentKind};
use thiserror::Error;

use crate::engine::SessionId;
use crate::session::SessionState;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid audio data: {0}")]
    InvalidAudioData(String),
    #[error("operation not allowed in session state {0}")]
    WrongState(SessionState),
    #[error("no master call loaded for this session")]
    NoMasterCall,
    #[error("master call not registered: {0}")]
    MasterNotFound(String),
    #[error("unknown session: {0}")]
    SessionNotFound(SessionId),
    #[error("realtime scorer has not observed enough audio yet")]
    InsufficientData,
    #[error("input ring is full; retry after the session drains")]
    Backpressure,
    #[error("master bundle rejected: {0}")]
    InvalidBundle(String),
    #[error("{kind} component failed: {message}")]
    Component {
        kind: ComponentKind,
        message: String,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable machine-readable code for the error kind.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::InvalidAudioData(_) => "INVALID_AUDIO_DATA",
            Self::WrongState(_) => "WRONG_STATE",
            Self::NoMasterCall => "NO_MASTER_CALL",
            Self::MasterNotFound(_) => "MASTER_NOT_FOUND",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::InsufficientData => "INSUFFICIENT_DATA",
            Self::Backpressure => "BACKPRESSURE",
            Self::InvalidBundle(_) => "INVALID_BUNDLE",
            Self::Component { .. } => "COMPONENT_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller may retry the same operation unchanged.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Backpressure | Self::InsufficientData)
    }
}

impl From<AnalysisError> for EngineError {
    fn from(error: AnalysisError) -> Self {
        match error {
            AnalysisError::NonFiniteSample => {
                Self::InvalidAudioData("chunk contains a NaN or infinite sample".into())
            }
            AnalysisError::EmptySamples => Self::InvalidAudioData("chunk is empty".into()),
            AnalysisError::RingFull => Self::Backpressure,
            AnalysisError::InvalidParameter { context, message } => {
                Self::InvalidConfig(format!("{context}: {message}"))
            }
            AnalysisError::UnknownReader(id) => {
                Self::Internal(format!("ring reader {id} vanished"))
            }
            AnalysisError::Component { kind, message } => Self::Component { kind, message },
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
