//! Shared error type across Orc crates.

use thiserror::Error;

/// Stable error codes (diagnostics, metrics labels, test vectors).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Wire text does not conform to the OP grammar.
    Grammar,
    /// Envelope field missing or not in the known vocabulary.
    Envelope,
    /// Business codec could not materialize the payload.
    PayloadDecode,
    /// Socket-level failure.
    Transport,
    /// Invalid configuration.
    Config,
    /// Unsupported config version.
    UnsupportedVersion,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Grammar => "GRAMMAR",
            ErrorCode::Envelope => "ENVELOPE",
            ErrorCode::PayloadDecode => "PAYLOAD_DECODE",
            ErrorCode::Transport => "TRANSPORT",
            ErrorCode::Config => "CONFIG",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, OrcError>;

/// Unified error type used by core and engine.
#[derive(Debug, Error)]
pub enum OrcError {
    #[error("grammar error at byte {pos}: {reason}")]
    Grammar { pos: usize, reason: String },
    #[error("envelope error: {0}")]
    Envelope(String),
    #[error("payload decode error: {0}")]
    PayloadDecode(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("unsupported config version")]
    UnsupportedVersion,
    #[error("internal: {0}")]
    Internal(String),
}

impl OrcError {
    pub fn grammar(pos: usize, reason: impl Into<String>) -> Self {
        OrcError::Grammar {
            pos,
            reason: reason.into(),
        }
    }

    /// Map the error to its stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            OrcError::Grammar { .. } => ErrorCode::Grammar,
            OrcError::Envelope(_) => ErrorCode::Envelope,
            OrcError::PayloadDecode(_) => ErrorCode::PayloadDecode,
            OrcError::Transport(_) => ErrorCode::Transport,
            OrcError::Config(_) => ErrorCode::Config,
            OrcError::UnsupportedVersion => ErrorCode::UnsupportedVersion,
            OrcError::Internal(_) => ErrorCode::Internal,
        }
    }
}
