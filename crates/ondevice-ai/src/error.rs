//! Error types for the coordinator

use thiserror::Error;

use crate::backend::BackendError;
use crate::constants::codes;
use crate::types::UnavailableReason;

/// Result type alias using AiError
pub type Result<T> = std::result::Result<T, AiError>;

/// Errors surfaced to callers of one-shot operations
///
/// Every variant carries a stable string code (see [`AiError::code`]) so
/// host code can branch on it without parsing messages.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AiError {
    /// Generation was requested before `init_session`
    #[error("Session not initialized. Call init_session() first.")]
    SessionNotInitialized,

    /// The capability's model cannot be used on this device right now
    #[error("Model unavailable: {0}")]
    ModelUnavailable(UnavailableReason),

    /// A model download attempt failed
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    /// The backend failed to produce a response
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    /// The host environment the backend needs is not ready
    #[error("Host context is not available")]
    ContextUnavailable,

    /// The operation was cancelled before it finished
    #[error("Operation cancelled")]
    Cancelled,
}

impl AiError {
    /// Stable code for host-side handling
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionNotInitialized => codes::SESSION_NOT_INITIALIZED,
            Self::ModelUnavailable(_) => codes::MODEL_UNAVAILABLE,
            Self::DownloadFailed(_) => codes::DOWNLOAD_FAILED,
            Self::GenerationFailed(_) => codes::GENERATION_FAILED,
            Self::ContextUnavailable => codes::CONTEXT_UNAVAILABLE,
            Self::Cancelled => codes::CANCELLED,
        }
    }

    pub fn generation(msg: impl Into<String>) -> Self {
        Self::GenerationFailed(msg.into())
    }
}

impl From<BackendError> for AiError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::ContextUnavailable => Self::ContextUnavailable,
            BackendError::Download(cause) => Self::DownloadFailed(cause),
            other => Self::GenerationFailed(other.to_string()),
        }
    }
}
