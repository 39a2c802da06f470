//! Error types for the platform state stores.

use mini_edge_common::ErrorCode;
use thiserror::Error;

/// Result type alias for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Which plan ceiling a quota denial hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaLimit {
    RequestsPerDay,
    Workers,
    KvKeys,
    KvValueSize,
}

/// Errors that can occur during state operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("{message}")]
    QuotaExceeded { limit: QuotaLimit, message: String },

    #[error("missing or unknown project token")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("invalid route pattern: {0}")]
    InvalidRoute(String),

    #[error("invalid worker name: {0}")]
    InvalidName(String),

    #[error("unknown plan: {0}")]
    UnknownPlan(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("io error: {0}")]
    Io(String),
}

impl StateError {
    pub(crate) fn quota(limit: QuotaLimit, message: impl Into<String>) -> Self {
        Self::QuotaExceeded {
            limit,
            message: message.into(),
        }
    }

    /// The taxonomy code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::QuotaExceeded { .. } => ErrorCode::QuotaExceeded,
            Self::Unauthorized => ErrorCode::Unauthorized,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::InvalidRoute(_) => ErrorCode::InvalidRoute,
            Self::InvalidName(_) | Self::UnknownPlan(_) => ErrorCode::BadRequest,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Serialize(_) | Self::Io(_) => ErrorCode::Internal,
        }
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialize(err.to_string())
    }
}

impl From<std::io::Error> for StateError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
