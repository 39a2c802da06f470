//! API error type and its HTTP mapping.
//!
//! Every error body has the shape `{"error": <message>, "code": <CODE>}`.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use mini_edge_common::{ErrorCode, ExecutionFault, RuntimeError};
use mini_edge_state::{QuotaLimit, StateError};

/// Errors surfaced by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No route (or fallback worker) matches the path.
    #[error("No route matches {0}")]
    RouteNotFound(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Execution(#[from] ExecutionFault),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// The taxonomy code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::RouteNotFound(_) => ErrorCode::RouteNotFound,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::BadRequest(_) => ErrorCode::BadRequest,
            Self::InvalidSignature => ErrorCode::InvalidSignature,
            Self::State(e) => e.code(),
            Self::Execution(fault) => fault.code(),
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// HTTP status for this error.
    ///
    /// Running out of daily requests is 429; every other quota ceiling
    /// (workers, KV keys, KV value size) is 403.
    pub fn status(&self) -> StatusCode {
        if let Self::State(StateError::QuotaExceeded { limit, .. }) = self {
            return match limit {
                QuotaLimit::RequestsPerDay => StatusCode::TOO_MANY_REQUESTS,
                QuotaLimit::Workers | QuotaLimit::KvKeys | QuotaLimit::KvValueSize => {
                    StatusCode::FORBIDDEN
                }
            };
        }

        match self.code() {
            ErrorCode::RouteNotFound | ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::Unauthorized | ErrorCode::InvalidSignature => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::BadRequest | ErrorCode::InvalidRoute => StatusCode::BAD_REQUEST,
            ErrorCode::MissingHandler | ErrorCode::RuntimeError | ErrorCode::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<RuntimeError> for ApiError {
    fn from(err: RuntimeError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        (self.status(), Json(body)).into_response()
    }
}

/// Errors while assembling or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Failed to read worker source '{path}': {source}")]
    WorkerSource {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid server configuration: {0}")]
    Config(String),

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_status_depends_on_limit() {
        let daily = ApiError::State(StateError::QuotaExceeded {
            limit: QuotaLimit::RequestsPerDay,
            message: "limit".into(),
        });
        assert_eq!(daily.status(), StatusCode::TOO_MANY_REQUESTS);

        let workers = ApiError::State(StateError::QuotaExceeded {
            limit: QuotaLimit::Workers,
            message: "limit".into(),
        });
        assert_eq!(workers.status(), StatusCode::FORBIDDEN);
        assert_eq!(workers.code(), ErrorCode::QuotaExceeded);
    }

    #[test]
    fn test_execution_fault_status() {
        let timeout = ApiError::from(ExecutionFault::Timeout { duration_ms: 1000 });
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(timeout.to_string(), "Execution timeout after 1000ms");

        let missing = ApiError::from(ExecutionFault::MissingHandler);
        assert_eq!(missing.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(missing.code(), ErrorCode::MissingHandler);
    }

    #[test]
    fn test_state_error_status() {
        assert_eq!(
            ApiError::from(StateError::Unauthorized).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(StateError::InvalidRoute("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::RouteNotFound("/nope".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ApiError::InvalidSignature.status(), StatusCode::UNAUTHORIZED);
    }
}
