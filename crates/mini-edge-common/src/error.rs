//! Error types for mini-edge.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`RuntimeError`]: Failures of the Wasmtime machinery itself
//! - [`HostFunctionError`]: Errors from host function implementations
//! - [`ExecutionFault`]: The classified outcome of a failed worker invocation
//! - [`ErrorCode`]: The platform-wide error taxonomy surfaced over HTTP

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level runtime errors.
///
/// These errors represent failures that can occur while compiling and
/// instantiating worker modules, before they are classified into an
/// [`ExecutionFault`].
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The requested worker is not deployed.
    #[error("Worker not found: {name}")]
    WorkerNotFound {
        /// The name of the worker that was not found.
        name: String,
    },

    /// WebAssembly compilation failed.
    #[error("Compilation failed: {reason}")]
    CompilationFailed {
        /// Description of the compilation failure.
        reason: String,
    },

    /// Execution exhausted the configured fuel limit.
    #[error("Fuel exhausted: CPU limit exceeded")]
    FuelExhausted,

    /// A host function returned an error.
    #[error("Host function error: {0}")]
    HostFunction(#[from] HostFunctionError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A WebAssembly trap occurred during execution.
    #[error("Wasm trap: {message}")]
    Trap {
        /// Description of the trap.
        message: String,
    },

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

/// Errors from host function implementations.
#[derive(Error, Debug)]
pub enum HostFunctionError {
    /// An HTTP request made by the guest module failed.
    #[error("HTTP request failed: {url} (status: {status})")]
    HttpRequestFailed {
        /// The URL that was requested.
        url: String,
        /// The HTTP status code (0 if connection failed).
        status: u16,
    },

    /// The requested operation was denied by the permission system.
    #[error("Permission denied: {resource}")]
    PermissionDenied {
        /// Description of the resource that access was denied to.
        resource: String,
    },

    /// Key-value store operation failed.
    #[error("KV store error: {0}")]
    KvStore(String),

    /// Rate limit for host function calls was exceeded.
    #[error("Rate limit exceeded: {operation}")]
    RateLimitExceeded {
        /// The operation that was rate-limited.
        operation: String,
    },

    /// Guest memory could not be read or written.
    #[error("Guest memory error: {0}")]
    GuestMemory(String),
}

impl HostFunctionError {
    /// Returns `true` if the host refused the call rather than failing it.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied { .. } | Self::RateLimitExceeded { .. }
        )
    }
}

impl RuntimeError {
    /// Create a new `WorkerNotFound` error.
    pub fn worker_not_found(name: impl Into<String>) -> Self {
        Self::WorkerNotFound { name: name.into() }
    }

    /// Create a new `CompilationFailed` error.
    pub fn compilation_failed(reason: impl Into<String>) -> Self {
        Self::CompilationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `Trap` error.
    pub fn trap(message: impl Into<String>) -> Self {
        Self::Trap {
            message: message.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error indicates the worker was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::WorkerNotFound { .. })
    }
}

/// Classified failure of a worker invocation.
///
/// Every failed invocation ends in exactly one of these. They are never
/// propagated as panics or unhandled errors to the HTTP layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionFault {
    /// The module does not export a usable `handle` function.
    #[error("Worker does not export a `handle` function")]
    MissingHandler,

    /// Compilation, initialization or runtime failure.
    #[error("{message}")]
    Runtime {
        /// Original error message.
        message: String,
    },

    /// The handler did not finish before its deadline.
    #[error("Execution timeout after {duration_ms}ms")]
    Timeout {
        /// The deadline that was exceeded, in milliseconds.
        duration_ms: u64,
    },
}

impl ExecutionFault {
    /// Create a new `Runtime` fault.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    /// The taxonomy code for this fault.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingHandler => ErrorCode::MissingHandler,
            Self::Runtime { .. } => ErrorCode::RuntimeError,
            Self::Timeout { .. } => ErrorCode::Timeout,
        }
    }
}

impl From<RuntimeError> for ExecutionFault {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Trap { message } => Self::Runtime { message },
            other => Self::Runtime {
                message: other.to_string(),
            },
        }
    }
}

/// Platform error taxonomy.
///
/// Serialized in `SCREAMING_SNAKE_CASE` as the `code` field of error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RouteNotFound,
    QuotaExceeded,
    Unauthorized,
    Forbidden,
    NotFound,
    BadRequest,
    InvalidRoute,
    MissingHandler,
    RuntimeError,
    Timeout,
    InvalidSignature,
    Internal,
}

impl ErrorCode {
    /// Wire representation of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RouteNotFound => "ROUTE_NOT_FOUND",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::BadRequest => "BAD_REQUEST",
            Self::InvalidRoute => "INVALID_ROUTE",
            Self::MissingHandler => "MISSING_HANDLER",
            Self::RuntimeError => "RUNTIME_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
