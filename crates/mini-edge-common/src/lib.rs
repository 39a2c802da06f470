//! Common types, errors, and configuration for mini-edge.
//!
//! This crate provides shared functionality used across the mini-edge workspace:
//! - Error types using `thiserror`, including the platform error taxonomy
//! - Configuration structures for the runtime, quotas, and the HTTP server
//! - The configuration file format loaded at startup

pub mod config;
pub mod config_file;
pub mod digest;
pub mod error;

pub use config::{
    EngineConfig, ExecutionConfig, FetchConfig, LogsConfig, PlanConfig, QuotaConfig,
    RoutingConfig, RuntimeConfig, StorageConfig, TrafficConfig,
};
pub use config_file::{ConfigFile, ConfigFileError};
pub use digest::content_hash;
pub use error::{ErrorCode, ExecutionFault, HostFunctionError, RuntimeError};
