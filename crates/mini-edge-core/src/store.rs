//! Per-invocation execution context and store management.
//!
//! This module provides:
//! - [`WorkerContext`]: Per-invocation state accessible from host functions
//! - [`LogLevel`]: Severity of guest log calls
//! - [`ExecutionMetrics`]: Performance metrics for each invocation

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use mini_edge_state::LogLine;
use wasmtime::Store;

use crate::WasmEngine;
use crate::capabilities::Capabilities;
use mini_edge_common::{ExecutionConfig, RuntimeError};

/// Per-invocation execution context.
///
/// Created fresh for every invocation and dropped with its store, so no
/// guest-visible state survives between requests. Host functions reach it
/// through [`wasmtime::Caller::data_mut`].
pub struct WorkerContext {
    /// Unique request identifier for tracing.
    pub request_id: String,

    /// Name of the worker being run.
    pub worker: String,

    /// Route parameters, served by the `param` host call.
    pub params: BTreeMap<String, String>,

    /// Injected capabilities.
    pub capabilities: Capabilities,

    /// Status set by the guest.
    pub status: u16,

    /// Headers set by the guest, names lowercased.
    pub headers: BTreeMap<String, String>,

    /// Execution metrics.
    pub metrics: ExecutionMetrics,

    start_time: Instant,
}

/// Log level for guest logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Lowercase name used in log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Execution performance metrics.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    /// Fuel consumed during execution.
    pub fuel_consumed: u64,

    /// Number of outbound fetches attempted.
    pub fetches: u32,

    /// Total execution duration.
    pub duration: Option<Duration>,
}

impl WorkerContext {
    /// Create a context for one invocation.
    pub fn new(
        request_id: String,
        worker: String,
        params: BTreeMap<String, String>,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            request_id,
            worker,
            params,
            capabilities,
            status: 200,
            headers: BTreeMap::new(),
            metrics: ExecutionMetrics::default(),
            start_time: Instant::now(),
        }
    }

    /// A context with no worker identity and no capabilities.
    pub fn detached(request_id: impl Into<String>) -> Self {
        Self::new(
            request_id.into(),
            String::new(),
            BTreeMap::new(),
            Capabilities::none(),
        )
    }

    /// Forward a guest log line to the process log buffer, if one is
    /// attached. Without a buffer the line is dropped.
    pub fn log(&mut self, level: LogLevel, message: String) {
        if let Some(buffer) = &self.capabilities.logs {
            buffer.push(LogLine::new(
                level.as_str(),
                message,
                self.worker.clone(),
                self.request_id.clone(),
            ));
        }
    }

    /// Set a response header. Names are stored lowercase.
    pub fn set_header(&mut self, name: &str, value: String) {
        self.headers.insert(name.to_ascii_lowercase(), value);
    }

    /// Get elapsed time since execution started.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Finalize metrics after execution.
    pub fn finalize_metrics(&mut self) {
        self.metrics.duration = Some(self.start_time.elapsed());
    }
}

/// Create a new Wasmtime store for one invocation.
///
/// The store gets the configured fuel budget and yields to the async
/// executor every `yield_interval_fuel` units, which lets a deadline timer
/// fire even while the guest spins.
///
/// # Errors
///
/// Returns an error if fuel cannot be configured on the store.
pub fn create_store(
    engine: &WasmEngine,
    config: &ExecutionConfig,
    context: WorkerContext,
) -> Result<Store<WorkerContext>, RuntimeError> {
    let mut store = Store::new(engine.inner(), context);

    store
        .set_fuel(config.initial_fuel())
        .map_err(|e| RuntimeError::invalid_config(format!("Failed to set fuel: {e}")))?;

    if config.yield_interval_fuel > 0 {
        store
            .fuel_async_yield_interval(Some(config.yield_interval_fuel))
            .map_err(|e| {
                RuntimeError::invalid_config(format!("Failed to set yield interval: {e}"))
            })?;
    }

    Ok(store)
}

/// Get remaining fuel from a store.
pub fn get_remaining_fuel(store: &Store<WorkerContext>) -> Option<u64> {
    store.get_fuel().ok()
}

/// Calculate fuel consumed.
pub fn calculate_fuel_consumed(initial_fuel: u64, store: &Store<WorkerContext>) -> u64 {
    let remaining = get_remaining_fuel(store).unwrap_or(0);
    initial_fuel.saturating_sub(remaining)
}
