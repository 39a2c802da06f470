//! Core Wasmtime runtime for mini-edge workers.
//!
//! This crate provides worker loading and sandboxed execution:
//! - [`WasmEngine`]: Configured Wasmtime engine shared by all requests
//! - [`CompiledModule`] / [`ModuleCache`]: Compiled worker modules keyed by source hash
//! - [`WorkerContext`]: Per-invocation state reachable from host functions
//! - [`InstanceRunner`]: Instantiates a module and drives its `handle` export
//! - [`Handler`] / [`HandlerLoader`]: Loaded workers and the loader that builds them
//! - [`ExecutionEngine`]: Runs a handler under a deadline
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     WasmEngine                          │
//! │  (Shared across all requests, thread-safe)              │
//! │  - Fuel metering, async support                         │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │          ModuleCache → CompiledModule → Handler         │
//! │  (Cached by source hash, shared across invocations)     │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │            Store<WorkerContext> + Instance              │
//! │  (Per-invocation, isolated)                             │
//! │  - Fuel budget with periodic async yields               │
//! │  - Capabilities: logs, fetch, KV                        │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod capabilities;
pub mod engine;
pub mod executor;
pub mod handler;
pub mod instance;
pub mod module;
pub mod request;
pub mod store;

pub use capabilities::{Capabilities, Fetcher};
pub use engine::WasmEngine;
pub use executor::ExecutionEngine;
pub use handler::{Handler, HandlerLoader, WasmHandler};
pub use instance::InstanceRunner;
pub use module::{CompiledModule, ModuleCache};
pub use request::{DEFAULT_CONTENT_TYPE, WorkerRequest, WorkerResponse};
pub use store::{ExecutionMetrics, LogLevel, WorkerContext};
