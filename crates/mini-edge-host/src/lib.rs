//! Host functions exposed to mini-edge workers.
//!
//! This crate implements the `env` imports a worker module may use and the
//! capabilities behind them.
//!
//! # Interfaces
//!
//! - [`linker`]: Registration of every `env` import on a Wasmtime linker
//! - [`logging`]: Guest logging into the log buffer and `tracing`
//! - [`kv`]: The project's KV namespace
//! - [`http_outbound`]: Allow-listed outbound fetch
//! - [`permissions`]: Fetch allow-list and private address blocking
//!
//! # Security Model
//!
//! 1. **Permissions**: fetch only reaches hosts on the allow-list.
//! 2. **Rate Limiting**: fetches are limited per invocation.
//! 3. **SSRF Protection**: private/internal addresses are blocked.
//! 4. **Soft failures**: a refused or failed host call returns an error code
//!    to the guest instead of trapping.

pub mod http_outbound;
pub mod kv;
pub mod linker;
pub mod logging;
pub mod memory;
pub mod permissions;

pub use http_outbound::{HttpOutboundHost, build_client};
pub use kv::KvHost;
pub use linker::{create_instance_runner, register_all};
pub use logging::LoggingHost;
pub use permissions::Permissions;
