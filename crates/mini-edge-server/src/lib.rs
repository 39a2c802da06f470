//! HTTP front door for mini-edge.
//!
//! This crate provides the HTTP interface of the platform. It handles:
//!
//! - Route resolution and worker invocation with quota admission
//! - The management API for projects, workers, routes and KV
//! - Traffic inspection, metrics and live SSE streams
//! - The signed source-control webhook
//! - Health and readiness checks
//!
//! # Quick Start
//!
//! ```ignore
//! use mini_edge_server::{AppState, EdgeServer, ServerConfig};
//! use mini_edge_common::RuntimeConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let state = AppState::new(&RuntimeConfig::default()).await?;
//!     EdgeServer::new(state, ServerConfig::default()).run().await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod error;
pub mod handler;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod sse;
pub mod state;
pub mod webhook;

pub use error::{ApiError, ServerError};
pub use router::build_router;
pub use server::{EdgeServer, ServerConfig, TestHandle};
pub use state::AppState;
