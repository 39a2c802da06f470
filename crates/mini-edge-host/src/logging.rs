//! Logging host function implementation.
//!
//! Guest logs never reach the HTTP caller. They are emitted via `tracing`
//! and forwarded to the process log buffer.

use mini_edge_core::store::{LogLevel, WorkerContext};
use tracing::{debug, error, info, warn};

/// Host implementation for the `env::log` import.
pub struct LoggingHost;

impl LoggingHost {
    /// Log a message at the specified level.
    pub fn log(ctx: &mut WorkerContext, level: LogLevel, message: &str) {
        let request_id = ctx.request_id.as_str();
        let worker = ctx.worker.as_str();
        match level {
            LogLevel::Debug => debug!(request_id, worker, guest_log = true, "{}", message),
            LogLevel::Info => info!(request_id, worker, guest_log = true, "{}", message),
            LogLevel::Warn => warn!(request_id, worker, guest_log = true, "{}", message),
            LogLevel::Error => error!(request_id, worker, guest_log = true, "{}", message),
        }

        ctx.log(level, message.to_string());
    }
}

/// Convert a numeric log level to [`LogLevel`].
///
/// 0=debug, 1=info, 2=warn, 3=error; unknown values default to info.
pub fn level_from_i32(level: i32) -> LogLevel {
    match level {
        0 => LogLevel::Debug,
        2 => LogLevel::Warn,
        3 => LogLevel::Error,
        _ => LogLevel::Info,
    }
}
