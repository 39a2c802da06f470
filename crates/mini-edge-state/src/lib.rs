//! Shared platform state for mini-edge.
//!
//! Every store in this crate is an owned, internally synchronized component.
//! The HTTP front door holds them in its application state and hands
//! request-scoped views (such as a [`KvNamespace`]) to worker invocations.
//!
//! - [`KvStore`]: per-project key/value namespaces with plan limits
//! - [`RouteTable`]: ordered URL pattern to worker mapping
//! - [`WorkerRegistry`]: deployed worker sources and their owners
//! - [`QuotaEnforcer`]: projects, plans and daily request accounting
//! - [`TrafficRecorder`]: ring buffer of traffic records with live broadcast
//! - [`LogBuffer`]: ring buffer of worker log lines with live broadcast
//!
//! All stores work purely in memory; when given a data directory they also
//! write JSON snapshots so state survives restarts.

pub mod error;
pub mod kv;
pub mod logs;
pub mod observers;
mod persist;
pub mod quota;
pub mod routes;
pub mod traffic;
pub mod workers;

pub use error::{QuotaLimit, StateError, StateResult};
pub use kv::{KvLimits, KvNamespace, KvStore};
pub use logs::{LogBuffer, LogKind, LogLine};
pub use observers::{Observers, Subscription};
pub use quota::{Project, QuotaEnforcer, Usage};
pub use routes::{Route, RouteMatch, RouteTable};
pub use traffic::{
    BroadcastEvent, RecordStatus, RequestSnapshot, ResponseSnapshot, TrafficRecord,
    TrafficRecorder, TrafficStats, WorkerStats,
};
pub use workers::{Worker, WorkerRegistry};

/// Current time as Unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Current UTC calendar day as `YYYY-MM-DD`.
pub fn utc_day() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}
