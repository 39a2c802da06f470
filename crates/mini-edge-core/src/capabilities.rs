//! Capabilities injected into each worker invocation.
//!
//! A worker gets exactly three: a log sink, an allow-listed outbound fetch,
//! and the KV namespace of the project that owns it. Any of them may be
//! absent, in which case the corresponding host call fails softly.

use std::sync::Arc;

use async_trait::async_trait;
use mini_edge_common::HostFunctionError;
use mini_edge_state::{KvNamespace, LogBuffer};

/// Outbound HTTP capability.
///
/// Implementations enforce their own host allow-list and per-invocation
/// limits. A rejected call is reported as
/// [`HostFunctionError::PermissionDenied`] or
/// [`HostFunctionError::RateLimitExceeded`], never as a trap.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// `GET` the URL and return the response body as text.
    async fn fetch(&self, url: &str) -> Result<String, HostFunctionError>;
}

/// Capabilities for one invocation.
#[derive(Clone, Default)]
pub struct Capabilities {
    pub kv: Option<KvNamespace>,
    pub fetch: Option<Arc<dyn Fetcher>>,
    pub logs: Option<Arc<LogBuffer>>,
}

impl Capabilities {
    /// No capabilities at all.
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_kv(mut self, kv: KvNamespace) -> Self {
        self.kv = Some(kv);
        self
    }

    #[must_use]
    pub fn with_fetch(mut self, fetch: Arc<dyn Fetcher>) -> Self {
        self.fetch = Some(fetch);
        self
    }

    #[must_use]
    pub fn with_logs(mut self, logs: Arc<LogBuffer>) -> Self {
        self.logs = Some(logs);
        self
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("kv", &self.kv.is_some())
            .field("fetch", &self.fetch.is_some())
            .field("logs", &self.logs.is_some())
            .finish()
    }
}
