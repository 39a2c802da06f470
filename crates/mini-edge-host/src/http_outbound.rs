//! Outbound fetch host implementation.
//!
//! [`HttpOutboundHost`] is the fetch capability handed to workers. One is
//! created per invocation around a shared, connection-pooled [`Client`], so
//! its request counter limits fetches per invocation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::Permissions;
use mini_edge_common::{FetchConfig, HostFunctionError, RuntimeError};
use mini_edge_core::Fetcher;

/// Largest response body handed back to a worker.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Build the shared HTTP client used for all worker fetches.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized.
pub fn build_client(config: &FetchConfig) -> Result<Client, RuntimeError> {
    Client::builder()
        .timeout(Duration::from_millis(config.timeout_ms))
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .user_agent(concat!("mini-edge/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| RuntimeError::invalid_config(format!("Failed to create HTTP client: {e}")))
}

/// Per-invocation fetch capability.
///
/// Enforces:
/// - Permission checking against allowed hosts
/// - Private address blocking
/// - A per-invocation request limit
pub struct HttpOutboundHost {
    client: Client,
    permissions: Arc<Permissions>,
    request_count: AtomicU32,
}

impl HttpOutboundHost {
    /// Create a fetch capability around a shared client.
    pub fn new(client: Client, permissions: Arc<Permissions>) -> Self {
        Self {
            client,
            permissions,
            request_count: AtomicU32::new(0),
        }
    }

    /// Get the number of requests attempted.
    pub fn request_count(&self) -> u32 {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Check limits and permissions for `url`.
    fn admit(&self, url: &str) -> Result<(), HostFunctionError> {
        let count = self.request_count.fetch_add(1, Ordering::SeqCst);
        if count >= self.permissions.max_http_requests {
            warn!(
                url,
                count,
                max = self.permissions.max_http_requests,
                "Fetch rate limit exceeded"
            );
            return Err(HostFunctionError::RateLimitExceeded {
                operation: "fetch".into(),
            });
        }

        if !self.permissions.is_http_allowed(url) {
            warn!(url, "Fetch blocked: host not allowed");
            return Err(HostFunctionError::PermissionDenied {
                resource: url.to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Fetcher for HttpOutboundHost {
    async fn fetch(&self, url: &str) -> Result<String, HostFunctionError> {
        self.admit(url)?;

        debug!(url, "Executing fetch");

        let failed = |status: u16| HostFunctionError::HttpRequestFailed {
            url: url.to_string(),
            status,
        };

        let response = self.client.get(url).send().await.map_err(|e| {
            warn!(url, error = %e, "Fetch failed");
            failed(0)
        })?;

        let status = response.status().as_u16();
        if response
            .content_length()
            .is_some_and(|len| len > MAX_BODY_BYTES as u64)
        {
            warn!(url, status, "Fetch response too large");
            return Err(failed(status));
        }

        let body = read_limited(response.bytes_stream(), MAX_BODY_BYTES)
            .await
            .map_err(|e| {
                warn!(url, status, error = %e, "Fetch body not read");
                failed(status)
            })?;

        info!(url, status, body_size = body.len(), "Fetch completed");

        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

#[derive(Debug, thiserror::Error)]
enum BodyError<E> {
    #[error("body exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("body stream failed: {0}")]
    Stream(E),
}

/// Collect a chunked body, giving up as soon as it grows past `limit`.
async fn read_limited<S, E>(chunks: S, limit: usize) -> Result<Vec<u8>, BodyError<E>>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    let mut chunks = std::pin::pin!(chunks);
    let mut body = Vec::new();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(BodyError::Stream)?;
        if body.len() + chunk.len() > limit {
            return Err(BodyError::TooLarge { limit });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

impl std::fmt::Debug for HttpOutboundHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpOutboundHost")
            .field("permissions", &self.permissions)
            .field("request_count", &self.request_count())
            .finish_non_exhaustive()
    }
}
