//! HTTP server implementation.
//!
//! This module provides the main [`EdgeServer`] struct for running
//! the mini-edge HTTP server.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};

use mini_edge_common::config_file::ServerConfigFile;

use crate::error::ServerError;
use crate::router::build_router;
use crate::state::AppState;

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server.
    pub bind_addr: SocketAddr,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Enable graceful shutdown on SIGTERM/SIGINT.
    pub graceful_shutdown: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            request_timeout_secs: 30,
            graceful_shutdown: true,
        }
    }
}

impl ServerConfig {
    /// Build from the `[server]` section of a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the bind address does not parse.
    pub fn from_file(file: &ServerConfigFile) -> Result<Self, ServerError> {
        let bind_addr = file.bind_addr.parse().map_err(|e| {
            ServerError::Config(format!("Invalid bind address '{}': {e}", file.bind_addr))
        })?;

        Ok(Self {
            bind_addr,
            request_timeout_secs: file.request_timeout_secs,
            graceful_shutdown: file.graceful_shutdown,
        })
    }

    /// Create a new server config with custom bind address.
    #[must_use]
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Create a new server config with custom timeout.
    #[must_use]
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Get the request timeout as Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// The HTTP request timeout must outlast the execution deadline, otherwise
/// callers see a bare 408 instead of the worker's `TIMEOUT` response.
pub(crate) fn check_request_timeout(
    request_timeout: Duration,
    deadline: Duration,
) -> Result<(), ServerError> {
    if request_timeout <= deadline {
        return Err(ServerError::Config(format!(
            "Request timeout ({}ms) must exceed the execution timeout ({}ms)",
            request_timeout.as_millis(),
            deadline.as_millis()
        )));
    }
    Ok(())
}

/// The mini-edge HTTP server.
///
/// # Example
///
/// ```ignore
/// use mini_edge_server::{AppState, EdgeServer, ServerConfig};
/// use mini_edge_common::RuntimeConfig;
///
/// let state = AppState::new(&RuntimeConfig::default()).await?;
/// let server = EdgeServer::new(state, ServerConfig::default());
/// server.run().await?;
/// ```
pub struct EdgeServer {
    /// Application state.
    state: AppState,
    /// Server configuration.
    config: ServerConfig,
}

impl EdgeServer {
    /// Create a new server instance.
    pub fn new(state: AppState, config: ServerConfig) -> Self {
        Self { state, config }
    }

    /// Get a reference to the application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run the server until shutdown.
    ///
    /// This will block until the server is shut down via signal
    /// (SIGTERM/SIGINT) if graceful shutdown is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the request timeout does not exceed the execution
    /// timeout, or if the server cannot bind to the address.
    pub async fn run(self) -> Result<(), ServerError> {
        check_request_timeout(self.config.request_timeout(), self.state.executor().deadline())?;
        let app = build_router(self.state, self.config.request_timeout());

        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| ServerError::Config(format!("Failed to bind {}: {e}", self.config.bind_addr)))?;

        info!(addr = %self.config.bind_addr, "Starting HTTP server");

        if self.config.graceful_shutdown {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        } else {
            axum::serve(listener, app).await?;
        }

        info!("Server shutdown complete");
        Ok(())
    }

    /// Start the server and return a handle for testing.
    ///
    /// The server binds to an ephemeral port (127.0.0.1:0) and
    /// returns a handle that can be used to get the actual address
    /// and shut down the server.
    pub async fn start_test(state: AppState) -> Result<TestHandle, ServerError> {
        let app = build_router(state.clone(), Duration::from_secs(30));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        Ok(TestHandle {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle,
        })
    }
}

/// Handle for a test server instance.
pub struct TestHandle {
    /// The address the server is bound to.
    addr: SocketAddr,
    state: AppState,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<Result<(), std::io::Error>>,
}

impl TestHandle {
    /// Get the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the server URL.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Shutdown the server gracefully.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.handle.await;
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
///
/// A signal that cannot be installed never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use mini_edge_common::RuntimeConfig;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.graceful_shutdown);
    }

    #[test]
    fn test_check_request_timeout() {
        let deadline = Duration::from_millis(1000);
        assert!(check_request_timeout(Duration::from_secs(30), deadline).is_ok());
        assert!(check_request_timeout(Duration::from_secs(1), deadline).is_err());
        assert!(check_request_timeout(Duration::from_millis(500), deadline).is_err());
    }

    #[test]
    fn test_server_config_builder() {
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let config = ServerConfig::default()
            .with_bind_addr(addr)
            .with_timeout(60);

        assert_eq!(config.bind_addr.port(), 4000);
        assert_eq!(config.request_timeout_secs, 60);
    }

    #[test]
    fn test_server_config_from_file() {
        let file = ServerConfigFile {
            bind_addr: "127.0.0.1:9000".into(),
            request_timeout_secs: 5,
            graceful_shutdown: false,
        };
        let config = ServerConfig::from_file(&file).unwrap();
        assert_eq!(config.bind_addr.port(), 9000);
        assert!(!config.graceful_shutdown);

        let bad = ServerConfigFile {
            bind_addr: "not an address".into(),
            ..file
        };
        assert!(matches!(
            ServerConfig::from_file(&bad),
            Err(ServerError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let state = AppState::new(&RuntimeConfig::default()).await.unwrap();
        let handle = EdgeServer::start_test(state).await.unwrap();

        assert_ne!(handle.addr().port(), 0);
        assert!(handle.url().starts_with("http://127.0.0.1:"));
        handle.shutdown().await;
    }
}
