//! Configuration file structures for mini-edge.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`ServerConfigFile`]: HTTP server settings
//! - [`WebhookConfig`]: Source-control webhook settings
//! - [`ProjectEntry`], [`WorkerEntry`], [`RouteEntry`]: State seeded at startup

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::RuntimeConfig;

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [runtime.execution]
/// timeout_ms = 500
///
/// [runtime.fetch]
/// allowed_hosts = ["api.example.com"]
///
/// [runtime.quota.plans.free]
/// requests_per_day = 1000
/// max_workers = 3
/// kv_max_keys = 100
/// kv_max_value_bytes = 1024
///
/// [server]
/// bind_addr = "0.0.0.0:3000"
///
/// [webhook]
/// github_secret = "s3cret"
///
/// [[projects]]
/// token = "dev-token"
/// plan = "pro"
///
/// [[workers]]
/// name = "hello"
/// path = "./workers/hello.wat"
/// owner = "dev-token"
///
/// [[routes]]
/// pattern = "/hi"
/// worker = "hello"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Runtime configuration.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfigFile,

    /// Webhook configuration.
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Projects to create at startup.
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,

    /// Workers to deploy at startup.
    #[serde(default)]
    pub workers: Vec<WorkerEntry>,

    /// Routes to register at startup, in order.
    #[serde(default)]
    pub routes: Vec<RouteEntry>,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }
}

/// HTTP server configuration from config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfigFile {
    /// Bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "defaults::bind_addr")]
    pub bind_addr: String,

    /// Request timeout in seconds.
    ///
    /// Applies to producing a response, not to streaming bodies.
    #[serde(default = "defaults::request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Enable graceful shutdown.
    #[serde(default = "defaults::graceful_shutdown")]
    pub graceful_shutdown: bool,
}

impl Default for ServerConfigFile {
    fn default() -> Self {
        Self {
            bind_addr: defaults::bind_addr(),
            request_timeout_secs: defaults::request_timeout_secs(),
            graceful_shutdown: defaults::graceful_shutdown(),
        }
    }
}

/// Webhook configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WebhookConfig {
    /// Shared secret for `X-Hub-Signature-256` verification.
    ///
    /// Without a secret every webhook delivery is rejected.
    #[serde(default)]
    pub github_secret: Option<String>,
}

/// A project created at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProjectEntry {
    /// Bearer token identifying the project.
    pub token: String,

    /// Plan name; the default plan when omitted.
    #[serde(default)]
    pub plan: Option<String>,
}

/// A worker deployed at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerEntry {
    /// Worker name.
    pub name: String,

    /// Path to the WAT source file.
    pub path: String,

    /// Token of the owning project.
    pub owner: String,
}

/// A route registered at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteEntry {
    /// URL pattern (`/todo/:id`, `/static/*`).
    pub pattern: String,

    /// Target worker name.
    pub worker: String,
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

/// Default value functions for serde.
mod defaults {
    pub fn bind_addr() -> String {
        "0.0.0.0:3000".to_string()
    }

    pub const fn request_timeout_secs() -> u64 {
        30
    }

    pub const fn graceful_shutdown() -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_file() {
        let config = ConfigFile::default();

        assert_eq!(config.server.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.server.request_timeout_secs, 30);
        assert!(config.server.graceful_shutdown);
        assert!(config.webhook.github_secret.is_none());
        assert!(config.projects.is_empty());
        assert!(config.workers.is_empty());
        assert!(config.routes.is_empty());
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [server]
            bind_addr = "127.0.0.1:3000"
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert_eq!(config.server.bind_addr, "127.0.0.1:3000");
        // Defaults applied
        assert_eq!(config.server.request_timeout_secs, 30);
        assert_eq!(config.runtime.traffic.capacity, 500);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [runtime.execution]
            max_fuel = 5_000_000
            timeout_ms = 50

            [runtime.fetch]
            allowed_hosts = ["api.example.com", "*.cdn.example.com"]

            [runtime.traffic]
            capacity = 200

            [runtime.storage]
            data_dir = "./data"

            [runtime.quota]
            default_plan = "hobby"

            [runtime.quota.plans.hobby]
            requests_per_day = 10
            max_workers = 1
            kv_max_keys = 5
            kv_max_value_bytes = 64

            [server]
            bind_addr = "0.0.0.0:9000"
            request_timeout_secs = 60
            graceful_shutdown = false

            [webhook]
            github_secret = "s3cret"

            [[projects]]
            token = "tok-a"
            plan = "hobby"

            [[projects]]
            token = "tok-b"

            [[workers]]
            name = "hello"
            path = "./workers/hello.wat"
            owner = "tok-a"

            [[routes]]
            pattern = "/hi"
            worker = "hello"

            [[routes]]
            pattern = "/todo/:id"
            worker = "todo"
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert_eq!(config.runtime.execution.max_fuel, 5_000_000);
        assert_eq!(config.runtime.fetch.allowed_hosts.len(), 2);
        assert_eq!(config.runtime.traffic.capacity, 200);
        assert_eq!(config.runtime.storage.data_dir.as_deref(), Some("./data"));
        assert_eq!(config.runtime.quota.default_plan, "hobby");
        assert_eq!(
            config.runtime.quota.plan("hobby").unwrap().requests_per_day,
            10
        );
        assert_eq!(config.server.bind_addr, "0.0.0.0:9000");
        assert!(!config.server.graceful_shutdown);
        assert_eq!(config.webhook.github_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.projects.len(), 2);
        assert!(config.projects[1].plan.is_none());
        assert_eq!(config.workers[0].owner, "tok-a");
        assert_eq!(config.routes[1].pattern, "/todo/:id");
    }

    #[test]
    fn test_parse_invalid_toml() {
        let invalid = "this is not valid toml [";
        let result = ConfigFile::from_toml(invalid);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigFile::from_file("/definitely/not/here.toml");
        assert!(matches!(result, Err(ConfigFileError::Io { .. })));
    }
}
