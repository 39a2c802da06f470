//! Outbound fetch permissions.
//!
//! [`Permissions`] decides which URLs a worker may fetch. It is built once
//! from [`FetchConfig`] and shared by every invocation.

use std::collections::HashSet;

use mini_edge_common::FetchConfig;

/// Permission configuration for outbound fetch.
///
/// # Security Philosophy
///
/// - By default, nothing is allowed
/// - Each host must be explicitly listed
/// - Permissions are immutable during execution
#[derive(Debug, Clone, Default)]
pub struct Permissions {
    /// Allowed HTTP hosts (domain patterns).
    ///
    /// Patterns can be:
    /// - Exact match: `api.example.com`
    /// - Wildcard subdomain: `*.example.com` (matches `api.example.com`, `www.example.com`)
    /// - All hosts: `*`
    pub allowed_http_hosts: HashSet<String>,

    /// Enable HTTP outbound access.
    pub http_enabled: bool,

    /// Maximum HTTP requests per invocation.
    pub max_http_requests: u32,

    /// Reject private and loopback destinations even when the host matches.
    pub block_private_addresses: bool,
}

impl Permissions {
    /// Create a permission set with fetch disabled.
    pub fn none() -> Self {
        Self {
            block_private_addresses: true,
            ..Self::default()
        }
    }

    /// Build permissions from configuration.
    ///
    /// An empty host list leaves fetch disabled.
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            allowed_http_hosts: config
                .allowed_hosts
                .iter()
                .map(|h| h.to_lowercase())
                .collect(),
            http_enabled: !config.allowed_hosts.is_empty(),
            max_http_requests: config.max_requests,
            block_private_addresses: config.block_private_addresses,
        }
    }

    /// Create a builder for constructing permissions.
    pub fn builder() -> PermissionsBuilder {
        PermissionsBuilder {
            inner: Self::none(),
        }
    }

    /// Check if HTTP access to the given URL is allowed.
    ///
    /// This performs:
    /// 1. Check if HTTP is enabled at all
    /// 2. Parse the URL and extract the host
    /// 3. Match the host against allowed patterns
    /// 4. Block private/internal addresses when configured
    pub fn is_http_allowed(&self, url: &str) -> bool {
        if !self.http_enabled {
            return false;
        }

        let Ok(parsed) = url::Url::parse(url) else {
            return false;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return false;
        }
        let Some(host) = parsed.host_str().map(str::to_lowercase) else {
            return false;
        };

        if self.block_private_addresses && Self::is_private_address(url) {
            return false;
        }

        self.allowed_http_hosts.contains("*")
            || self
                .allowed_http_hosts
                .iter()
                .any(|pattern| Self::matches_pattern(pattern, &host))
    }

    /// Check if a host matches a permission pattern.
    fn matches_pattern(pattern: &str, host: &str) -> bool {
        match pattern.strip_prefix("*.") {
            Some(base) => host == base || host.ends_with(&format!(".{base}")),
            None => pattern == host,
        }
    }

    /// Check if the given URL points at a private/internal address.
    ///
    /// Covers:
    /// - localhost and 127.0.0.0/8
    /// - Private IP ranges (10.x.x.x, 172.16-31.x.x, 192.168.x.x)
    /// - Link-local addresses (169.254.x.x)
    /// - Cloud metadata endpoints (169.254.169.254)
    pub fn is_private_address(url: &str) -> bool {
        let Ok(parsed) = url::Url::parse(url) else {
            return false;
        };

        let Some(host_str) = parsed.host_str() else {
            return false;
        };
        let host = host_str.to_lowercase();

        if host == "localhost" || host.ends_with(".localhost") {
            return true;
        }

        if host == "metadata.google.internal" {
            return true;
        }

        match parsed.host() {
            Some(url::Host::Ipv4(v4)) => {
                v4.is_private()
                    || v4.is_loopback()
                    || v4.is_link_local()
                    || v4.is_broadcast()
                    || v4.is_documentation()
                    || v4.is_unspecified()
            }
            Some(url::Host::Ipv6(v6)) => v6.is_loopback() || v6.is_unspecified(),
            Some(url::Host::Domain(_)) | None => false,
        }
    }
}

/// Builder for [`Permissions`].
#[derive(Debug)]
pub struct PermissionsBuilder {
    inner: Permissions,
}

impl PermissionsBuilder {
    /// Allow HTTP access to specific hosts.
    #[must_use]
    pub fn allow_http_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.http_enabled = true;
        self.inner.allowed_http_hosts = hosts
            .into_iter()
            .map(|h| h.into().to_lowercase())
            .collect();
        self
    }

    /// Set the maximum number of HTTP requests per invocation.
    #[must_use]
    pub fn max_http_requests(mut self, max: u32) -> Self {
        self.inner.max_http_requests = max;
        self
    }

    /// Allow private destinations (tests against local servers).
    #[must_use]
    pub fn allow_private_addresses(mut self) -> Self {
        self.inner.block_private_addresses = false;
        self
    }

    /// Build the permissions.
    #[must_use]
    pub fn build(self) -> Permissions {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissions_none() {
        let perms = Permissions::none();
        assert!(!perms.http_enabled);
        assert!(perms.allowed_http_hosts.is_empty());
        assert!(!perms.is_http_allowed("https://api.example.com/"));
    }

    #[test]
    fn test_from_config() {
        let config = FetchConfig {
            allowed_hosts: vec!["API.example.com".into()],
            max_requests: 3,
            ..Default::default()
        };
        let perms = Permissions::from_config(&config);

        assert!(perms.http_enabled);
        assert_eq!(perms.max_http_requests, 3);
        assert!(perms.is_http_allowed("https://api.example.com/v1"));

        let perms = Permissions::from_config(&FetchConfig::default());
        assert!(!perms.http_enabled);
    }

    #[test]
    fn test_http_allowed_exact_match() {
        let perms = Permissions::builder()
            .allow_http_hosts(["api.example.com"])
            .build();

        assert!(perms.is_http_allowed("https://api.example.com/path"));
        assert!(!perms.is_http_allowed("https://other.example.com/path"));
        assert!(!perms.is_http_allowed("https://evil.com/path"));
    }

    #[test]
    fn test_http_allowed_wildcard() {
        let perms = Permissions::builder()
            .allow_http_hosts(["*.example.com"])
            .build();

        assert!(perms.is_http_allowed("https://api.example.com/path"));
        assert!(perms.is_http_allowed("https://example.com/path"));
        assert!(!perms.is_http_allowed("https://notexample.com/path"));
        assert!(!perms.is_http_allowed("https://evil.com/path"));
    }

    #[test]
    fn test_non_http_scheme_rejected() {
        let perms = Permissions::builder().allow_http_hosts(["*"]).build();
        assert!(perms.is_http_allowed("https://anything.example/"));
        assert!(!perms.is_http_allowed("file:///etc/passwd"));
        assert!(!perms.is_http_allowed("not a url"));
    }

    #[test]
    fn test_private_destinations_blocked_even_if_listed() {
        let perms = Permissions::builder()
            .allow_http_hosts(["localhost", "127.0.0.1"])
            .build();
        assert!(!perms.is_http_allowed("http://localhost:8080/"));
        assert!(!perms.is_http_allowed("http://127.0.0.1/"));

        let perms = Permissions::builder()
            .allow_http_hosts(["127.0.0.1"])
            .allow_private_addresses()
            .build();
        assert!(perms.is_http_allowed("http://127.0.0.1:9000/"));
    }

    #[test]
    fn test_private_address_ranges() {
        assert!(Permissions::is_private_address("http://localhost:8080/"));
        assert!(Permissions::is_private_address("http://[::1]:8080/"));
        assert!(Permissions::is_private_address("http://10.0.0.1/"));
        assert!(Permissions::is_private_address("http://172.16.0.1/"));
        assert!(Permissions::is_private_address("http://192.168.1.1/"));
        assert!(Permissions::is_private_address("http://169.254.169.254/"));
        assert!(Permissions::is_private_address(
            "http://metadata.google.internal/"
        ));
    }

    #[test]
    fn test_private_address_public() {
        assert!(!Permissions::is_private_address("https://api.example.com/"));
        assert!(!Permissions::is_private_address("https://8.8.8.8/"));
    }
}
