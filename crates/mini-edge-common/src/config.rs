//! Configuration structures for mini-edge.
//!
//! This module defines configuration options for various components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings (pooling, module caching)
//! - [`ExecutionConfig`]: Per-invocation limits (fuel, deadline)
//! - [`FetchConfig`]: Outbound fetch allow-list for workers
//! - [`QuotaConfig`]: Plans and their per-project ceilings
//! - [`TrafficConfig`] / [`LogsConfig`]: Inspector buffer sizes

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
///
/// This structure contains all configuration options for the platform.
/// It is usually loaded as the `[runtime]` table of a TOML config file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-invocation execution configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Outbound fetch capability configuration.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Traffic recorder configuration.
    #[serde(default)]
    pub traffic: TrafficConfig,

    /// Worker log buffer configuration.
    #[serde(default)]
    pub logs: LogsConfig,

    /// Route resolution behaviour.
    #[serde(default)]
    pub routing: RoutingConfig,

    /// On-disk persistence.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Plans and quota ceilings.
    #[serde(default)]
    pub quota: QuotaConfig,
}

/// Wasmtime engine configuration.
///
/// These settings affect the global Wasmtime engine behavior,
/// including memory allocation strategy and compiled module reuse.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable pooling allocator for high-performance instance creation.
    ///
    /// When enabled, memory is pre-allocated for a pool of instances,
    /// reducing instantiation time at the cost of reserved address space.
    #[serde(default = "defaults::pooling_allocator")]
    pub pooling_allocator: bool,

    /// Maximum concurrent instances in the pool.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per instance slot in megabytes.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Reuse compiled modules across requests, keyed by source hash.
    #[serde(default = "defaults::cache_compiled_modules")]
    pub cache_compiled_modules: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pooling_allocator: defaults::pooling_allocator(),
            max_instances: defaults::max_instances(),
            instance_memory_mb: defaults::instance_memory_mb(),
            cache_compiled_modules: defaults::cache_compiled_modules(),
        }
    }
}

/// Per-invocation execution configuration.
///
/// These settings control resource limits for a single worker invocation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Maximum fuel (CPU instructions) per invocation.
    ///
    /// This is what eventually stops a handler that was abandoned
    /// after its deadline.
    #[serde(default = "defaults::max_fuel")]
    pub max_fuel: u64,

    /// Invocation deadline in milliseconds.
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,

    /// Fuel consumed between cooperative yields to the scheduler.
    #[serde(default = "defaults::yield_interval_fuel")]
    pub yield_interval_fuel: u64,

    /// Enable fuel metering.
    ///
    /// When disabled the store receives an effectively unlimited budget.
    #[serde(default = "defaults::fuel_metering")]
    pub fuel_metering: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_fuel: defaults::max_fuel(),
            timeout_ms: defaults::timeout_ms(),
            yield_interval_fuel: defaults::yield_interval_fuel(),
            fuel_metering: defaults::fuel_metering(),
        }
    }
}

impl ExecutionConfig {
    /// Get the deadline as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Fuel given to each fresh store.
    pub fn initial_fuel(&self) -> u64 {
        if self.fuel_metering {
            self.max_fuel
        } else {
            u64::MAX
        }
    }
}

/// Outbound fetch configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    /// Hostnames workers may fetch from.
    ///
    /// Entries are exact hosts (`api.example.com`) or wildcard subdomains
    /// (`*.example.com`). An empty list disables outbound fetch.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,

    /// Maximum fetch calls per invocation.
    #[serde(default = "defaults::max_fetch_requests")]
    pub max_requests: u32,

    /// Per-fetch timeout in milliseconds.
    #[serde(default = "defaults::fetch_timeout_ms")]
    pub timeout_ms: u64,

    /// Reject loopback, private and link-local destinations.
    #[serde(default = "defaults::block_private_addresses")]
    pub block_private_addresses: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: Vec::new(),
            max_requests: defaults::max_fetch_requests(),
            timeout_ms: defaults::fetch_timeout_ms(),
            block_private_addresses: defaults::block_private_addresses(),
        }
    }
}

/// Traffic recorder configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrafficConfig {
    /// Number of records kept in the ring buffer.
    #[serde(default = "defaults::traffic_capacity")]
    pub capacity: usize,

    /// Events queued per observer before that observer starts missing events.
    #[serde(default = "defaults::observer_queue")]
    pub observer_queue: usize,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            capacity: defaults::traffic_capacity(),
            observer_queue: defaults::observer_queue(),
        }
    }
}

/// Worker log buffer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogsConfig {
    /// Number of log lines kept.
    #[serde(default = "defaults::logs_capacity")]
    pub capacity: usize,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            capacity: defaults::logs_capacity(),
        }
    }
}

/// Route resolution behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingConfig {
    /// When no route matches `/name`, invoke the worker called `name`.
    #[serde(default = "defaults::fallback_to_worker")]
    pub fallback_to_worker: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            fallback_to_worker: defaults::fallback_to_worker(),
        }
    }
}

/// On-disk persistence configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory for routes, workers, projects and KV namespaces.
    ///
    /// When unset, all state lives in memory.
    #[serde(default)]
    pub data_dir: Option<String>,
}

/// Resource ceilings of a single plan.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PlanConfig {
    /// Worker invocations admitted per UTC day.
    pub requests_per_day: u64,
    /// Distinct worker names a project may own.
    pub max_workers: usize,
    /// Keys in the project's KV namespace.
    pub kv_max_keys: usize,
    /// Serialized size of a single KV value, in bytes.
    pub kv_max_value_bytes: usize,
}

/// Plans and the plan assigned to new projects.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuotaConfig {
    /// Plan used when signup does not name one.
    #[serde(default = "defaults::default_plan")]
    pub default_plan: String,

    /// Plans by name.
    #[serde(default = "defaults::plans")]
    pub plans: BTreeMap<String, PlanConfig>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_plan: defaults::default_plan(),
            plans: defaults::plans(),
        }
    }
}

impl QuotaConfig {
    /// Look up a plan by name.
    pub fn plan(&self, name: &str) -> Option<&PlanConfig> {
        self.plans.get(name)
    }
}

/// Default value functions for serde.
mod defaults {
    use std::collections::BTreeMap;

    use super::PlanConfig;

    pub const fn pooling_allocator() -> bool {
        false
    }

    pub const fn max_instances() -> u32 {
        1000
    }

    pub const fn instance_memory_mb() -> u32 {
        64
    }

    pub const fn cache_compiled_modules() -> bool {
        true
    }

    pub const fn max_fuel() -> u64 {
        10_000_000
    }

    pub const fn timeout_ms() -> u64 {
        1000
    }

    pub const fn yield_interval_fuel() -> u64 {
        10_000
    }

    pub const fn fuel_metering() -> bool {
        true
    }

    pub const fn max_fetch_requests() -> u32 {
        10
    }

    pub const fn fetch_timeout_ms() -> u64 {
        5000
    }

    pub const fn block_private_addresses() -> bool {
        true
    }

    pub const fn traffic_capacity() -> usize {
        500
    }

    pub const fn observer_queue() -> usize {
        64
    }

    pub const fn logs_capacity() -> usize {
        1000
    }

    pub const fn fallback_to_worker() -> bool {
        true
    }

    pub fn default_plan() -> String {
        "free".to_string()
    }

    pub fn plans() -> BTreeMap<String, PlanConfig> {
        let mut plans = BTreeMap::new();
        plans.insert(
            "free".to_string(),
            PlanConfig {
                requests_per_day: 1_000,
                max_workers: 3,
                kv_max_keys: 100,
                kv_max_value_bytes: 1024,
            },
        );
        plans.insert(
            "pro".to_string(),
            PlanConfig {
                requests_per_day: 100_000,
                max_workers: 50,
                kv_max_keys: 10_000,
                kv_max_value_bytes: 64 * 1024,
            },
        );
        plans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();

        assert!(!config.engine.pooling_allocator);
        assert_eq!(config.engine.max_instances, 1000);
        assert!(config.engine.cache_compiled_modules);

        assert_eq!(config.execution.max_fuel, 10_000_000);
        assert_eq!(config.execution.timeout_ms, 1000);
        assert!(config.execution.fuel_metering);

        assert!(config.fetch.allowed_hosts.is_empty());
        assert_eq!(config.traffic.capacity, 500);
        assert_eq!(config.logs.capacity, 1000);
        assert!(config.routing.fallback_to_worker);
        assert!(config.storage.data_dir.is_none());
        assert_eq!(config.quota.default_plan, "free");
        assert_eq!(config.quota.plans.len(), 2);
    }

    #[test]
    fn test_config_serialization() {
        let config = RuntimeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: RuntimeConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(
            config.engine.max_instances,
            deserialized.engine.max_instances
        );
        assert_eq!(config.execution.max_fuel, deserialized.execution.max_fuel);
        assert_eq!(config.quota.plans, deserialized.quota.plans);
    }

    #[test]
    fn test_execution_timeout() {
        let config = ExecutionConfig {
            timeout_ms: 500,
            ..Default::default()
        };

        assert_eq!(config.timeout(), std::time::Duration::from_millis(500));
    }

    #[test]
    fn test_initial_fuel_without_metering() {
        let config = ExecutionConfig {
            fuel_metering: false,
            ..Default::default()
        };
        assert_eq!(config.initial_fuel(), u64::MAX);
    }

    #[test]
    fn test_partial_deserialization() {
        let json = r#"{"traffic": {"capacity": 10}, "quota": {"default_plan": "pro"}}"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.traffic.capacity, 10);
        assert_eq!(config.traffic.observer_queue, 64);
        assert_eq!(config.quota.default_plan, "pro");
        // Plans fall back to the built-in tiers.
        assert_eq!(config.quota.plan("pro").unwrap().max_workers, 50);
    }

    #[test]
    fn test_free_plan_ceilings() {
        let quota = QuotaConfig::default();
        let free = quota.plan("free").unwrap();

        assert_eq!(free.requests_per_day, 1_000);
        assert_eq!(free.max_workers, 3);
        assert_eq!(free.kv_max_keys, 100);
        assert_eq!(free.kv_max_value_bytes, 1024);
        assert!(quota.plan("enterprise").is_none());
    }
}
