//! Shared application state.
//!
//! [`AppState`] owns every platform component. Handlers receive it by
//! clone, so all components sit behind `Arc`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use mini_edge_common::{ConfigFile, RoutingConfig, RuntimeConfig};
use mini_edge_core::{Capabilities, ExecutionEngine, HandlerLoader, WasmEngine};
use mini_edge_host::{HttpOutboundHost, Permissions, build_client, create_instance_runner};
use mini_edge_state::{
    KvNamespace, KvStore, LogBuffer, QuotaEnforcer, RouteMatch, RouteTable, StateResult,
    TrafficRecorder, Worker, WorkerRegistry,
};

use crate::error::ServerError;
use crate::server::check_request_timeout;

/// Shared state across all request handlers.
#[derive(Clone)]
pub struct AppState {
    executor: Arc<ExecutionEngine>,
    workers: Arc<WorkerRegistry>,
    routes: Arc<RouteTable>,
    quota: Arc<QuotaEnforcer>,
    kv: Arc<KvStore>,
    traffic: Arc<TrafficRecorder>,
    logs: Arc<LogBuffer>,

    /// Shared by the fetch capability of every invocation.
    http_client: reqwest::Client,
    permissions: Arc<Permissions>,

    routing: RoutingConfig,
    webhook_secret: Option<Arc<str>>,
}

impl AppState {
    /// Create application state from runtime configuration.
    ///
    /// With `storage.data_dir` set, routes, workers, projects and KV
    /// namespaces are loaded from and written to that directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be created or persisted state
    /// cannot be read.
    pub async fn new(config: &RuntimeConfig) -> Result<Self, ServerError> {
        let engine = WasmEngine::new(&config.engine)?;
        let runner = Arc::new(create_instance_runner(&engine)?);
        let loader = HandlerLoader::new(engine, runner, config.execution.clone());
        let executor = Arc::new(ExecutionEngine::new(loader));

        let (workers, routes, quota, kv) = match config.storage.data_dir.as_deref() {
            Some(dir) => {
                let dir = Path::new(dir);
                info!(data_dir = %dir.display(), "Loading persisted state");
                (
                    WorkerRegistry::open(dir).await?,
                    RouteTable::open(dir).await?,
                    QuotaEnforcer::open(config.quota.clone(), dir).await?,
                    KvStore::with_data_dir(dir),
                )
            }
            None => (
                WorkerRegistry::in_memory(),
                RouteTable::in_memory(),
                QuotaEnforcer::in_memory(config.quota.clone()),
                KvStore::in_memory(),
            ),
        };

        Ok(Self {
            executor,
            workers: Arc::new(workers),
            routes: Arc::new(routes),
            quota: Arc::new(quota),
            kv: Arc::new(kv),
            traffic: Arc::new(TrafficRecorder::new(
                config.traffic.capacity,
                config.traffic.observer_queue,
            )),
            logs: Arc::new(LogBuffer::new(
                config.logs.capacity,
                config.traffic.observer_queue,
            )),
            http_client: build_client(&config.fetch)?,
            permissions: Arc::new(Permissions::from_config(&config.fetch)),
            routing: config.routing.clone(),
            webhook_secret: None,
        })
    }

    /// Create state from a configuration file and seed its projects,
    /// workers and routes.
    ///
    /// Worker paths are resolved relative to `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the server's request timeout does not exceed the
    /// execution timeout, state creation fails, a worker file cannot be read,
    /// or a seeded entry is rejected.
    pub async fn from_config_file(file: &ConfigFile, base_dir: &Path) -> Result<Self, ServerError> {
        check_request_timeout(
            Duration::from_secs(file.server.request_timeout_secs),
            file.runtime.execution.timeout(),
        )?;
        let state = Self::new(&file.runtime)
            .await?
            .with_webhook_secret(file.webhook.github_secret.clone());

        for project in &file.projects {
            state
                .quota
                .ensure_project(&project.token, project.plan.as_deref())
                .await?;
        }

        for entry in &file.workers {
            let path = base_dir.join(&entry.path);
            let source = tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| ServerError::WorkerSource {
                    path: path.display().to_string(),
                    source,
                })?;
            state.quota.ensure_project(&entry.owner, None).await?;
            state.deploy_worker(&entry.owner, &entry.name, &source).await?;
        }

        for route in &file.routes {
            state.routes.upsert(&route.pattern, &route.worker).await?;
        }

        info!(
            projects = state.quota.len(),
            workers = state.workers.len(),
            routes = file.routes.len(),
            "Seeded state from configuration"
        );
        Ok(state)
    }

    /// Set the webhook signing secret. Without one every delivery is
    /// rejected.
    #[must_use]
    pub fn with_webhook_secret(mut self, secret: Option<String>) -> Self {
        self.webhook_secret = secret.filter(|s| !s.is_empty()).map(Arc::from);
        self
    }

    pub fn executor(&self) -> &ExecutionEngine {
        &self.executor
    }

    pub fn workers(&self) -> &WorkerRegistry {
        &self.workers
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn quota(&self) -> &QuotaEnforcer {
        &self.quota
    }

    pub fn traffic(&self) -> &TrafficRecorder {
        &self.traffic
    }

    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        self.webhook_secret.as_deref()
    }

    /// The KV namespace of a project, bounded by its plan.
    pub fn kv_namespace(&self, token: &str) -> StateResult<KvNamespace> {
        let limits = self.quota.kv_limits(token)?;
        Ok(self.kv.namespace(token, limits))
    }

    /// Capabilities handed to one invocation of a worker owned by `owner`.
    ///
    /// The fetch capability is fresh per invocation so its request limit
    /// counts that invocation only.
    pub fn capabilities(&self, owner: &str) -> StateResult<Capabilities> {
        let fetch = HttpOutboundHost::new(self.http_client.clone(), Arc::clone(&self.permissions));
        Ok(Capabilities::none()
            .with_kv(self.kv_namespace(owner)?)
            .with_fetch(Arc::new(fetch))
            .with_logs(Arc::clone(&self.logs)))
    }

    /// Resolve a path to a worker.
    ///
    /// Falls back to the worker named by a single-segment path when routing
    /// allows it. The fallback's pattern is the concrete path.
    pub async fn resolve(&self, path: &str) -> Option<RouteMatch> {
        if let Some(found) = self.routes.resolve(path).await {
            return Some(found);
        }
        if !self.routing.fallback_to_worker {
            return None;
        }

        let name = path.strip_prefix('/')?;
        if name.is_empty() || name.contains('/') || !self.workers.contains(name) {
            return None;
        }
        Some(RouteMatch {
            pattern: path.to_string(),
            worker: name.to_string(),
            params: BTreeMap::new(),
        })
    }

    /// Deploy a worker for a project, charging its worker quota.
    ///
    /// # Errors
    ///
    /// Fails when the name is invalid, owned by another project, or the
    /// project is at its worker limit.
    pub async fn deploy_worker(&self, token: &str, name: &str, source: &str) -> StateResult<Arc<Worker>> {
        WorkerRegistry::validate_name(name)?;
        let owned_before = self.quota.authenticate(token)?.workers.contains(name);

        self.quota.admit_deploy(token, name).await?;
        match self.workers.deploy(name, source, token).await {
            Ok(worker) => Ok(worker),
            Err(e) => {
                if !owned_before {
                    self.quota.release_worker(token, name);
                }
                warn!(worker = %name, error = %e, "Deploy failed");
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("workers", &self.workers.len())
            .field("projects", &self.quota.len())
            .field("traffic", &self.traffic.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mini_edge_common::config_file::{ProjectEntry, RouteEntry, WorkerEntry};
    use mini_edge_state::StateError;

    const HELLO: &str = r#"
        (module
            (memory (export "memory") 1)
            (data (i32.const 0) "hi")
            (func (export "handle") (param i32 i32) (result i64) (i64.const 2)))
    "#;

    async fn state() -> AppState {
        AppState::new(&RuntimeConfig::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_app_state_creation() {
        let state = state().await;
        assert!(state.workers().is_empty());
        assert!(state.routes().is_empty().await);
        assert!(state.webhook_secret().is_none());
    }

    #[tokio::test]
    async fn test_fallback_resolution() {
        let state = state().await;
        let project = state.quota().signup(None).await.unwrap();
        state
            .deploy_worker(&project.token, "hello", HELLO)
            .await
            .unwrap();

        let found = state.resolve("/hello").await.unwrap();
        assert_eq!(found.worker, "hello");
        assert_eq!(found.pattern, "/hello");

        assert!(state.resolve("/hello/more").await.is_none());
        assert!(state.resolve("/missing").await.is_none());
        assert!(state.resolve("/").await.is_none());
    }

    #[tokio::test]
    async fn test_fallback_disabled() {
        let mut config = RuntimeConfig::default();
        config.routing.fallback_to_worker = false;
        let state = AppState::new(&config).await.unwrap();
        let project = state.quota().signup(None).await.unwrap();
        state
            .deploy_worker(&project.token, "hello", HELLO)
            .await
            .unwrap();

        assert!(state.resolve("/hello").await.is_none());
    }

    #[tokio::test]
    async fn test_deploy_worker_quota_and_ownership() {
        let state = state().await;
        let a = state.quota().signup(Some("free")).await.unwrap();
        let b = state.quota().signup(Some("free")).await.unwrap();

        for name in ["w1", "w2", "w3"] {
            state.deploy_worker(&a.token, name, HELLO).await.unwrap();
        }
        // Redeploying an owned worker is not a new worker
        state.deploy_worker(&a.token, "w1", HELLO).await.unwrap();

        let err = state.deploy_worker(&a.token, "w4", HELLO).await.unwrap_err();
        assert!(matches!(err, StateError::QuotaExceeded { .. }));

        let err = state.deploy_worker(&b.token, "w1", HELLO).await.unwrap_err();
        assert!(matches!(err, StateError::Forbidden(_)));

        let err = state.deploy_worker(&b.token, "bad name", HELLO).await.unwrap_err();
        assert!(matches!(err, StateError::InvalidName(_)));
        assert!(state.quota().authenticate(&b.token).unwrap().workers.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deploys_of_one_name() {
        let state = state().await;
        let a = state.quota().signup(Some("free")).await.unwrap();
        let b = state.quota().signup(Some("free")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            for token in [a.token.clone(), b.token.clone()] {
                let state = state.clone();
                handles.push(tokio::spawn(async move {
                    state.deploy_worker(&token, "shared", HELLO).await.is_ok()
                }));
            }
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let owner = state.workers().get("shared").unwrap().owner.clone();
        let other = if owner == a.token { &b.token } else { &a.token };
        assert_eq!(state.quota().owner_of("shared"), Some(owner.clone()));
        assert!(state.quota().authenticate(&owner).unwrap().workers.contains("shared"));
        assert!(state.quota().authenticate(other).unwrap().workers.is_empty());
    }

    #[tokio::test]
    async fn test_seed_from_config_file() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("hello.wat"), HELLO)
            .await
            .unwrap();

        let file = ConfigFile {
            projects: vec![ProjectEntry {
                token: "dev-token".into(),
                plan: Some("pro".into()),
            }],
            workers: vec![WorkerEntry {
                name: "hello".into(),
                path: "hello.wat".into(),
                owner: "dev-token".into(),
            }],
            routes: vec![RouteEntry {
                pattern: "/hi".into(),
                worker: "hello".into(),
            }],
            ..Default::default()
        };

        let state = AppState::from_config_file(&file, dir.path()).await.unwrap();

        assert_eq!(state.quota().plan_of("dev-token").unwrap().max_workers, 50);
        assert_eq!(state.workers().get("hello").unwrap().owner, "dev-token");
        assert_eq!(state.resolve("/hi").await.unwrap().worker, "hello");
    }

    #[tokio::test]
    async fn test_seed_missing_worker_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = ConfigFile {
            workers: vec![WorkerEntry {
                name: "ghost".into(),
                path: "ghost.wat".into(),
                owner: "dev-token".into(),
            }],
            ..Default::default()
        };

        let result = AppState::from_config_file(&file, dir.path()).await;
        assert!(matches!(result, Err(ServerError::WorkerSource { .. })));
    }

    #[tokio::test]
    async fn test_request_timeout_must_exceed_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = ConfigFile::default();
        file.server.request_timeout_secs = 2;
        file.runtime.execution.timeout_ms = 2000;

        let result = AppState::from_config_file(&file, dir.path()).await;
        assert!(matches!(result, Err(ServerError::Config(_))));

        file.runtime.execution.timeout_ms = 1999;
        assert!(AppState::from_config_file(&file, dir.path()).await.is_ok());
    }
}
