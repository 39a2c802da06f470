//! Worker handlers and the loader that builds them from source.
//!
//! Loading and invoking are separate steps. [`HandlerLoader`]
//! turns source text into a [`Handler`], failing with a fault if the source
//! does not compile or lacks a `handle` export. [`Handler::invoke`] then runs
//! one request in a fresh sandbox and can only fail at runtime.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::WasmEngine;
use crate::capabilities::Capabilities;
use crate::instance::InstanceRunner;
use crate::module::{CompiledModule, ModuleCache};
use crate::request::{WorkerRequest, WorkerResponse};
use crate::store::{WorkerContext, create_store};
use mini_edge_common::{ExecutionConfig, ExecutionFault};

/// A loaded worker, ready to serve requests.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Name of the worker this handler runs.
    fn name(&self) -> &str;

    /// Run one request in a fresh, isolated context.
    async fn invoke(
        &self,
        request: WorkerRequest,
        capabilities: Capabilities,
    ) -> Result<WorkerResponse, ExecutionFault>;
}

/// Handler backed by a compiled Wasm module.
pub struct WasmHandler {
    name: String,
    module: CompiledModule,
    engine: WasmEngine,
    runner: Arc<InstanceRunner>,
    config: ExecutionConfig,
}

#[async_trait]
impl Handler for WasmHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        request: WorkerRequest,
        capabilities: Capabilities,
    ) -> Result<WorkerResponse, ExecutionFault> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let payload = request.to_json();
        let context = WorkerContext::new(request_id, self.name.clone(), request.params, capabilities);

        let mut store = create_store(&self.engine, &self.config, context)?;
        self.runner
            .run_handler(&self.module, &mut store, &payload)
            .await
    }
}

impl std::fmt::Debug for WasmHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmHandler")
            .field("name", &self.name)
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

/// Builds [`Handler`]s from worker source.
#[derive(Clone)]
pub struct HandlerLoader {
    engine: WasmEngine,
    runner: Arc<InstanceRunner>,
    cache: ModuleCache,
    config: ExecutionConfig,
}

impl HandlerLoader {
    /// Create a loader. `runner` must already have host functions registered.
    pub fn new(engine: WasmEngine, runner: Arc<InstanceRunner>, config: ExecutionConfig) -> Self {
        let cache = ModuleCache::new(engine.config().cache_compiled_modules);
        Self {
            engine,
            runner,
            cache,
            config,
        }
    }

    /// Compile `source` and check it exports `handle`.
    ///
    /// # Errors
    ///
    /// - [`ExecutionFault::Runtime`] with the compiler message on a parse or
    ///   validation error
    /// - [`ExecutionFault::MissingHandler`] if there is no `handle` export
    pub fn load(&self, name: &str, source: &str) -> Result<Arc<dyn Handler>, ExecutionFault> {
        let module = self.cache.get_or_compile(self.engine.inner(), source)?;
        if !module.has_handler() {
            debug!(worker = %name, "Module has no handle export");
            return Err(ExecutionFault::MissingHandler);
        }

        Ok(Arc::new(WasmHandler {
            name: name.to_string(),
            module,
            engine: self.engine.clone(),
            runner: Arc::clone(&self.runner),
            config: self.config.clone(),
        }))
    }

    /// Execution settings handed to each handler.
    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Compiled-module cache.
    pub fn cache(&self) -> &ModuleCache {
        &self.cache
    }
}

impl std::fmt::Debug for HandlerLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerLoader")
            .field("cached_modules", &self.cache.len())
            .finish_non_exhaustive()
    }
}
