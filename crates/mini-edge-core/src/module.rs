//! Worker module compilation and caching.
//!
//! Worker source is WebAssembly text. [`CompiledModule`] wraps the compiled
//! Wasmtime [`Module`] together with the SHA-256 of its source, and
//! [`ModuleCache`] keeps compiled modules keyed by that hash so redeploying
//! identical source, or invoking the same worker repeatedly, compiles once.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tracing::{debug, info, instrument};
use wasmtime::{Engine, ExternType, Module};

use mini_edge_common::{RuntimeError, content_hash};

/// Name of the export every worker must provide.
pub const HANDLE_EXPORT: &str = "handle";

/// A compiled worker module.
///
/// Cloning is cheap; the underlying Wasmtime module is reference counted and
/// thread-safe.
#[derive(Clone)]
pub struct CompiledModule {
    inner: Module,
    content_hash: String,
    compiled_at: Instant,
}

impl CompiledModule {
    /// Compile a module from WAT (or binary Wasm) source.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::CompilationFailed`] carrying the parser or
    /// validator message.
    #[instrument(skip(engine, wat), fields(source_len = wat.len()))]
    pub fn from_wat(engine: &Engine, wat: &str) -> Result<Self, RuntimeError> {
        let start = Instant::now();

        let module = Module::new(engine, wat)
            .map_err(|e| RuntimeError::compilation_failed(format!("{e:#}")))?;

        let content_hash = content_hash(wat.as_bytes());

        info!(
            content_hash = %&content_hash[..16],
            duration_ms = start.elapsed().as_millis(),
            "Worker module compiled"
        );

        Ok(Self {
            inner: module,
            content_hash,
            compiled_at: Instant::now(),
        })
    }

    /// Returns `true` if the module exports a `handle` function.
    pub fn has_handler(&self) -> bool {
        self.inner
            .get_export(HANDLE_EXPORT)
            .is_some_and(|ty| matches!(ty, ExternType::Func(_)))
    }

    /// Get the SHA-256 of the source.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Get when this module was compiled.
    pub fn compiled_at(&self) -> Instant {
        self.compiled_at
    }

    /// Get the inner Wasmtime module.
    pub fn as_module(&self) -> &Module {
        &self.inner
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("content_hash", &self.content_hash)
            .field("has_handler", &self.has_handler())
            .finish_non_exhaustive()
    }
}

/// Compiled modules keyed by source hash.
#[derive(Clone, Default)]
pub struct ModuleCache {
    modules: Arc<DashMap<String, CompiledModule>>,
    enabled: bool,
}

impl ModuleCache {
    /// Create a cache. A disabled cache compiles on every lookup.
    pub fn new(enabled: bool) -> Self {
        Self {
            modules: Arc::new(DashMap::new()),
            enabled,
        }
    }

    /// Return the cached module for `source`, compiling it on a miss.
    ///
    /// Compilation failures are not cached.
    pub fn get_or_compile(&self, engine: &Engine, source: &str) -> Result<CompiledModule, RuntimeError> {
        if !self.enabled {
            return CompiledModule::from_wat(engine, source);
        }

        let hash = content_hash(source.as_bytes());
        if let Some(module) = self.modules.get(&hash) {
            debug!(content_hash = %&hash[..16], "Module cache hit");
            return Ok(module.clone());
        }

        let module = CompiledModule::from_wat(engine, source)?;
        self.modules.insert(hash, module.clone());
        Ok(module)
    }

    /// Number of cached modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
