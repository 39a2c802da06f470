//! Per-project key/value store.
//!
//! Each project owns an isolated namespace keyed by its token. Namespaces are
//! guarded by their own `RwLock`: reads proceed concurrently, and a write
//! holds the lock for the whole read-modify-write including the snapshot
//! file write, so concurrent puts never lose updates.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use mini_edge_common::{PlanConfig, content_hash};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{QuotaLimit, StateError, StateResult};
use crate::persist;

/// Plan ceilings applied to a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KvLimits {
    pub max_keys: usize,
    pub max_value_bytes: usize,
}

impl From<&PlanConfig> for KvLimits {
    fn from(plan: &PlanConfig) -> Self {
        Self {
            max_keys: plan.kv_max_keys,
            max_value_bytes: plan.kv_max_value_bytes,
        }
    }
}

#[derive(Default)]
struct Namespace {
    entries: Map<String, Value>,
    loaded: bool,
}

/// Key/value store holding every project namespace.
pub struct KvStore {
    namespaces: DashMap<String, Arc<RwLock<Namespace>>>,
    dir: Option<PathBuf>,
}

impl KvStore {
    /// Create a store that keeps everything in memory.
    pub fn in_memory() -> Self {
        Self {
            namespaces: DashMap::new(),
            dir: None,
        }
    }

    /// Create a store persisting one JSON file per namespace under `data_dir/kv`.
    pub fn with_data_dir(data_dir: &Path) -> Self {
        Self {
            namespaces: DashMap::new(),
            dir: Some(data_dir.join("kv")),
        }
    }

    /// Bind a view of one namespace with the given limits.
    pub fn namespace(self: &Arc<Self>, namespace: impl Into<String>, limits: KvLimits) -> KvNamespace {
        KvNamespace {
            store: Arc::clone(self),
            namespace: namespace.into(),
            limits,
        }
    }

    /// Read a value.
    pub async fn get(&self, namespace: &str, key: &str) -> StateResult<Option<Value>> {
        let slot = self.slot(namespace);
        {
            let ns = slot.read().await;
            if ns.loaded {
                return Ok(ns.entries.get(key).cloned());
            }
        }
        let mut ns = slot.write().await;
        self.ensure_loaded(namespace, &mut ns).await?;
        Ok(ns.entries.get(key).cloned())
    }

    /// Write a value, enforcing the key-count and value-size ceilings.
    ///
    /// Overwriting an existing key is allowed even at the key ceiling. On any
    /// error the namespace is left as it was.
    pub async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: Value,
        limits: KvLimits,
    ) -> StateResult<()> {
        let size = serde_json::to_vec(&value)?.len();
        if size > limits.max_value_bytes {
            return Err(StateError::quota(
                QuotaLimit::KvValueSize,
                format!(
                    "KV value too large ({size} bytes, limit {} bytes)",
                    limits.max_value_bytes
                ),
            ));
        }

        let slot = self.slot(namespace);
        let mut ns = slot.write().await;
        self.ensure_loaded(namespace, &mut ns).await?;

        let exists = ns.entries.contains_key(key);
        if !exists && ns.entries.len() >= limits.max_keys {
            return Err(StateError::quota(
                QuotaLimit::KvKeys,
                format!("KV key limit reached ({} keys)", limits.max_keys),
            ));
        }

        let previous = ns.entries.insert(key.to_string(), value);
        if let Err(e) = self.flush(namespace, &ns.entries).await {
            match previous {
                Some(old) => ns.entries.insert(key.to_string(), old),
                None => ns.entries.shift_remove(key),
            };
            return Err(e);
        }

        debug!(key, size, "kv put");
        Ok(())
    }

    /// Remove a key. Returns `true` if it existed.
    pub async fn delete(&self, namespace: &str, key: &str) -> StateResult<bool> {
        let slot = self.slot(namespace);
        let mut ns = slot.write().await;
        self.ensure_loaded(namespace, &mut ns).await?;

        let Some(old) = ns.entries.shift_remove(key) else {
            return Ok(false);
        };
        if let Err(e) = self.flush(namespace, &ns.entries).await {
            ns.entries.insert(key.to_string(), old);
            return Err(e);
        }

        debug!(key, "kv delete");
        Ok(true)
    }

    /// All entries of a namespace, in insertion order.
    pub async fn list(&self, namespace: &str) -> StateResult<Map<String, Value>> {
        let slot = self.slot(namespace);
        {
            let ns = slot.read().await;
            if ns.loaded {
                return Ok(ns.entries.clone());
            }
        }
        let mut ns = slot.write().await;
        self.ensure_loaded(namespace, &mut ns).await?;
        Ok(ns.entries.clone())
    }

    fn slot(&self, namespace: &str) -> Arc<RwLock<Namespace>> {
        if let Some(slot) = self.namespaces.get(namespace) {
            return Arc::clone(slot.value());
        }
        let loaded = self.dir.is_none();
        let slot = self
            .namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| {
                Arc::new(RwLock::new(Namespace {
                    entries: Map::new(),
                    loaded,
                }))
            });
        Arc::clone(slot.value())
    }

    async fn ensure_loaded(&self, namespace: &str, ns: &mut Namespace) -> StateResult<()> {
        if ns.loaded {
            return Ok(());
        }
        if let Some(path) = self.file_for(namespace) {
            if let Some(entries) = persist::load::<Map<String, Value>>(&path).await? {
                ns.entries = entries;
            }
        }
        ns.loaded = true;
        Ok(())
    }

    async fn flush(&self, namespace: &str, entries: &Map<String, Value>) -> StateResult<()> {
        match self.file_for(namespace) {
            Some(path) => persist::save(&path, entries).await,
            None => Ok(()),
        }
    }

    fn file_for(&self, namespace: &str) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        let hash = content_hash(namespace.as_bytes());
        Some(dir.join(format!("{}.json", &hash[..16])))
    }
}

/// A project's namespace bound to its plan limits.
///
/// This is the KV capability handed to worker invocations and API handlers.
#[derive(Clone)]
pub struct KvNamespace {
    store: Arc<KvStore>,
    namespace: String,
    limits: KvLimits,
}

impl KvNamespace {
    pub async fn get(&self, key: &str) -> StateResult<Option<Value>> {
        self.store.get(&self.namespace, key).await
    }

    pub async fn put(&self, key: &str, value: Value) -> StateResult<()> {
        self.store.put(&self.namespace, key, value, self.limits).await
    }

    pub async fn delete(&self, key: &str) -> StateResult<bool> {
        self.store.delete(&self.namespace, key).await
    }

    pub async fn list(&self) -> StateResult<Map<String, Value>> {
        self.store.list(&self.namespace).await
    }

    pub fn limits(&self) -> KvLimits {
        self.limits
    }
}

impl std::fmt::Debug for KvNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvNamespace")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const LIMITS: KvLimits = KvLimits {
        max_keys: 2,
        max_value_bytes: 16,
    };

    #[tokio::test]
    async fn test_read_your_writes() {
        let store = KvStore::in_memory();

        assert_eq!(store.get("tok", "a").await.unwrap(), None);
        store.put("tok", "a", json!("x"), LIMITS).await.unwrap();
        assert_eq!(store.get("tok", "a").await.unwrap(), Some(json!("x")));

        assert!(store.delete("tok", "a").await.unwrap());
        assert!(!store.delete("tok", "a").await.unwrap());
        assert_eq!(store.get("tok", "a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let store = KvStore::in_memory();
        store.put("one", "k", json!(1), LIMITS).await.unwrap();

        assert_eq!(store.get("two", "k").await.unwrap(), None);
        assert!(store.list("two").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_key_ceiling_rejects_new_keys_only() {
        let store = KvStore::in_memory();
        store.put("tok", "a", json!(1), LIMITS).await.unwrap();
        store.put("tok", "b", json!(2), LIMITS).await.unwrap();

        let err = store.put("tok", "c", json!(3), LIMITS).await.unwrap_err();
        assert!(matches!(
            err,
            StateError::QuotaExceeded {
                limit: QuotaLimit::KvKeys,
                ..
            }
        ));

        // Overwrite at the ceiling is fine.
        store.put("tok", "a", json!(10), LIMITS).await.unwrap();

        let all = store.list("tok").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["a"], json!(10));
        assert!(!all.contains_key("c"));
    }

    #[tokio::test]
    async fn test_value_ceiling_leaves_state_unchanged() {
        let store = KvStore::in_memory();
        store.put("tok", "a", json!("small"), LIMITS).await.unwrap();

        let big = json!("this string is far too long");
        let err = store.put("tok", "a", big, LIMITS).await.unwrap_err();
        assert!(matches!(
            err,
            StateError::QuotaExceeded {
                limit: QuotaLimit::KvValueSize,
                ..
            }
        ));
        assert_eq!(store.get("tok", "a").await.unwrap(), Some(json!("small")));
    }

    #[tokio::test]
    async fn test_list_keeps_insertion_order() {
        let store = KvStore::in_memory();
        let limits = KvLimits {
            max_keys: 10,
            max_value_bytes: 64,
        };
        for key in ["zeta", "alpha", "mid"] {
            store.put("tok", key, json!(key), limits).await.unwrap();
        }

        let keys: Vec<String> = store.list("tok").await.unwrap().keys().cloned().collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
    }

    #[tokio::test]
    async fn test_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();

        let store = KvStore::with_data_dir(dir.path());
        store.put("tok", "a", json!({"n": 1}), LIMITS).await.unwrap();
        drop(store);

        let reopened = KvStore::with_data_dir(dir.path());
        assert_eq!(
            reopened.get("tok", "a").await.unwrap(),
            Some(json!({"n": 1}))
        );
        assert!(dir.path().join("kv").read_dir().unwrap().count() == 1);
    }

    #[tokio::test]
    async fn test_concurrent_puts_respect_ceiling() {
        let store = Arc::new(KvStore::in_memory());
        let limits = KvLimits {
            max_keys: 5,
            max_value_bytes: 64,
        };

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.put("tok", &format!("k{i}"), json!(i), limits).await.is_ok()
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 5);
        assert_eq!(store.list("tok").await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_namespace_handle() {
        let store = Arc::new(KvStore::in_memory());
        let ns = store.namespace("tok", LIMITS);

        ns.put("a", json!(true)).await.unwrap();
        assert_eq!(ns.get("a").await.unwrap(), Some(json!(true)));
        assert_eq!(store.get("tok", "a").await.unwrap(), Some(json!(true)));
        assert_eq!(ns.limits(), LIMITS);
    }
}
