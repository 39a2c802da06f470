//! Deployed worker registry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use mini_edge_common::content_hash;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{StateError, StateResult};
use crate::{now_millis, persist};

/// Longest accepted worker name.
pub const MAX_NAME_LEN: usize = 64;

/// A deployed worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub name: String,
    pub source: String,
    /// Token of the owning project.
    pub owner: String,
    /// SHA-256 of `source`, used as the compiled-module cache key.
    pub content_hash: String,
    pub deployed_at: i64,
}

/// Registry of deployed workers, keyed by name.
pub struct WorkerRegistry {
    workers: DashMap<String, Arc<Worker>>,
    file: Option<PathBuf>,
    persist_lock: Mutex<()>,
}

impl WorkerRegistry {
    pub fn in_memory() -> Self {
        Self {
            workers: DashMap::new(),
            file: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// Open a registry persisted at `data_dir/workers.json`.
    pub async fn open(data_dir: &Path) -> StateResult<Self> {
        let file = data_dir.join("workers.json");
        let workers = DashMap::new();
        if let Some(snapshot) = persist::load::<Vec<Worker>>(&file).await? {
            info!(workers = snapshot.len(), "workers loaded");
            for worker in snapshot {
                workers.insert(worker.name.clone(), Arc::new(worker));
            }
        }

        Ok(Self {
            workers,
            file: Some(file),
            persist_lock: Mutex::new(()),
        })
    }

    /// Check that `name` is 1-64 characters of `[A-Za-z0-9_-]`.
    pub fn validate_name(name: &str) -> StateResult<()> {
        let valid = !name.is_empty()
            && name.len() <= MAX_NAME_LEN
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if valid {
            Ok(())
        } else {
            Err(StateError::InvalidName(name.to_string()))
        }
    }

    /// Create or replace a worker.
    ///
    /// Replacing a worker owned by a different project is forbidden.
    pub async fn deploy(&self, name: &str, source: &str, owner: &str) -> StateResult<Arc<Worker>> {
        Self::validate_name(name)?;

        let worker = Arc::new(Worker {
            name: name.to_string(),
            source: source.to_string(),
            owner: owner.to_string(),
            content_hash: content_hash(source.as_bytes()),
            deployed_at: now_millis(),
        });

        let previous = match self.workers.entry(name.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().owner != owner {
                    return Err(StateError::Forbidden(format!(
                        "Worker '{name}' belongs to another project"
                    )));
                }
                Some(entry.insert(Arc::clone(&worker)))
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&worker));
                None
            }
        };

        if let Err(e) = self.flush().await {
            match previous {
                Some(old) => {
                    self.workers.insert(name.to_string(), old);
                }
                None => {
                    self.workers.remove(name);
                }
            }
            return Err(e);
        }

        info!(worker = %name, hash = %&worker.content_hash[..16], "worker deployed");
        Ok(worker)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Worker>> {
        self.workers.get(name).map(|w| Arc::clone(w.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    /// Deployed worker names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers.iter().map(|w| w.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    async fn flush(&self) -> StateResult<()> {
        let Some(path) = &self.file else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().await;
        let mut snapshot: Vec<Arc<Worker>> =
            self.workers.iter().map(|w| Arc::clone(w.value())).collect();
        snapshot.sort_by(|a, b| a.name.cmp(&b.name));
        persist::save(path, &snapshot).await
    }
}
