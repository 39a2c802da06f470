//! Ordered route table.
//!
//! Routes map URL patterns to worker names. Patterns are `/`-separated
//! segments, each a literal, a `:name` capture, or a terminal `*` wildcard.
//! Resolution first looks for an exact literal match anywhere in the table,
//! then scans dynamic patterns in table order; the first match wins.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{StateError, StateResult};
use crate::persist;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

/// A parsed route.
#[derive(Debug, Clone)]
pub struct Route {
    pattern: String,
    worker: String,
    segments: Vec<Segment>,
}

impl Route {
    /// Parse and validate a pattern.
    pub fn parse(pattern: &str, worker: impl Into<String>) -> StateResult<Self> {
        if !pattern.starts_with('/') {
            return Err(StateError::InvalidRoute(format!(
                "'{pattern}' must start with '/'"
            )));
        }

        let raw: Vec<&str> = pattern.split('/').collect();
        let mut segments = Vec::with_capacity(raw.len());
        for (i, part) in raw.iter().enumerate() {
            if *part == "*" {
                if i != raw.len() - 1 {
                    return Err(StateError::InvalidRoute(format!(
                        "'{pattern}': '*' must be the last segment"
                    )));
                }
                segments.push(Segment::Wildcard);
            } else if part.contains('*') {
                return Err(StateError::InvalidRoute(format!(
                    "'{pattern}': '*' must be a whole segment"
                )));
            } else if let Some(name) = part.strip_prefix(':') {
                if name.is_empty() {
                    return Err(StateError::InvalidRoute(format!(
                        "'{pattern}': parameter without a name"
                    )));
                }
                segments.push(Segment::Param(name.to_string()));
            } else {
                segments.push(Segment::Literal((*part).to_string()));
            }
        }

        Ok(Self {
            pattern: pattern.to_string(),
            worker: worker.into(),
            segments,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    fn has_wildcard(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::Wildcard))
    }

    /// Structural match against a concrete path.
    fn matches(&self, path: &str) -> Option<BTreeMap<String, String>> {
        if self.has_wildcard() {
            // Everything before the `*` is compared as a plain string prefix.
            let prefix = &self.pattern[..self.pattern.len() - 1];
            let rest = path.strip_prefix(prefix)?;
            let mut params = BTreeMap::new();
            params.insert("*".to_string(), rest.to_string());
            return Some(params);
        }

        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = BTreeMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) if lit == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
                Segment::Wildcard => return None,
            }
        }
        Some(params)
    }
}

/// Result of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub pattern: String,
    pub worker: String,
    pub params: BTreeMap<String, String>,
}

/// Resolve `path` against `routes` in table order.
pub fn resolve_in(routes: &[Route], path: &str) -> Option<RouteMatch> {
    if let Some(route) = routes
        .iter()
        .find(|r| r.is_literal() && r.pattern == path)
    {
        return Some(RouteMatch {
            pattern: route.pattern.clone(),
            worker: route.worker.clone(),
            params: BTreeMap::new(),
        });
    }

    routes
        .iter()
        .filter(|r| !r.is_literal())
        .find_map(|route| {
            route.matches(path).map(|params| RouteMatch {
                pattern: route.pattern.clone(),
                worker: route.worker.clone(),
                params,
            })
        })
}

/// Concurrently readable, ordered route table.
pub struct RouteTable {
    routes: RwLock<Vec<Route>>,
    file: Option<PathBuf>,
}

impl RouteTable {
    /// Create an empty in-memory table.
    pub fn in_memory() -> Self {
        Self {
            routes: RwLock::new(Vec::new()),
            file: None,
        }
    }

    /// Open a table persisted at `data_dir/routes.json`, loading any snapshot.
    pub async fn open(data_dir: &Path) -> StateResult<Self> {
        let file = data_dir.join("routes.json");
        let mut routes = Vec::new();
        if let Some(snapshot) = persist::load::<Map<String, Value>>(&file).await? {
            for (pattern, worker) in snapshot {
                let worker = worker.as_str().unwrap_or_default().to_string();
                routes.push(Route::parse(&pattern, worker)?);
            }
            info!(routes = routes.len(), "route table loaded");
        }

        Ok(Self {
            routes: RwLock::new(routes),
            file: Some(file),
        })
    }

    /// Resolve a concrete path.
    pub async fn resolve(&self, path: &str) -> Option<RouteMatch> {
        let routes = self.routes.read().await;
        resolve_in(&routes, path)
    }

    /// Insert a route, or retarget an existing pattern in place.
    pub async fn upsert(&self, pattern: &str, worker: &str) -> StateResult<()> {
        let route = Route::parse(pattern, worker)?;
        let mut routes = self.routes.write().await;

        let previous = match routes.iter().position(|r| r.pattern == pattern) {
            Some(idx) => Some((idx, std::mem::replace(&mut routes[idx], route))),
            None => {
                routes.push(route);
                None
            }
        };

        if let Err(e) = self.flush(&routes).await {
            match previous {
                Some((idx, old)) => routes[idx] = old,
                None => {
                    routes.pop();
                }
            }
            return Err(e);
        }

        debug!(pattern, worker, "route upserted");
        Ok(())
    }

    /// Remove a route. Returns `true` if it existed.
    pub async fn remove(&self, pattern: &str) -> StateResult<bool> {
        let mut routes = self.routes.write().await;
        let Some(idx) = routes.iter().position(|r| r.pattern == pattern) else {
            return Ok(false);
        };

        let old = routes.remove(idx);
        if let Err(e) = self.flush(&routes).await {
            routes.insert(idx, old);
            return Err(e);
        }

        debug!(pattern, "route removed");
        Ok(true)
    }

    /// `{pattern: worker}` in table order.
    pub async fn list(&self) -> Map<String, Value> {
        let routes = self.routes.read().await;
        to_map(&routes)
    }

    pub async fn len(&self) -> usize {
        self.routes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.routes.read().await.is_empty()
    }

    async fn flush(&self, routes: &[Route]) -> StateResult<()> {
        match &self.file {
            Some(path) => persist::save(path, &to_map(routes)).await,
            None => Ok(()),
        }
    }
}

fn to_map(routes: &[Route]) -> Map<String, Value> {
    routes
        .iter()
        .map(|r| (r.pattern.clone(), Value::String(r.worker.clone())))
        .collect()
}
