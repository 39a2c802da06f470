//! Projects, plans and quota accounting.
//!
//! Projects are held in a `DashMap` keyed by token. Every mutation of a
//! project (daily counter, owned workers) happens while holding that entry's
//! exclusive guard, so concurrent admissions can never push a counter past
//! its plan ceiling. Worker names are claimed through a second map from name
//! to owner token; a claim is taken under that name's entry guard, so two
//! projects can never both own a name.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use mini_edge_common::{PlanConfig, QuotaConfig};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{QuotaLimit, StateError, StateResult};
use crate::kv::KvLimits;
use crate::{now_millis, persist, utc_day};

/// Daily request usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// UTC day (`YYYY-MM-DD`) the counter belongs to.
    pub day: String,
    pub count: u64,
}

/// A tenant, identified by its bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub token: String,
    pub plan: String,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub workers: BTreeSet<String>,
    #[serde(default)]
    pub created_at: i64,
}

/// Per-project plan enforcement.
pub struct QuotaEnforcer {
    projects: DashMap<String, Project>,
    owners: DashMap<String, String>,
    config: QuotaConfig,
    file: Option<PathBuf>,
    persist_lock: Mutex<()>,
}

impl QuotaEnforcer {
    /// Create an in-memory enforcer.
    pub fn in_memory(config: QuotaConfig) -> Self {
        Self {
            projects: DashMap::new(),
            owners: DashMap::new(),
            config,
            file: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// Open an enforcer persisted at `data_dir/projects.json`.
    pub async fn open(config: QuotaConfig, data_dir: &Path) -> StateResult<Self> {
        let file = data_dir.join("projects.json");
        let projects = DashMap::new();
        let owners = DashMap::new();
        if let Some(snapshot) = persist::load::<Vec<Project>>(&file).await? {
            info!(projects = snapshot.len(), "projects loaded");
            for project in snapshot {
                for worker in &project.workers {
                    owners.insert(worker.clone(), project.token.clone());
                }
                projects.insert(project.token.clone(), project);
            }
        }

        Ok(Self {
            projects,
            owners,
            config,
            file: Some(file),
            persist_lock: Mutex::new(()),
        })
    }

    /// Create a project with a fresh random token.
    pub async fn signup(&self, plan: Option<&str>) -> StateResult<Project> {
        let token = format!("me_{}", uuid::Uuid::new_v4().simple());
        self.create(token, plan).await
    }

    /// Create a project with a known token, or return the existing one.
    pub async fn ensure_project(&self, token: &str, plan: Option<&str>) -> StateResult<Project> {
        if let Some(existing) = self.projects.get(token) {
            return Ok(existing.clone());
        }
        self.create(token.to_string(), plan).await
    }

    async fn create(&self, token: String, plan: Option<&str>) -> StateResult<Project> {
        let plan = plan.unwrap_or(&self.config.default_plan);
        if self.config.plan(plan).is_none() {
            return Err(StateError::UnknownPlan(plan.to_string()));
        }

        let project = Project {
            token: token.clone(),
            plan: plan.to_string(),
            usage: Usage::default(),
            workers: BTreeSet::new(),
            created_at: now_millis(),
        };
        self.projects
            .entry(token)
            .or_insert_with(|| project.clone());
        self.flush().await?;

        info!(plan = %project.plan, "project created");
        Ok(project)
    }

    /// Look up a project by token.
    pub fn authenticate(&self, token: &str) -> StateResult<Project> {
        self.projects
            .get(token)
            .map(|p| p.clone())
            .ok_or(StateError::Unauthorized)
    }

    /// Plan limits of a project.
    pub fn plan_of(&self, token: &str) -> StateResult<PlanConfig> {
        let plan = self
            .projects
            .get(token)
            .map(|p| p.plan.clone())
            .ok_or(StateError::Unauthorized)?;
        self.config
            .plan(&plan)
            .cloned()
            .ok_or(StateError::UnknownPlan(plan))
    }

    /// KV ceilings of a project.
    pub fn kv_limits(&self, token: &str) -> StateResult<KvLimits> {
        self.plan_of(token).map(|plan| KvLimits::from(&plan))
    }

    /// Usage as of today; a stale day reads as zero.
    pub fn usage(&self, token: &str) -> StateResult<Usage> {
        let today = utc_day();
        let project = self.projects.get(token).ok_or(StateError::Unauthorized)?;
        if project.usage.day == today {
            Ok(project.usage.clone())
        } else {
            Ok(Usage {
                day: today,
                count: 0,
            })
        }
    }

    /// Admit one request for today.
    pub fn admit(&self, token: &str) -> StateResult<()> {
        self.admit_on(token, &utc_day())
    }

    /// Admit one request on `day`.
    ///
    /// The counter resets the first time a new day is seen, then increments
    /// on every admitted call until it reaches the plan ceiling.
    pub fn admit_on(&self, token: &str, day: &str) -> StateResult<()> {
        let mut project = self
            .projects
            .get_mut(token)
            .ok_or(StateError::Unauthorized)?;

        let limit = self
            .config
            .plan(&project.plan)
            .map_or(0, |p| p.requests_per_day);

        if project.usage.day != day {
            project.usage = Usage {
                day: day.to_string(),
                count: 0,
            };
        }

        if project.usage.count >= limit {
            debug!(plan = %project.plan, limit, "daily request quota exhausted");
            return Err(StateError::quota(
                QuotaLimit::RequestsPerDay,
                format!("Daily request limit reached ({limit} requests/day)"),
            ));
        }

        project.usage.count += 1;
        Ok(())
    }

    /// The project that owns `worker`, if any.
    pub fn owner_of(&self, worker: &str) -> Option<String> {
        self.owners.get(worker).map(|owner| owner.clone())
    }

    /// Admit deploying `worker` for the project.
    ///
    /// Redeploying an owned name always passes. A name owned by another
    /// project is forbidden. A new name is refused once the project owns as
    /// many workers as its plan allows, and recorded otherwise.
    pub async fn admit_deploy(&self, token: &str, worker: &str) -> StateResult<()> {
        // Lock order: owner claim, then project.
        match self.owners.entry(worker.to_string()) {
            Entry::Occupied(claim) if claim.get() != token => {
                return Err(StateError::Forbidden(format!(
                    "Worker '{worker}' belongs to another project"
                )));
            }
            Entry::Occupied(_) => return Ok(()),
            Entry::Vacant(claim) => {
                let mut project = self
                    .projects
                    .get_mut(token)
                    .ok_or(StateError::Unauthorized)?;

                let limit = self
                    .config
                    .plan(&project.plan)
                    .map_or(0, |p| p.max_workers);
                if project.workers.len() >= limit {
                    return Err(StateError::quota(
                        QuotaLimit::Workers,
                        format!("Worker limit reached ({limit} workers)"),
                    ));
                }
                project.workers.insert(worker.to_string());
                claim.insert(token.to_string());
            }
        }

        if let Err(e) = self.flush().await {
            self.release_worker(token, worker);
            return Err(e);
        }
        Ok(())
    }

    /// Forget that the project owns `worker`.
    pub fn release_worker(&self, token: &str, worker: &str) {
        if let Some(mut project) = self.projects.get_mut(token) {
            project.workers.remove(worker);
        }
        self.owners.remove_if(worker, |_, owner| owner == token);
    }

    /// Number of known projects.
    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    /// Write the projects snapshot.
    ///
    /// Request counters are included, so callers may flush periodically; a
    /// failed flush only logs.
    pub async fn flush(&self) -> StateResult<()> {
        let Some(path) = &self.file else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().await;
        let snapshot: BTreeMap<String, Project> = self
            .projects
            .iter()
            .map(|p| (p.key().clone(), p.value().clone()))
            .collect();
        let list: Vec<&Project> = snapshot.values().collect();
        persist::save(path, &list).await.inspect_err(|e| {
            warn!(error = %e, "failed to write projects snapshot");
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn config(requests: u64, workers: usize) -> QuotaConfig {
        let mut config = QuotaConfig::default();
        config.plans.insert(
            "tiny".to_string(),
            PlanConfig {
                requests_per_day: requests,
                max_workers: workers,
                kv_max_keys: 2,
                kv_max_value_bytes: 32,
            },
        );
        config.default_plan = "tiny".to_string();
        config
    }

    #[tokio::test]
    async fn test_signup_and_authenticate() {
        let quota = QuotaEnforcer::in_memory(QuotaConfig::default());
        let project = quota.signup(None).await.unwrap();

        assert!(project.token.starts_with("me_"));
        assert_eq!(project.plan, "free");
        assert_eq!(quota.authenticate(&project.token).unwrap().plan, "free");
        assert!(matches!(
            quota.authenticate("nope"),
            Err(StateError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_unknown_plan_rejected() {
        let quota = QuotaEnforcer::in_memory(QuotaConfig::default());
        assert!(matches!(
            quota.signup(Some("platinum")).await,
            Err(StateError::UnknownPlan(_))
        ));
    }

    #[tokio::test]
    async fn test_daily_limit_and_rollover() {
        let quota = QuotaEnforcer::in_memory(config(2, 1));
        quota.ensure_project("tok", None).await.unwrap();

        assert!(quota.admit_on("tok", "2024-01-01").is_ok());
        assert!(quota.admit_on("tok", "2024-01-01").is_ok());
        let err = quota.admit_on("tok", "2024-01-01").unwrap_err();
        assert!(matches!(
            err,
            StateError::QuotaExceeded {
                limit: QuotaLimit::RequestsPerDay,
                ..
            }
        ));

        // Next day resets the counter.
        assert!(quota.admit_on("tok", "2024-01-02").is_ok());
    }

    #[test]
    fn test_admit_unknown_token() {
        let quota = QuotaEnforcer::in_memory(QuotaConfig::default());
        assert!(matches!(quota.admit("ghost"), Err(StateError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_concurrent_admit_never_exceeds_plan() {
        let quota = Arc::new(QuotaEnforcer::in_memory(config(50, 1)));
        quota.ensure_project("tok", None).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..200 {
            let quota = Arc::clone(&quota);
            handles.push(tokio::spawn(async move {
                quota.admit_on("tok", "2024-06-01").is_ok()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 50);
    }

    #[tokio::test]
    async fn test_worker_ceiling() {
        let quota = QuotaEnforcer::in_memory(config(10, 1));
        quota.ensure_project("tok", None).await.unwrap();

        quota.admit_deploy("tok", "hello").await.unwrap();
        // Redeploy of an owned name is always allowed.
        quota.admit_deploy("tok", "hello").await.unwrap();

        let err = quota.admit_deploy("tok", "second").await.unwrap_err();
        assert!(matches!(
            err,
            StateError::QuotaExceeded {
                limit: QuotaLimit::Workers,
                ..
            }
        ));
        assert_eq!(quota.authenticate("tok").unwrap().workers.len(), 1);
    }

    #[tokio::test]
    async fn test_foreign_worker_forbidden() {
        let quota = QuotaEnforcer::in_memory(config(10, 3));
        quota.ensure_project("a", None).await.unwrap();
        quota.ensure_project("b", None).await.unwrap();

        quota.admit_deploy("a", "shared").await.unwrap();
        assert!(matches!(
            quota.admit_deploy("b", "shared").await,
            Err(StateError::Forbidden(_))
        ));
        assert_eq!(quota.owner_of("shared").as_deref(), Some("a"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_have_one_winner() {
        let quota = Arc::new(QuotaEnforcer::in_memory(config(10, 3)));
        for token in ["a", "b", "c", "d"] {
            quota.ensure_project(token, None).await.unwrap();
        }

        let mut handles = Vec::new();
        for round in 0..25 {
            for token in ["a", "b", "c", "d"] {
                let quota = Arc::clone(&quota);
                let name = format!("contested-{}", round % 3);
                handles.push(tokio::spawn(async move {
                    quota.admit_deploy(token, &name).await.is_ok()
                }));
            }
        }
        for handle in handles {
            let _ = handle.await.unwrap();
        }

        for round in 0..3 {
            let name = format!("contested-{round}");
            let owners: Vec<String> = ["a", "b", "c", "d"]
                .into_iter()
                .filter(|t| quota.authenticate(t).unwrap().workers.contains(&name))
                .map(str::to_string)
                .collect();
            assert_eq!(owners.len(), 1, "{name} owned by {owners:?}");
            assert_eq!(quota.owner_of(&name), owners.first().cloned());
        }
    }

    #[tokio::test]
    async fn test_release_frees_the_name() {
        let quota = QuotaEnforcer::in_memory(config(10, 3));
        quota.ensure_project("a", None).await.unwrap();
        quota.ensure_project("b", None).await.unwrap();

        quota.admit_deploy("a", "shared").await.unwrap();
        quota.release_worker("a", "shared");
        assert!(quota.owner_of("shared").is_none());

        quota.admit_deploy("b", "shared").await.unwrap();
        assert_eq!(quota.owner_of("shared").as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_kv_limits_follow_plan() {
        let quota = QuotaEnforcer::in_memory(config(10, 1));
        quota.ensure_project("tok", None).await.unwrap();

        let limits = quota.kv_limits("tok").unwrap();
        assert_eq!(limits.max_keys, 2);
        assert_eq!(limits.max_value_bytes, 32);
    }

    #[tokio::test]
    async fn test_usage_reads_zero_for_stale_day() {
        let quota = QuotaEnforcer::in_memory(config(10, 1));
        quota.ensure_project("tok", None).await.unwrap();
        quota.admit_on("tok", "2000-01-01").unwrap();

        let usage = quota.usage("tok").unwrap();
        assert_eq!(usage.count, 0);
        assert_eq!(usage.day, utc_day());

        quota.admit("tok").unwrap();
        assert_eq!(quota.usage("tok").unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_projects_persist() {
        let dir = tempfile::tempdir().unwrap();

        let quota = QuotaEnforcer::open(QuotaConfig::default(), dir.path())
            .await
            .unwrap();
        let project = quota.signup(Some("pro")).await.unwrap();
        quota.admit_deploy(&project.token, "hello").await.unwrap();
        drop(quota);

        let reopened = QuotaEnforcer::open(QuotaConfig::default(), dir.path())
            .await
            .unwrap();
        let loaded = reopened.authenticate(&project.token).unwrap();
        assert_eq!(loaded.plan, "pro");
        assert!(loaded.workers.contains("hello"));
    }
}
