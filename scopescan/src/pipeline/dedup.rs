//! Two-tier result deduplication.
//!
//! Tier 1 is an in-memory set per (task, module) with atomic
//! check-and-insert, so a later module may re-emit an enriched item of the
//! same kind without colliding with the upstream result.
//! Tier 2 asks a durable [`HistoryStore`] whether the key was ever recorded
//! by any task, and is only consulted when the module asks for it. Tiers run
//! cheapest first, so a hot duplicate never reaches storage.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tracing::warn;

use crate::Result;
use crate::domain::ModuleKind;

/// Outcome of a dedup check. Duplicates are ordinary outcomes, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    /// First sighting: persist and forward.
    Novel,
    /// Already accepted earlier in this task.
    DuplicateInTask,
    /// Recorded by some earlier task.
    KnownInHistory,
}

impl DedupOutcome {
    pub fn is_novel(self) -> bool {
        matches!(self, DedupOutcome::Novel)
    }
}

/// Cross-task existence store.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;
}

/// History store that has never seen anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHistory;

#[async_trait]
impl HistoryStore for NoHistory {
    async fn exists(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Tiered dedup cache shared by every link of every running task.
pub struct DeduplicationCache {
    tasks: DashMap<String, Arc<DashSet<(ModuleKind, String)>>>,
    history: Arc<dyn HistoryStore>,
}

impl DeduplicationCache {
    pub fn new(history: Arc<dyn HistoryStore>) -> Self {
        Self {
            tasks: DashMap::new(),
            history,
        }
    }

    /// Cache without a durable tier.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(NoHistory))
    }

    fn task_scope(&self, task_id: &str) -> Arc<DashSet<(ModuleKind, String)>> {
        if let Some(scope) = self.tasks.get(task_id) {
            return scope.clone();
        }
        self.tasks
            .entry(task_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Tier 1: insert `key` into the scope of `module` within the task.
    ///
    /// Returns `true` if the key was not present. Of any number of concurrent
    /// callers with the same key, exactly one sees `true`.
    pub fn insert_in_task(&self, task_id: &str, module: ModuleKind, key: &str) -> bool {
        self.task_scope(task_id).insert((module, key.to_string()))
    }

    pub fn contains(&self, task_id: &str, module: ModuleKind, key: &str) -> bool {
        self.tasks
            .get(task_id)
            .is_some_and(|scope| scope.contains(&(module, key.to_string())))
    }

    /// Run the tiers for one candidate.
    ///
    /// A history lookup failure is logged and the candidate treated as novel.
    pub async fn check(
        &self,
        task_id: &str,
        module: ModuleKind,
        key: &str,
        check_history: bool,
    ) -> DedupOutcome {
        if !self.insert_in_task(task_id, module, key) {
            return DedupOutcome::DuplicateInTask;
        }
        if !check_history {
            return DedupOutcome::Novel;
        }
        match self.history.exists(key).await {
            Ok(true) => DedupOutcome::KnownInHistory,
            Ok(false) => DedupOutcome::Novel,
            Err(e) => {
                warn!(task_id = %task_id, key = %key, error = %e, "History lookup failed, accepting result");
                DedupOutcome::Novel
            }
        }
    }

    /// Drop a finished task's tier-1 entries for every module. Returns how
    /// many were held.
    pub fn release_task(&self, task_id: &str) -> usize {
        self.tasks
            .remove(task_id)
            .map(|(_, scope)| scope.len())
            .unwrap_or(0)
    }

    /// Number of tasks with live tier-1 scopes.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}
