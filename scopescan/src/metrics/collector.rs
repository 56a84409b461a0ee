//! Metrics collector implementation.
//!
//! Collects counters and gauges for worker pools, plugins and deduplication.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::pipeline::DedupOutcome;

/// Metrics collector for the scan engine.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    // Worker pool metrics, keyed by module
    pool_running: DashMap<String, AtomicU64>,
    pool_waiting: DashMap<String, AtomicU64>,
    submissions_accepted: DashMap<String, AtomicU64>,
    submissions_rejected: DashMap<String, AtomicU64>,

    // Plugin metrics, keyed by plugin name
    plugin_executions: DashMap<String, AtomicU64>,
    plugin_failures: DashMap<String, AtomicU64>,

    // Dedup / result metrics
    results_accepted: AtomicU64,
    duplicates_in_task: AtomicU64,
    duplicates_in_history: AtomicU64,
    persist_failures: AtomicU64,

    // Task metrics
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
}

fn bump(map: &DashMap<String, AtomicU64>, key: &str) {
    if let Some(counter) = map.get(key) {
        counter.fetch_add(1, Ordering::Relaxed);
        return;
    }
    map.entry(key.to_string())
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::Relaxed);
}

fn store(map: &DashMap<String, AtomicU64>, key: &str, value: u64) {
    map.entry(key.to_string())
        .or_insert_with(|| AtomicU64::new(0))
        .store(value, Ordering::Relaxed);
}

fn read(map: &DashMap<String, AtomicU64>) -> HashMap<String, u64> {
    map.iter()
        .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
        .collect()
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Worker Pool Metrics ==========

    /// Record a sampled pool occupancy.
    pub fn set_pool_occupancy(&self, module: &str, running: usize, waiting: usize) {
        store(&self.pool_running, module, running as u64);
        store(&self.pool_waiting, module, waiting as u64);
    }

    pub fn record_submission(&self, module: &str, accepted: bool) {
        if accepted {
            bump(&self.submissions_accepted, module);
        } else {
            bump(&self.submissions_rejected, module);
        }
    }

    pub fn submissions_rejected(&self, module: &str) -> u64 {
        self.submissions_rejected
            .get(module)
            .map(|v| v.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    // ========== Plugin Metrics ==========

    pub fn record_plugin_execution(&self, plugin: &str, succeeded: bool) {
        bump(&self.plugin_executions, plugin);
        if !succeeded {
            bump(&self.plugin_failures, plugin);
        }
    }

    // ========== Dedup Metrics ==========

    pub fn record_dedup(&self, outcome: DedupOutcome) {
        let counter = match outcome {
            DedupOutcome::Novel => &self.results_accepted,
            DedupOutcome::DuplicateInTask => &self.duplicates_in_task,
            DedupOutcome::KnownInHistory => &self.duplicates_in_history,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persist_failure(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn results_accepted(&self) -> u64 {
        self.results_accepted.load(Ordering::Relaxed)
    }

    // ========== Task Metrics ==========

    pub fn record_task_finished(&self, succeeded: bool) {
        if succeeded {
            self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    // ========== Snapshot ==========

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pool_running: read(&self.pool_running),
            pool_waiting: read(&self.pool_waiting),
            submissions_accepted: read(&self.submissions_accepted),
            submissions_rejected: read(&self.submissions_rejected),
            plugin_executions: read(&self.plugin_executions),
            plugin_failures: read(&self.plugin_failures),
            results_accepted: self.results_accepted.load(Ordering::Relaxed),
            duplicates_in_task: self.duplicates_in_task.load(Ordering::Relaxed),
            duplicates_in_history: self.duplicates_in_history.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
        }
    }
}

/// A snapshot of all metrics at a point in time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    // Worker pool metrics
    pub pool_running: HashMap<String, u64>,
    pub pool_waiting: HashMap<String, u64>,
    pub submissions_accepted: HashMap<String, u64>,
    pub submissions_rejected: HashMap<String, u64>,

    // Plugin metrics
    pub plugin_executions: HashMap<String, u64>,
    pub plugin_failures: HashMap<String, u64>,

    // Dedup metrics
    pub results_accepted: u64,
    pub duplicates_in_task: u64,
    pub duplicates_in_history: u64,
    pub persist_failures: u64,

    // Task metrics
    pub tasks_completed: u64,
    pub tasks_failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new();
        let snapshot = collector.snapshot();
        assert_eq!(snapshot.results_accepted, 0);
        assert!(snapshot.pool_running.is_empty());
    }

    #[test]
    fn test_pool_metrics() {
        let collector = MetricsCollector::new();
        collector.set_pool_occupancy("PortScan", 3, 7);
        collector.set_pool_occupancy("PortScan", 2, 0);
        collector.record_submission("PortScan", true);
        collector.record_submission("PortScan", false);
        collector.record_submission("PortScan", false);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.pool_running["PortScan"], 2);
        assert_eq!(snapshot.pool_waiting["PortScan"], 0);
        assert_eq!(snapshot.submissions_accepted["PortScan"], 1);
        assert_eq!(collector.submissions_rejected("PortScan"), 2);
        assert_eq!(collector.submissions_rejected("DirScan"), 0);
    }

    #[test]
    fn test_dedup_and_plugin_metrics() {
        let collector = MetricsCollector::new();
        collector.record_dedup(DedupOutcome::Novel);
        collector.record_dedup(DedupOutcome::DuplicateInTask);
        collector.record_dedup(DedupOutcome::DuplicateInTask);
        collector.record_dedup(DedupOutcome::KnownInHistory);
        collector.record_plugin_execution("subfinder", true);
        collector.record_plugin_execution("subfinder", false);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.results_accepted, 1);
        assert_eq!(snapshot.duplicates_in_task, 2);
        assert_eq!(snapshot.duplicates_in_history, 1);
        assert_eq!(snapshot.plugin_executions["subfinder"], 2);
        assert_eq!(snapshot.plugin_failures["subfinder"], 1);
    }
}
