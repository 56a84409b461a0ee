use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::domain::ModuleKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressPhase {
    Start,
    End,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressMark {
    pub phase: ProgressPhase,
    pub module: ModuleKind,
    pub target: String,
    pub task_id: String,
    pub unit_count: usize,
    pub at: DateTime<Utc>,
}

impl ProgressMark {
    pub fn new(
        phase: ProgressPhase,
        module: ModuleKind,
        target: &str,
        task_id: &str,
        unit_count: usize,
    ) -> Self {
        Self {
            phase,
            module,
            target: target.to_string(),
            task_id: task_id.to_string(),
            unit_count,
            at: Utc::now(),
        }
    }
}

/// Observability hook for a module's processing window within a task.
///
/// Implementations must swallow their own failures.
#[async_trait]
pub trait ProgressTracker: Send + Sync {
    async fn start(&self, module: ModuleKind, target: &str, task_id: &str, unit_count: usize);
    async fn end(&self, module: ModuleKind, target: &str, task_id: &str, unit_count: usize);
}

/// Writes progress marks to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgressTracker;

#[async_trait]
impl ProgressTracker for LogProgressTracker {
    async fn start(&self, module: ModuleKind, target: &str, task_id: &str, unit_count: usize) {
        info!(module = %module, task_id = %task_id, target = %target, unit_count, "Module processing started");
    }

    async fn end(&self, module: ModuleKind, target: &str, task_id: &str, unit_count: usize) {
        info!(module = %module, task_id = %task_id, target = %target, unit_count, "Module processing ended");
    }
}

/// Forwards progress marks over a channel without ever waiting.
///
/// Marks are dropped when the channel is full or closed.
#[derive(Clone)]
pub struct ChannelProgressTracker {
    tx: mpsc::Sender<ProgressMark>,
}

impl ChannelProgressTracker {
    pub fn new(tx: mpsc::Sender<ProgressMark>) -> Self {
        Self { tx }
    }

    pub fn noop() -> Self {
        let (tx, _rx) = mpsc::channel::<ProgressMark>(1);
        Self::new(tx)
    }

    fn report(&self, mark: ProgressMark) {
        if let Err(e) = self.tx.try_send(mark) {
            debug!(error = %e, "Dropped progress mark");
        }
    }
}

#[async_trait]
impl ProgressTracker for ChannelProgressTracker {
    async fn start(&self, module: ModuleKind, target: &str, task_id: &str, unit_count: usize) {
        self.report(ProgressMark::new(ProgressPhase::Start, module, target, task_id, unit_count));
    }

    async fn end(&self, module: ModuleKind, target: &str, task_id: &str, unit_count: usize) {
        self.report(ProgressMark::new(ProgressPhase::End, module, target, task_id, unit_count));
    }
}
