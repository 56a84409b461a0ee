//! Result persistence.

use async_trait::async_trait;
use parking_lot::Mutex;

use super::dedup::HistoryStore;
use crate::Result;
use crate::domain::{ModuleKind, PipelineItem};

/// An accepted result as handed to a [`ResultSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    pub task_id: String,
    pub module: ModuleKind,
    pub dedup_key: String,
    pub item: PipelineItem,
}

impl ResultRecord {
    pub fn new(task_id: impl Into<String>, module: ModuleKind, item: PipelineItem) -> Self {
        Self {
            task_id: task_id.into(),
            module,
            dedup_key: item.dedup_key(),
            item,
        }
    }
}

/// Durable destination for accepted results.
///
/// Called at most once per (task, module, dedup key) by a link's collector.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn persist(&self, record: &ResultRecord) -> Result<()>;
}

/// Sink that keeps everything in memory. Also answers history lookups.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    records: Mutex<Vec<ResultRecord>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ResultRecord> {
        self.records.lock().clone()
    }

    pub fn records_for(&self, task_id: &str) -> Vec<ResultRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl ResultSink for MemoryResultStore {
    async fn persist(&self, record: &ResultRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for MemoryResultStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.records.lock().iter().any(|r| r.dedup_key == key))
    }
}
