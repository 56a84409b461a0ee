//! Task progress database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Processing window of one module within one task.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TaskProgressDbModel {
    pub task_id: String,
    pub module: String,
    pub target: String,
    pub unit_count: i64,
    /// ISO 8601 timestamp of the first item
    pub started_at: String,
    /// ISO 8601 timestamp once the module drained, NULL while running
    pub ended_at: Option<String>,
}

impl TaskProgressDbModel {
    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }
}
