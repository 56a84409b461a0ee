//! Scan result database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::Result;
use crate::domain::PipelineItem;
use crate::pipeline::ResultRecord;

/// One accepted result.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ScanResultDbModel {
    pub id: String,
    pub task_id: String,
    pub module: String,
    /// Item kind: target, subdomain, asset
    pub kind: String,
    pub dedup_key: String,
    pub host: String,
    /// JSON encoding of the [`PipelineItem`]
    pub payload: String,
    /// ISO 8601 timestamp when the result was accepted
    pub created_at: String,
}

impl ScanResultDbModel {
    pub fn from_record(record: &ResultRecord) -> Result<Self> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: record.task_id.clone(),
            module: record.module.to_string(),
            kind: record.item.kind().to_string(),
            dedup_key: record.dedup_key.clone(),
            host: record.item.host().to_string(),
            payload: serde_json::to_string(&record.item)?,
            created_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    pub fn item(&self) -> Result<PipelineItem> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}
