//! Task progress repository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::warn;

use crate::Result;
use crate::database::models::TaskProgressDbModel;
use crate::domain::ModuleKind;
use crate::pipeline::ProgressTracker;

/// Task progress repository trait.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    async fn mark_started(
        &self,
        task_id: &str,
        module: &str,
        target: &str,
        unit_count: i64,
    ) -> Result<()>;
    async fn mark_ended(&self, task_id: &str, module: &str) -> Result<()>;
    async fn list_progress(&self, task_id: &str) -> Result<Vec<TaskProgressDbModel>>;
}

/// SQLx implementation of ProgressRepository.
pub struct SqlxProgressRepository {
    pool: SqlitePool,
}

impl SqlxProgressRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProgressRepository for SqlxProgressRepository {
    async fn mark_started(
        &self,
        task_id: &str,
        module: &str,
        target: &str,
        unit_count: i64,
    ) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO task_progress (task_id, module, target, unit_count, started_at, ended_at)
            VALUES (?, ?, ?, ?, ?, NULL)
            ON CONFLICT(task_id, module) DO UPDATE SET
                target = excluded.target,
                unit_count = excluded.unit_count,
                started_at = excluded.started_at,
                ended_at = NULL
            "#,
        )
        .bind(task_id)
        .bind(module)
        .bind(target)
        .bind(unit_count)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_ended(&self, task_id: &str, module: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query("UPDATE task_progress SET ended_at = ? WHERE task_id = ? AND module = ?")
            .bind(&now)
            .bind(task_id)
            .bind(module)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_progress(&self, task_id: &str) -> Result<Vec<TaskProgressDbModel>> {
        let rows = sqlx::query_as::<_, TaskProgressDbModel>(
            "SELECT * FROM task_progress WHERE task_id = ? ORDER BY started_at",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl ProgressTracker for SqlxProgressRepository {
    async fn start(&self, module: ModuleKind, target: &str, task_id: &str, unit_count: usize) {
        if let Err(e) = self
            .mark_started(task_id, module.as_ref(), target, unit_count as i64)
            .await
        {
            warn!(module = %module, task_id = %task_id, error = %e, "Failed to record module start");
        }
    }

    async fn end(&self, module: ModuleKind, _target: &str, task_id: &str, _unit_count: usize) {
        if let Err(e) = self.mark_ended(task_id, module.as_ref()).await {
            warn!(module = %module, task_id = %task_id, error = %e, "Failed to record module end");
        }
    }
}
