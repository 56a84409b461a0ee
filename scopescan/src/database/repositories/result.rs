//! Scan result repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::ScanResultDbModel;
use crate::pipeline::{HistoryStore, ResultRecord, ResultSink};

/// Scan result repository trait.
#[async_trait]
pub trait ResultRepository: Send + Sync {
    /// Insert a result. Returns `false` if the task's module already holds its key.
    async fn insert_result(&self, result: &ScanResultDbModel) -> Result<bool>;
    async fn list_results_for_task(&self, task_id: &str) -> Result<Vec<ScanResultDbModel>>;
    async fn count_results_for_task(&self, task_id: &str) -> Result<i64>;
    /// Whether any task ever recorded `dedup_key`.
    async fn key_exists(&self, dedup_key: &str) -> Result<bool>;
    async fn delete_results_for_task(&self, task_id: &str) -> Result<u64>;
}

/// SQLx implementation of ResultRepository.
///
/// Also serves as the pipeline's result sink and cross-task history store.
pub struct SqlxResultRepository {
    pool: SqlitePool,
}

impl SqlxResultRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultRepository for SqlxResultRepository {
    async fn insert_result(&self, result: &ScanResultDbModel) -> Result<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO scan_result
                (id, task_id, module, kind, dedup_key, host, payload, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&result.id)
        .bind(&result.task_id)
        .bind(&result.module)
        .bind(&result.kind)
        .bind(&result.dedup_key)
        .bind(&result.host)
        .bind(&result.payload)
        .bind(&result.created_at)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted > 0)
    }

    async fn list_results_for_task(&self, task_id: &str) -> Result<Vec<ScanResultDbModel>> {
        let results = sqlx::query_as::<_, ScanResultDbModel>(
            "SELECT * FROM scan_result WHERE task_id = ? ORDER BY created_at, id",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(results)
    }

    async fn count_results_for_task(&self, task_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM scan_result WHERE task_id = ?")
            .bind(task_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn key_exists(&self, dedup_key: &str) -> Result<bool> {
        let found: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM scan_result WHERE dedup_key = ? LIMIT 1")
                .bind(dedup_key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn delete_results_for_task(&self, task_id: &str) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM scan_result WHERE task_id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted)
    }
}

#[async_trait]
impl ResultSink for SqlxResultRepository {
    async fn persist(&self, record: &ResultRecord) -> Result<()> {
        let model = ScanResultDbModel::from_record(record)?;
        if !self.insert_result(&model).await? {
            tracing::debug!(task_id = %record.task_id, key = %record.dedup_key, "Result already stored");
        }
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for SqlxResultRepository {
    async fn exists(&self, key: &str) -> Result<bool> {
        self.key_exists(key).await
    }
}
