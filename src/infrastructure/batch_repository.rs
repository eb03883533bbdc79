//! Repository for processing batch audit rows
//!
//! One row per processing pass that claims records, opened `running` and
//! closed into `completed` or `error`. Nothing reads these back for
//! control flow; they exist so an operator can see what the pipeline has
//! been doing.

use crate::domain::batch::{BatchStatus, BatchType, ProcessingBatch};
use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::sync::Arc;

#[derive(Clone)]
pub struct ProcessingBatchRepository {
    pool: Arc<SqlitePool>,
}

impl ProcessingBatchRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Opens a batch row in `running` with the candidate count.
    pub async fn open(&self, batch_type: BatchType, total_records: u32) -> Result<ProcessingBatch> {
        let batch = ProcessingBatch {
            id: uuid::Uuid::new_v4().to_string(),
            batch_type,
            started_at: Utc::now(),
            completed_at: None,
            status: BatchStatus::Running,
            total_records,
            records_processed: 0,
            records_failed: 0,
            error_message: None,
        };

        sqlx::query(
            r#"
            INSERT INTO processing_batches
            (id, batch_type, started_at, completed_at, status, total_records,
             records_processed, records_failed, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&batch.id)
        .bind(batch.batch_type)
        .bind(batch.started_at)
        .bind(batch.completed_at)
        .bind(batch.status)
        .bind(batch.total_records)
        .bind(batch.records_processed)
        .bind(batch.records_failed)
        .bind(&batch.error_message)
        .execute(&*self.pool)
        .await?;

        Ok(batch)
    }

    /// Closes a batch as completed with its final counters.
    pub async fn close(&self, id: &str, records_processed: u32, records_failed: u32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE processing_batches
            SET status = 'completed', completed_at = ?, records_processed = ?, records_failed = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(records_processed)
        .bind(records_failed)
        .bind(id)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    /// Closes a batch as errored, keeping whatever counters were reached.
    pub async fn fail(
        &self,
        id: &str,
        records_processed: u32,
        records_failed: u32,
        error: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE processing_batches
            SET status = 'error', completed_at = ?, records_processed = ?, records_failed = ?,
                error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(records_processed)
        .bind(records_failed)
        .bind(error)
        .bind(id)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    /// Most recent batches first, for the status report.
    pub async fn recent(&self, limit: u32) -> Result<Vec<ProcessingBatch>> {
        let rows = sqlx::query(
            r#"
            SELECT id, batch_type, started_at, completed_at, status, total_records,
                   records_processed, records_failed, error_message
            FROM processing_batches
            ORDER BY started_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows.iter().map(map_batch).collect())
    }
}

fn map_batch(row: &SqliteRow) -> ProcessingBatch {
    ProcessingBatch {
        id: row.get("id"),
        batch_type: row.get("batch_type"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        status: row.get("status"),
        total_records: row.get("total_records"),
        records_processed: row.get("records_processed"),
        records_failed: row.get("records_failed"),
        error_message: row.get("error_message"),
    }
}
