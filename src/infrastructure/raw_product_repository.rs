//! Repository for the raw staging table
//!
//! Owns every write to `raw_products`: idempotent observation upserts on
//! the ingestion side, compare-and-set status transitions on the
//! normalization side, and the tombstone sweep. The upsert decision
//! itself is [`classify_upsert`]; this module wraps it in one
//! transaction per record id.

use crate::domain::ingest::{
    RawRecord, RecordDraft, StoredSnapshot, UpsertAction, UpsertOutcome, classify_upsert,
};
use crate::domain::ProcessingStatus;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::sync::Arc;

/// Status breakdown of the staging table, for the status report.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct StoreStatistics {
    pub total: i64,
    pub pending: i64,
    pub normalized: i64,
    pub embedded: i64,
    pub error: i64,
    pub tombstoned: i64,
}

#[derive(Clone)]
pub struct RawProductRepository {
    pool: Arc<SqlitePool>,
}

impl RawProductRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    // ===============================
    // INGESTION SIDE
    // ===============================

    /// Records one observation of an upstream entity.
    ///
    /// Runs as a read-classify-write transaction keyed on the record id,
    /// so concurrent upserts of independent ids interleave freely while a
    /// single id is settled atomically. Calling this any number of times
    /// with the same observation converges on the same row.
    pub async fn upsert(
        &self,
        draft: &RecordDraft,
        fetched_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            r#"
            SELECT source_updated_at, is_deleted, payload_hash, last_seen_at
            FROM raw_products WHERE id = ?
            "#,
        )
        .bind(draft.id)
        .fetch_optional(&mut *tx)
        .await?;

        let parts: Option<(StoredSnapshot, DateTime<Utc>)> = existing.map(|row| {
            (
                StoredSnapshot {
                    source_updated_at: row.get("source_updated_at"),
                    is_deleted: row.get("is_deleted"),
                    payload_hash: row.get("payload_hash"),
                },
                row.get("last_seen_at"),
            )
        });

        // last_seen_at never decreases, even when runs land out of order
        let last_seen_at = parts
            .as_ref()
            .map_or(fetched_at, |(_, seen)| (*seen).max(fetched_at));

        let outcome = match classify_upsert(parts.as_ref().map(|(s, _)| s), draft) {
            UpsertAction::Insert => {
                let payload_text = serde_json::to_string(&draft.payload)?;
                sqlx::query(
                    r#"
                    INSERT INTO raw_products
                    (id, payload, payload_hash, source_updated_at, created_at, last_seen_at,
                     is_deleted, processing_status)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(draft.id)
                .bind(&payload_text)
                .bind(&draft.payload_hash)
                .bind(draft.source_updated_at)
                .bind(fetched_at)
                .bind(fetched_at)
                .bind(draft.is_deleted)
                .bind(ProcessingStatus::Pending)
                .execute(&mut *tx)
                .await?;
                UpsertOutcome::Inserted
            }
            UpsertAction::Update { reset_status } => {
                let payload_text = serde_json::to_string(&draft.payload)?;
                sqlx::query(
                    r#"
                    UPDATE raw_products
                    SET payload = ?, payload_hash = ?, source_updated_at = ?, is_deleted = ?,
                        last_seen_at = ?,
                        processing_status = CASE WHEN ? THEN 'pending' ELSE processing_status END,
                        processing_error = CASE WHEN ? THEN NULL ELSE processing_error END,
                        processed_at = CASE WHEN ? THEN NULL ELSE processed_at END
                    WHERE id = ?
                    "#,
                )
                .bind(&payload_text)
                .bind(&draft.payload_hash)
                .bind(draft.source_updated_at)
                .bind(draft.is_deleted)
                .bind(last_seen_at)
                .bind(reset_status)
                .bind(reset_status)
                .bind(reset_status)
                .bind(draft.id)
                .execute(&mut *tx)
                .await?;
                UpsertOutcome::Updated
            }
            UpsertAction::Touch => {
                sqlx::query("UPDATE raw_products SET last_seen_at = ? WHERE id = ?")
                    .bind(last_seen_at)
                    .bind(draft.id)
                    .execute(&mut *tx)
                    .await?;
                UpsertOutcome::Unchanged
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    /// Tombstones every live row an active run has not observed.
    ///
    /// `run_started_at` is the cutoff: anything the run touched carries a
    /// `last_seen_at` at or past it. Processing state is left alone so a
    /// tombstoned record keeps its normalization history. Returns the
    /// number of rows flipped.
    pub async fn sweep_unseen(&self, run_started_at: DateTime<Utc>) -> Result<u64> {
        let result =
            sqlx::query("UPDATE raw_products SET is_deleted = 1 WHERE is_deleted = 0 AND last_seen_at < ?")
                .bind(run_started_at)
                .execute(&*self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    // ===============================
    // NORMALIZATION SIDE
    // ===============================

    /// Pending records in stable id order, up to `limit`.
    pub async fn fetch_pending(&self, limit: u32) -> Result<Vec<RawRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, payload, payload_hash, source_updated_at, created_at, last_seen_at,
                   is_deleted, processing_status, processing_error, processed_at
            FROM raw_products
            WHERE processing_status = 'pending'
            ORDER BY id ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        rows.iter().map(map_raw_record).collect()
    }

    /// Marks a record normalized, but only if it is still pending.
    ///
    /// The status guard makes the transition compare-and-set: a record
    /// claimed by a concurrent batch (or reset by a fresh upsert) is left
    /// alone and `false` comes back.
    pub async fn mark_normalized(&self, id: i64, processed_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE raw_products
            SET processing_status = 'normalized', processing_error = NULL, processed_at = ?
            WHERE id = ? AND processing_status = 'pending'
            "#,
        )
        .bind(processed_at)
        .bind(id)
        .execute(&*self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Marks a record failed with the transform error, same CAS guard as
    /// [`Self::mark_normalized`]. Errors are terminal until requeued.
    pub async fn mark_error(
        &self,
        id: i64,
        message: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE raw_products
            SET processing_status = 'error', processing_error = ?, processed_at = ?
            WHERE id = ? AND processing_status = 'pending'
            "#,
        )
        .bind(message)
        .bind(processed_at)
        .bind(id)
        .execute(&*self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Operator action: puts every errored record back in the queue.
    pub async fn requeue_errors(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE raw_products
            SET processing_status = 'pending', processing_error = NULL, processed_at = NULL
            WHERE processing_status = 'error'
            "#,
        )
        .execute(&*self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ===============================
    // LOOKUPS
    // ===============================

    pub async fn get(&self, id: i64) -> Result<Option<RawRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, payload, payload_hash, source_updated_at, created_at, last_seen_at,
                   is_deleted, processing_status, processing_error, processed_at
            FROM raw_products WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        row.as_ref().map(map_raw_record).transpose()
    }

    pub async fn statistics(&self) -> Result<StoreStatistics> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as total,
                   COALESCE(SUM(CASE WHEN processing_status = 'pending' THEN 1 ELSE 0 END), 0) as pending,
                   COALESCE(SUM(CASE WHEN processing_status = 'normalized' THEN 1 ELSE 0 END), 0) as normalized,
                   COALESCE(SUM(CASE WHEN processing_status = 'embedded' THEN 1 ELSE 0 END), 0) as embedded,
                   COALESCE(SUM(CASE WHEN processing_status = 'error' THEN 1 ELSE 0 END), 0) as error,
                   COALESCE(SUM(CASE WHEN is_deleted = 1 THEN 1 ELSE 0 END), 0) as tombstoned
            FROM raw_products
            "#,
        )
        .fetch_one(&*self.pool)
        .await?;

        Ok(StoreStatistics {
            total: row.get("total"),
            pending: row.get("pending"),
            normalized: row.get("normalized"),
            embedded: row.get("embedded"),
            error: row.get("error"),
            tombstoned: row.get("tombstoned"),
        })
    }
}

fn map_raw_record(row: &SqliteRow) -> Result<RawRecord> {
    let id: i64 = row.get("id");
    let payload_text: String = row.get("payload");
    let payload = serde_json::from_str(&payload_text)
        .with_context(|| format!("stored payload for record {id} is not valid JSON"))?;

    Ok(RawRecord {
        id,
        payload,
        payload_hash: row.get("payload_hash"),
        source_updated_at: row.get("source_updated_at"),
        created_at: row.get("created_at"),
        last_seen_at: row.get("last_seen_at"),
        is_deleted: row.get("is_deleted"),
        processing_status: row.get("processing_status"),
        processing_error: row.get("processing_error"),
        processed_at: row.get("processed_at"),
    })
}
