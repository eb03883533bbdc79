//! Normalization stage
//!
//! Pulls pending raw records in bounded batches and hands each one to the
//! configured normalizer. Completely decoupled from ingestion: it only
//! looks at `processing_status`, so it can run while an ingestion session
//! is in flight or long after.
//!
//! One record's failure never stops the batch; the record is parked in
//! `error` with its message and the batch moves on. Status transitions go
//! through the repository's compare-and-set marks, so concurrent workers
//! hitting the same pending slice do not double-count.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::domain::batch::BatchType;
use crate::domain::ingest::RawRecord;
use crate::domain::services::RecordNormalizer;
use crate::infrastructure::batch_repository::ProcessingBatchRepository;
use crate::infrastructure::raw_product_repository::RawProductRepository;

enum RecordFate {
    Normalized,
    Failed,
    /// Another worker won the compare-and-set on this record.
    AlreadyClaimed,
}

pub struct NormalizationStage {
    raw_products: Arc<RawProductRepository>,
    batches: Arc<ProcessingBatchRepository>,
    normalizer: Arc<dyn RecordNormalizer>,
}

impl NormalizationStage {
    pub fn new(
        raw_products: Arc<RawProductRepository>,
        batches: Arc<ProcessingBatchRepository>,
        normalizer: Arc<dyn RecordNormalizer>,
    ) -> Self {
        Self {
            raw_products,
            batches,
            normalizer,
        }
    }

    /// Claims up to `batch_size` pending records and normalizes them,
    /// recording the pass as a processing batch. Returns the number of
    /// records this call disposed of (normalized or errored); an empty
    /// pending set opens no batch and returns 0.
    pub async fn normalize_batch(&self, batch_size: u32) -> Result<u64> {
        let pending = self.raw_products.fetch_pending(batch_size).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let batch = self
            .batches
            .open(BatchType::Normalization, pending.len() as u32)
            .await?;
        let mut processed: u32 = 0;
        let mut failed: u32 = 0;

        for record in &pending {
            match self.process_record(record).await {
                Ok(RecordFate::Normalized) => processed += 1,
                Ok(RecordFate::Failed) => failed += 1,
                Ok(RecordFate::AlreadyClaimed) => {}
                Err(e) => {
                    // Storage trouble, not a bad record. Close the books
                    // on this batch before bailing out.
                    self.batches
                        .fail(&batch.id, processed, failed, &format!("{e:#}"))
                        .await?;
                    return Err(e);
                }
            }
        }

        self.batches.close(&batch.id, processed, failed).await?;
        info!(
            batch_id = %batch.id,
            processed,
            failed,
            "📦 Normalization batch closed"
        );
        Ok(u64::from(processed) + u64::from(failed))
    }

    /// Runs batches until the pending backlog is empty.
    pub async fn drain(&self, batch_size: u32) -> Result<u64> {
        let mut total: u64 = 0;
        loop {
            let handled = self.normalize_batch(batch_size).await?;
            if handled == 0 {
                break;
            }
            total += handled;
        }
        info!(total, "🎉 Normalization backlog drained");
        Ok(total)
    }

    async fn process_record(&self, record: &RawRecord) -> Result<RecordFate> {
        match self.normalizer.normalize(record).await {
            Ok(()) => {
                if self
                    .raw_products
                    .mark_normalized(record.id, Utc::now())
                    .await?
                {
                    Ok(RecordFate::Normalized)
                } else {
                    debug!(record_id = record.id, "Record already claimed by another worker");
                    Ok(RecordFate::AlreadyClaimed)
                }
            }
            Err(e) => {
                warn!(record_id = record.id, error = %e, "Normalization failed for record");
                if self
                    .raw_products
                    .mark_error(record.id, &e.to_string(), Utc::now())
                    .await?
                {
                    Ok(RecordFate::Failed)
                } else {
                    debug!(record_id = record.id, "Record already claimed by another worker");
                    Ok(RecordFate::AlreadyClaimed)
                }
            }
        }
    }
}
