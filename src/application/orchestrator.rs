//! Ingestion run orchestration
//!
//! Drives one run end to end: fetch page, stage its records, advance the
//! session cursor, repeat until the advertised page count is exhausted or
//! an empty page ends the collection early. Pages are strictly
//! sequential because each page's outcome decides whether the next one
//! is fetched; only the record upserts inside a page fan out.
//!
//! Failure policy: run-level failures land in the session row (status
//! `error` plus message) and `run` still returns its report, so callers
//! poll session state instead of catching fetch errors. Only storage
//! failures that prevent even that bookkeeping surface as `Err`.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::ingest::{RecordDraft, RecordOutcome, UpsertOutcome};
use crate::domain::pagination::CatalogPage;
use crate::domain::services::{FetchError, PageFetcher};
use crate::infrastructure::config::IngestConfig;
use crate::infrastructure::raw_product_repository::RawProductRepository;
use crate::infrastructure::retry::{RetryPolicy, retry_with_backoff};
use crate::infrastructure::session_repository::SessionRepository;

/// Outcome summary of one ingestion run.
///
/// The session row is the durable record; this is the caller's immediate
/// view of what happened.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunReport {
    pub session_id: String,
    pub pages_fetched: u32,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub swept: u64,
}

pub struct IngestionOrchestrator {
    fetcher: Arc<dyn PageFetcher>,
    raw_products: Arc<RawProductRepository>,
    sessions: Arc<SessionRepository>,
    retry_policy: RetryPolicy,
    db_max_concurrency: usize,
    sweep_after_run: bool,
}

impl IngestionOrchestrator {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        raw_products: Arc<RawProductRepository>,
        sessions: Arc<SessionRepository>,
        retry_policy: RetryPolicy,
        config: &IngestConfig,
    ) -> Self {
        Self {
            fetcher,
            raw_products,
            sessions,
            retry_policy,
            db_max_concurrency: config.db_max_concurrency,
            sweep_after_run: config.sweep_after_run,
        }
    }

    /// Runs one full ingestion pass.
    ///
    /// Page 1 is fetched before any session exists: its pagination block
    /// is the snapshot the session is opened from, so a failure here is
    /// the one run-level failure that surfaces as `Err` instead of a
    /// session in `error`.
    pub async fn run(&self, cancellation: CancellationToken) -> Result<RunReport> {
        let run_started_at = Utc::now();

        let first_page = self
            .fetch_with_retry(1)
            .await
            .context("first page fetch failed before a session could be opened")?;

        let session = self.sessions.start(&first_page.pagination).await?;
        let mut report = RunReport {
            session_id: session.id.clone(),
            ..RunReport::default()
        };
        let total_pages = session.total_pages;

        let mut completed = if total_pages == 0 {
            info!(session_id = %session.id, "Upstream reports an empty collection");
            self.sessions.advance(&session.id, 0, true).await?;
            true
        } else {
            false
        };

        let mut pending_first = Some(first_page);
        let mut page_no: u32 = 1;

        while !completed && page_no <= total_pages {
            if cancellation.is_cancelled() {
                warn!(session_id = %session.id, page = page_no, "🛑 Run cancelled between pages");
                self.sessions.fail(&session.id, "run cancelled between pages").await?;
                return Ok(report);
            }

            // Page 1 was already fetched for the session snapshot
            let page = match pending_first.take() {
                Some(page) => page,
                None => match self.fetch_with_retry(page_no).await {
                    Ok(page) => page,
                    Err(e) => {
                        error!(
                            session_id = %session.id,
                            page = page_no,
                            error = %e,
                            "Page fetch failed after retries; ending run"
                        );
                        self.sessions.fail(&session.id, &e.to_string()).await?;
                        return Ok(report);
                    }
                },
            };
            report.pages_fetched += 1;

            if page.is_empty() {
                // The upstream's totals were stale; an empty page ends the
                // collection regardless of the advertised page count.
                info!(session_id = %session.id, page = page_no, "Empty page ends the collection early");
                self.sessions
                    .advance(&session.id, page_no.saturating_sub(1), true)
                    .await?;
                completed = true;
                continue;
            }

            let observed_at = Utc::now();
            if let Err(e) = self.stage_page(&page.records, observed_at, &mut report).await {
                error!(
                    session_id = %session.id,
                    page = page_no,
                    error = %e,
                    "Storage failure while staging page"
                );
                self.sessions
                    .fail(&session.id, &format!("storage failure on page {page_no}: {e:#}"))
                    .await?;
                return Ok(report);
            }

            let is_last = page_no == total_pages;
            self.sessions.advance(&session.id, page_no, is_last).await?;
            if is_last {
                completed = true;
            }
            page_no += 1;
        }

        if completed && self.sweep_after_run {
            report.swept = self.raw_products.sweep_unseen(run_started_at).await?;
            if report.swept > 0 {
                info!(
                    session_id = %session.id,
                    swept = report.swept,
                    "🧹 Tombstoned records unseen by this run"
                );
            }
        }

        info!(
            session_id = %session.id,
            pages = report.pages_fetched,
            inserted = report.inserted,
            updated = report.updated,
            unchanged = report.unchanged,
            skipped = report.skipped,
            "✅ Ingestion run finished"
        );
        Ok(report)
    }

    async fn fetch_with_retry(&self, page: u32) -> Result<CatalogPage, FetchError> {
        retry_with_backoff(self.retry_policy, "page fetch", || {
            self.fetcher.fetch_page(page)
        })
        .await
    }

    /// Stages every record of a page, fanning out up to the configured
    /// concurrency. Record validation failures are skips, never aborts;
    /// a storage failure aborts the page.
    async fn stage_page(
        &self,
        records: &[serde_json::Value],
        observed_at: DateTime<Utc>,
        report: &mut RunReport,
    ) -> Result<()> {
        let concurrency = self.db_max_concurrency.max(1);
        for chunk in records.chunks(concurrency) {
            let outcomes =
                join_all(chunk.iter().map(|raw| self.stage_record(raw, observed_at))).await;
            for outcome in outcomes {
                match outcome? {
                    RecordOutcome::Staged(UpsertOutcome::Inserted) => report.inserted += 1,
                    RecordOutcome::Staged(UpsertOutcome::Updated) => report.updated += 1,
                    RecordOutcome::Staged(UpsertOutcome::Unchanged) => report.unchanged += 1,
                    RecordOutcome::Skipped(_) => report.skipped += 1,
                }
            }
        }
        Ok(())
    }

    async fn stage_record(
        &self,
        raw: &serde_json::Value,
        observed_at: DateTime<Utc>,
    ) -> Result<RecordOutcome> {
        match RecordDraft::from_payload(raw.clone()) {
            Ok(draft) => {
                let outcome = self.raw_products.upsert(&draft, observed_at).await?;
                Ok(RecordOutcome::Staged(outcome))
            }
            Err(rejection) => {
                warn!(reason = %rejection, "Skipping malformed record");
                Ok(RecordOutcome::Skipped(rejection))
            }
        }
    }
}
