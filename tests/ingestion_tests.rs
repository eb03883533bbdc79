//! End-to-end ingestion runs against a scripted catalog
//!
//! Every test drives the real orchestrator, repositories and migrations
//! over an in-memory database; only the page fetcher is scripted.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use catalog_ingest_lib::application::IngestionOrchestrator;
use catalog_ingest_lib::domain::ingest::{ProcessingStatus, RecordDraft};
use catalog_ingest_lib::domain::pagination::{CatalogPage, PageInfo};
use catalog_ingest_lib::domain::services::{FetchError, PageFetcher};
use catalog_ingest_lib::domain::session::SessionStatus;
use catalog_ingest_lib::infrastructure::config::IngestConfig;
use catalog_ingest_lib::infrastructure::database_connection::DatabaseConnection;
use catalog_ingest_lib::infrastructure::raw_product_repository::RawProductRepository;
use catalog_ingest_lib::infrastructure::retry::RetryPolicy;
use catalog_ingest_lib::infrastructure::session_repository::SessionRepository;

/// Serves pre-scripted results per page. The last scripted result for a
/// page repeats on further calls; earlier ones are consumed in order, so
/// a retry sequence scripts as `[Err, Ok]`.
struct ScriptedFetcher {
    script: Mutex<HashMap<u32, VecDeque<Result<CatalogPage, FetchError>>>>,
    calls: AtomicU32,
    cancel_on: Mutex<Option<(u32, CancellationToken)>>,
}

impl ScriptedFetcher {
    fn new() -> Self {
        Self {
            script: Mutex::new(HashMap::new()),
            calls: AtomicU32::new(0),
            cancel_on: Mutex::new(None),
        }
    }

    fn on_page(self, page: u32, result: Result<CatalogPage, FetchError>) -> Self {
        self.script
            .lock()
            .unwrap()
            .entry(page)
            .or_default()
            .push_back(result);
        self
    }

    /// Cancels `token` when the fetcher serves `page`, which lands the
    /// cancellation between that page and the next one.
    fn cancelling_on(self, page: u32, token: CancellationToken) -> Self {
        *self.cancel_on.lock().unwrap() = Some((page, token));
        self
    }

    fn total_calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch_page(&self, page: u32) -> Result<CatalogPage, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((trigger, token)) = self.cancel_on.lock().unwrap().as_ref() {
            if *trigger == page {
                token.cancel();
            }
        }

        let mut script = self.script.lock().unwrap();
        let queue = script
            .get_mut(&page)
            .unwrap_or_else(|| panic!("no script for page {page}"));
        match queue.len() {
            0 => panic!("script for page {page} exhausted"),
            1 => queue.front().expect("non-empty queue").clone(),
            _ => queue.pop_front().expect("non-empty queue"),
        }
    }
}

fn product(id: i64, name: &str, updated_at: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "updatedAt": updated_at,
        "isActive": true,
        "priceRange": { "min": { "withTax": 2500, "currencyCode": "EUR" } }
    })
}

fn page(records: Vec<Value>, total: u32, per_page: u32) -> CatalogPage {
    CatalogPage {
        records,
        pagination: PageInfo {
            current: 1,
            total,
            per_page,
            first: None,
            prev: None,
            next: None,
            last: None,
        },
    }
}

async fn stores() -> (Arc<RawProductRepository>, Arc<SessionRepository>) {
    let db = DatabaseConnection::new_in_memory()
        .await
        .expect("in-memory database");
    db.migrate().await.expect("migrations");
    (
        Arc::new(RawProductRepository::new(db.pool().clone())),
        Arc::new(SessionRepository::new(db.pool().clone())),
    )
}

fn orchestrator_with(
    fetcher: Arc<ScriptedFetcher>,
    raw_products: &Arc<RawProductRepository>,
    sessions: &Arc<SessionRepository>,
    sweep_after_run: bool,
) -> IngestionOrchestrator {
    IngestionOrchestrator::new(
        fetcher,
        Arc::clone(raw_products),
        Arc::clone(sessions),
        RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 1,
        },
        &IngestConfig {
            db_max_concurrency: 4,
            sweep_after_run,
        },
    )
}

#[tokio::test]
async fn single_page_catalog_completes_in_one_fetch() {
    let (raw_products, sessions) = stores().await;
    let fetcher = Arc::new(ScriptedFetcher::new().on_page(
        1,
        Ok(page(
            vec![
                product(101, "Sneaker", "2024-03-01T10:00:00Z"),
                product(102, "Jacket", "2024-03-01T11:00:00Z"),
            ],
            2,
            50,
        )),
    ));

    let orchestrator =
        orchestrator_with(Arc::clone(&fetcher), &raw_products, &sessions, false);
    let report = orchestrator.run(CancellationToken::new()).await.unwrap();

    // The page fetched for the session snapshot is reused, not refetched
    assert_eq!(fetcher.total_calls(), 1);
    assert_eq!(report.pages_fetched, 1);
    assert_eq!(report.inserted, 2);
    assert_eq!(report.updated, 0);
    assert_eq!(report.skipped, 0);

    let session = sessions.get(&report.session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.current_page, 1);
    assert_eq!(session.total_pages, 1);
    assert!(session.completed_at.is_some());

    let stored = raw_products.get(101).await.unwrap().unwrap();
    assert_eq!(stored.processing_status, ProcessingStatus::Pending);
    assert_eq!(stored.payload["name"], "Sneaker");
}

#[tokio::test]
async fn rerunning_an_unchanged_catalog_is_idempotent() {
    let (raw_products, sessions) = stores().await;
    let fetcher = Arc::new(ScriptedFetcher::new().on_page(
        1,
        Ok(page(
            vec![
                product(101, "Sneaker", "2024-03-01T10:00:00Z"),
                product(102, "Jacket", "2024-03-01T11:00:00Z"),
            ],
            2,
            50,
        )),
    ));

    let orchestrator =
        orchestrator_with(Arc::clone(&fetcher), &raw_products, &sessions, false);
    let first = orchestrator.run(CancellationToken::new()).await.unwrap();
    assert_eq!(first.inserted, 2);

    let created_at = raw_products.get(101).await.unwrap().unwrap().created_at;

    let second = orchestrator.run(CancellationToken::new()).await.unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.unchanged, 2);

    let after = raw_products.get(101).await.unwrap().unwrap();
    assert_eq!(after.created_at, created_at);

    // Two separate sessions, both completed
    let recent = sessions.recent(10).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert!(recent.iter().all(|s| s.status == SessionStatus::Completed));
}

#[tokio::test]
async fn empty_page_ends_a_run_before_the_advertised_total() {
    let (raw_products, sessions) = stores().await;
    // Totals promise 3 pages, but page 2 comes back empty
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .on_page(
                1,
                Ok(page(
                    vec![
                        product(1, "A", "2024-03-01T10:00:00Z"),
                        product(2, "B", "2024-03-01T10:00:00Z"),
                    ],
                    6,
                    2,
                )),
            )
            .on_page(2, Ok(page(vec![], 6, 2))),
    );

    let orchestrator =
        orchestrator_with(Arc::clone(&fetcher), &raw_products, &sessions, false);
    let report = orchestrator.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.pages_fetched, 2);
    assert_eq!(report.inserted, 2);

    let session = sessions.get(&report.session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.current_page, 1);
    assert!(session.error_message.is_none());
    // Page 3 was never requested
    assert_eq!(fetcher.total_calls(), 2);
}

#[tokio::test]
async fn malformed_records_are_skipped_not_fatal() {
    let (raw_products, sessions) = stores().await;
    let fetcher = Arc::new(ScriptedFetcher::new().on_page(
        1,
        Ok(page(
            vec![
                product(7, "Valid", "2024-03-01T10:00:00Z"),
                json!({ "name": "no id at all" }),
                json!({ "id": 8, "name": "bad timestamp", "updatedAt": "yesterday-ish" }),
            ],
            3,
            50,
        )),
    ));

    let orchestrator =
        orchestrator_with(Arc::clone(&fetcher), &raw_products, &sessions, false);
    let report = orchestrator.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.skipped, 2);

    let session = sessions.get(&report.session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(raw_products.get(7).await.unwrap().is_some());
    assert!(raw_products.get(8).await.unwrap().is_none());
}

#[tokio::test]
async fn page_failure_after_retries_fails_the_session() {
    let (raw_products, sessions) = stores().await;
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .on_page(
                1,
                Ok(page(vec![product(1, "A", "2024-03-01T10:00:00Z")], 4, 2)),
            )
            // Permanent failure: not retried
            .on_page(2, Err(FetchError::UpstreamStatus { page: 2, status: 404 })),
    );

    let orchestrator =
        orchestrator_with(Arc::clone(&fetcher), &raw_products, &sessions, false);
    let report = orchestrator.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.pages_fetched, 1);
    assert_eq!(report.inserted, 1);

    let session = sessions.get(&report.session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Error);
    assert_eq!(session.current_page, 1);
    assert!(session.error_message.unwrap().contains("404"));

    // Page 1 records survive the failed run as pending work
    let stored = raw_products.get(1).await.unwrap().unwrap();
    assert_eq!(stored.processing_status, ProcessingStatus::Pending);
    // 404 is permanent, so exactly one attempt on page 2
    assert_eq!(fetcher.total_calls(), 2);
}

#[tokio::test]
async fn transient_failure_is_retried_within_the_run() {
    let (raw_products, sessions) = stores().await;
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .on_page(
                1,
                Err(FetchError::Transport {
                    page: 1,
                    message: "connection reset".into(),
                }),
            )
            .on_page(
                1,
                Ok(page(vec![product(1, "A", "2024-03-01T10:00:00Z")], 1, 50)),
            ),
    );

    let orchestrator =
        orchestrator_with(Arc::clone(&fetcher), &raw_products, &sessions, false);
    let report = orchestrator.run(CancellationToken::new()).await.unwrap();

    assert_eq!(fetcher.total_calls(), 2);
    assert_eq!(report.inserted, 1);
    let session = sessions.get(&report.session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
}

#[tokio::test]
async fn resumed_catalog_converges_after_a_failed_run() {
    let (raw_products, sessions) = stores().await;

    let failing = Arc::new(
        ScriptedFetcher::new()
            .on_page(
                1,
                Ok(page(
                    vec![
                        product(1, "A", "2024-03-01T10:00:00Z"),
                        product(2, "B", "2024-03-01T10:00:00Z"),
                    ],
                    4,
                    2,
                )),
            )
            .on_page(2, Err(FetchError::UpstreamStatus { page: 2, status: 503 })),
    );
    let first = orchestrator_with(Arc::clone(&failing), &raw_products, &sessions, false)
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        sessions.get(&first.session_id).await.unwrap().status,
        SessionStatus::Error
    );
    let created_at = raw_products.get(1).await.unwrap().unwrap().created_at;

    // The upstream recovers; a fresh run covers the whole catalog
    let recovered = Arc::new(
        ScriptedFetcher::new()
            .on_page(
                1,
                Ok(page(
                    vec![
                        product(1, "A", "2024-03-01T10:00:00Z"),
                        product(2, "B", "2024-03-01T10:00:00Z"),
                    ],
                    4,
                    2,
                )),
            )
            .on_page(
                2,
                Ok(page(vec![product(3, "C", "2024-03-02T09:00:00Z")], 4, 2)),
            ),
    );
    let second = orchestrator_with(Arc::clone(&recovered), &raw_products, &sessions, false)
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(second.inserted, 1);
    assert_eq!(second.unchanged, 2);
    assert_eq!(
        sessions.get(&second.session_id).await.unwrap().status,
        SessionStatus::Completed
    );
    // Replaying records A and B did not disturb their history
    assert_eq!(raw_products.get(1).await.unwrap().unwrap().created_at, created_at);
}

#[tokio::test]
async fn cancellation_between_pages_parks_the_session_as_error() {
    let (raw_products, sessions) = stores().await;
    let token = CancellationToken::new();
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .on_page(
                1,
                Ok(page(vec![product(1, "A", "2024-03-01T10:00:00Z")], 6, 2)),
            )
            .on_page(
                2,
                Ok(page(vec![product(2, "B", "2024-03-01T10:00:00Z")], 6, 2)),
            )
            .on_page(
                3,
                Ok(page(vec![product(3, "C", "2024-03-01T10:00:00Z")], 6, 2)),
            )
            .cancelling_on(2, token.clone()),
    );

    let orchestrator =
        orchestrator_with(Arc::clone(&fetcher), &raw_products, &sessions, false);
    let report = orchestrator.run(token).await.unwrap();

    // Page 2 lands fully; page 3 is never requested
    assert_eq!(report.pages_fetched, 2);
    assert_eq!(report.inserted, 2);
    assert_eq!(fetcher.total_calls(), 2);

    let session = sessions.get(&report.session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Error);
    assert_eq!(session.current_page, 2);
    assert!(session.error_message.as_ref().unwrap().contains("cancelled"));
    assert_eq!(session.next_page(), 3);
}

#[tokio::test]
async fn completed_runs_sweep_records_the_run_never_saw() {
    let (raw_products, sessions) = stores().await;

    // A record from an earlier run that has since vanished upstream
    let stale =
        RecordDraft::from_payload(product(900, "Discontinued", "2024-01-01T00:00:00Z")).unwrap();
    raw_products
        .upsert(&stale, Utc::now() - Duration::hours(1))
        .await
        .unwrap();

    let fetcher = Arc::new(ScriptedFetcher::new().on_page(
        1,
        Ok(page(vec![product(1, "Live", "2024-03-01T10:00:00Z")], 1, 50)),
    ));
    let orchestrator =
        orchestrator_with(Arc::clone(&fetcher), &raw_products, &sessions, true);
    let report = orchestrator.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.swept, 1);
    assert!(raw_products.get(900).await.unwrap().unwrap().is_deleted);
    assert!(!raw_products.get(1).await.unwrap().unwrap().is_deleted);

    let stats = raw_products.statistics().await.unwrap();
    assert_eq!(stats.tombstoned, 1);
    assert_eq!(stats.total, 2);
}

#[tokio::test]
async fn failed_runs_never_sweep() {
    let (raw_products, sessions) = stores().await;

    let stale =
        RecordDraft::from_payload(product(900, "Discontinued", "2024-01-01T00:00:00Z")).unwrap();
    raw_products
        .upsert(&stale, Utc::now() - Duration::hours(1))
        .await
        .unwrap();

    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .on_page(
                1,
                Ok(page(vec![product(1, "Live", "2024-03-01T10:00:00Z")], 4, 2)),
            )
            .on_page(2, Err(FetchError::UpstreamStatus { page: 2, status: 404 })),
    );
    let orchestrator =
        orchestrator_with(Arc::clone(&fetcher), &raw_products, &sessions, true);
    let report = orchestrator.run(CancellationToken::new()).await.unwrap();

    // An incomplete run proves nothing about what vanished upstream
    assert_eq!(report.swept, 0);
    assert!(!raw_products.get(900).await.unwrap().unwrap().is_deleted);
    assert_eq!(
        sessions.get(&report.session_id).await.unwrap().status,
        SessionStatus::Error
    );
}

#[tokio::test]
async fn empty_collection_completes_with_zero_pages() {
    let (raw_products, sessions) = stores().await;
    let fetcher = Arc::new(ScriptedFetcher::new().on_page(1, Ok(page(vec![], 0, 0))));

    let orchestrator =
        orchestrator_with(Arc::clone(&fetcher), &raw_products, &sessions, false);
    let report = orchestrator.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.pages_fetched, 0);
    assert_eq!(report.inserted, 0);

    let session = sessions.get(&report.session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.total_pages, 0);
    assert_eq!(session.current_page, 0);
    assert_eq!(raw_products.statistics().await.unwrap().total, 0);
}
