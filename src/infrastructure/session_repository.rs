//! Repository for ingestion session progress
//!
//! Sessions move through `running -> completed | error` exactly once.
//! Every transition is a compare-and-set UPDATE guarded by
//! `status = 'running'` (and a forward-only cursor for advances); a guard
//! miss is diagnosed into a typed [`SessionError`] instead of being
//! swallowed, because driving a finished session is a caller bug.

use crate::domain::pagination::PageInfo;
use crate::domain::session::{IngestionSession, SessionError, SessionStatus};
use chrono::Utc;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct SessionRepository {
    pool: Arc<SqlitePool>,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Opens a session from the first page's pagination snapshot.
    ///
    /// `total_pages` is computed once here and never revised, even when
    /// the upstream's totals drift during the run.
    pub async fn start(&self, pagination: &PageInfo) -> Result<IngestionSession, SessionError> {
        let session = IngestionSession {
            id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            completed_at: None,
            total_pages: pagination.total_pages(),
            current_page: 0,
            products_per_page: pagination.per_page,
            total_products: pagination.total,
            status: SessionStatus::Running,
            error_message: None,
        };

        sqlx::query(
            r#"
            INSERT INTO ingestion_sessions
            (id, started_at, completed_at, total_pages, current_page, products_per_page,
             total_products, status, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(session.started_at)
        .bind(session.completed_at)
        .bind(session.total_pages)
        .bind(session.current_page)
        .bind(session.products_per_page)
        .bind(session.total_products)
        .bind(session.status)
        .bind(&session.error_message)
        .execute(&*self.pool)
        .await?;

        info!(
            session_id = %session.id,
            total_pages = session.total_pages,
            total_products = session.total_products,
            "🚀 Started ingestion session"
        );
        Ok(session)
    }

    /// Moves the cursor to `page`, completing the session when the page
    /// was the last one. The cursor may stay put (an empty page re-asserts
    /// the previous cursor) but never moves backwards.
    pub async fn advance(
        &self,
        session_id: &str,
        page: u32,
        is_last_page: bool,
    ) -> Result<(), SessionError> {
        let completed_at = if is_last_page { Some(Utc::now()) } else { None };
        let result = sqlx::query(
            r#"
            UPDATE ingestion_sessions
            SET current_page = ?,
                status = CASE WHEN ? THEN 'completed' ELSE status END,
                completed_at = CASE WHEN ? THEN ? ELSE completed_at END
            WHERE id = ? AND status = 'running' AND current_page <= ?
            "#,
        )
        .bind(page)
        .bind(is_last_page)
        .bind(is_last_page)
        .bind(completed_at)
        .bind(session_id)
        .bind(page)
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.diagnose(session_id, Some(page)).await);
        }

        if is_last_page {
            info!(session_id = %session_id, current_page = page, "✅ Ingestion session completed");
        }
        Ok(())
    }

    /// Finishes the session in `error`, recording what went wrong.
    pub async fn fail(&self, session_id: &str, error: &str) -> Result<(), SessionError> {
        let result = sqlx::query(
            r#"
            UPDATE ingestion_sessions
            SET status = 'error', error_message = ?, completed_at = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(error)
        .bind(Utc::now())
        .bind(session_id)
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.diagnose(session_id, None).await);
        }

        info!(session_id = %session_id, error = %error, "❌ Ingestion session failed");
        Ok(())
    }

    pub async fn get(&self, session_id: &str) -> Result<IngestionSession, SessionError> {
        let row = sqlx::query(
            r#"
            SELECT id, started_at, completed_at, total_pages, current_page, products_per_page,
                   total_products, status, error_message
            FROM ingestion_sessions WHERE id = ?
            "#,
        )
        .bind(session_id)
        .fetch_optional(&*self.pool)
        .await?;

        row.map(|r| map_session(&r)).ok_or(SessionError::NotFound {
            id: session_id.to_string(),
        })
    }

    /// Most recent sessions first, for the status report.
    pub async fn recent(&self, limit: u32) -> Result<Vec<IngestionSession>, SessionError> {
        let rows = sqlx::query(
            r#"
            SELECT id, started_at, completed_at, total_pages, current_page, products_per_page,
                   total_products, status, error_message
            FROM ingestion_sessions
            ORDER BY started_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows.iter().map(map_session).collect())
    }

    /// Works out why a guarded transition matched zero rows.
    async fn diagnose(&self, session_id: &str, requested_page: Option<u32>) -> SessionError {
        match self.get(session_id).await {
            Err(err) => err,
            Ok(session) if session.status.is_terminal() => SessionError::Terminal {
                id: session_id.to_string(),
                status: session.status,
            },
            Ok(session) => match requested_page {
                Some(requested) => SessionError::CursorRegression {
                    id: session_id.to_string(),
                    current: session.current_page,
                    requested,
                },
                // Still running and no cursor involved: the row changed
                // between the UPDATE and this read, treat as terminal race.
                None => SessionError::Terminal {
                    id: session_id.to_string(),
                    status: session.status,
                },
            },
        }
    }
}

fn map_session(row: &SqliteRow) -> IngestionSession {
    IngestionSession {
        id: row.get("id"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        total_pages: row.get("total_pages"),
        current_page: row.get("current_page"),
        products_per_page: row.get("products_per_page"),
        total_products: row.get("total_products"),
        status: row.get("status"),
        error_message: row.get("error_message"),
    }
}
