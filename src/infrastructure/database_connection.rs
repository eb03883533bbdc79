// Database connection and pool management
// This module handles SQLite database connections using sqlx

use anyhow::Result;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::path::Path;

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        // Create database file directory if it doesn't exist
        let db_path = if database_url.starts_with("sqlite://") {
            database_url.trim_start_matches("sqlite://")
        } else if database_url.starts_with("sqlite:") {
            database_url.trim_start_matches("sqlite:")
        } else {
            database_url
        };

        // In-memory databases have no file to prepare
        let is_memory = db_path == ":memory:" || database_url.contains("mode=memory");
        if !is_memory {
            if let Some(parent) = Path::new(db_path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            // Ensure the database file exists by creating it if necessary
            if !Path::new(db_path).exists() {
                std::fs::File::create(db_path)?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Private in-memory database, mainly for tests. A single connection
    /// is mandatory here: every new `sqlite::memory:` connection would get
    /// its own empty database.
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        // Create tables manually for now
        let create_raw_products_sql = r#"
            CREATE TABLE IF NOT EXISTS raw_products (
                id INTEGER PRIMARY KEY,
                payload TEXT NOT NULL,
                payload_hash TEXT NOT NULL,
                source_updated_at DATETIME NOT NULL,
                created_at DATETIME NOT NULL,
                last_seen_at DATETIME NOT NULL,
                is_deleted BOOLEAN NOT NULL DEFAULT 0,
                processing_status TEXT NOT NULL DEFAULT 'pending',
                processing_error TEXT,
                processed_at DATETIME
            )
        "#;

        let create_sessions_sql = r#"
            CREATE TABLE IF NOT EXISTS ingestion_sessions (
                id TEXT PRIMARY KEY,
                started_at DATETIME NOT NULL,
                completed_at DATETIME,
                total_pages INTEGER NOT NULL,
                current_page INTEGER NOT NULL DEFAULT 0,
                products_per_page INTEGER NOT NULL,
                total_products INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'running',
                error_message TEXT
            )
        "#;

        let create_batches_sql = r#"
            CREATE TABLE IF NOT EXISTS processing_batches (
                id TEXT PRIMARY KEY,
                batch_type TEXT NOT NULL,
                started_at DATETIME NOT NULL,
                completed_at DATETIME,
                status TEXT NOT NULL DEFAULT 'running',
                total_records INTEGER NOT NULL DEFAULT 0,
                records_processed INTEGER NOT NULL DEFAULT 0,
                records_failed INTEGER NOT NULL DEFAULT 0,
                error_message TEXT
            )
        "#;

        let create_products_sql = r#"
            CREATE TABLE IF NOT EXISTS products (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                brand TEXT,
                description TEXT,
                price_amount REAL NOT NULL DEFAULT 0,
                price_currency TEXT NOT NULL DEFAULT 'USD',
                image_url TEXT,
                image_local_path TEXT,
                category TEXT,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
        "#;

        let create_indexes_sql = r#"
            CREATE INDEX IF NOT EXISTS idx_raw_products_processing_status ON raw_products (processing_status);
            CREATE INDEX IF NOT EXISTS idx_raw_products_last_seen_at ON raw_products (last_seen_at);
            CREATE INDEX IF NOT EXISTS idx_raw_products_source_updated_at ON raw_products (source_updated_at);
            CREATE INDEX IF NOT EXISTS idx_sessions_status ON ingestion_sessions (status);
            CREATE INDEX IF NOT EXISTS idx_sessions_started_at ON ingestion_sessions (started_at);
        "#;

        sqlx::query(create_raw_products_sql)
            .execute(&self.pool)
            .await?;
        sqlx::query(create_sessions_sql).execute(&self.pool).await?;
        sqlx::query(create_batches_sql).execute(&self.pool).await?;
        sqlx::query(create_products_sql).execute(&self.pool).await?;
        sqlx::query(create_indexes_sql).execute(&self.pool).await?;

        Ok(())
    }
}
