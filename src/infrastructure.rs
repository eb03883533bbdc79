//! Infrastructure layer for database access, HTTP, and external integrations
//!
//! This module provides the SQLite connection and repositories, the
//! upstream catalog client, asset downloads, retry/backoff, and the
//! configuration and logging plumbing.

pub mod asset_downloader;
pub mod batch_repository;
pub mod catalog_client;
pub mod config; // Configuration tiers and endpoint constants
pub mod database_connection;
pub mod logging; // Logging infrastructure
pub mod product_repository;
pub mod raw_product_repository;
pub mod retry;
pub mod session_repository;

// Re-export commonly used items
pub use asset_downloader::{AssetDownloader, DownloadError};
pub use batch_repository::ProcessingBatchRepository;
pub use catalog_client::CatalogClient;
pub use config::{AppConfig, ClientConfig, ConfigManager, aboutyou};
pub use database_connection::DatabaseConnection;
pub use product_repository::ProductRepository;
pub use raw_product_repository::{RawProductRepository, StoreStatistics};
pub use retry::{RetryPolicy, Retryable, retry_with_backoff};
pub use session_repository::SessionRepository;

pub use logging::{get_log_directory, init_logging, init_logging_with_config};
