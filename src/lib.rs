//! Catalog Ingest - Incremental E-commerce Catalog Ingestion Pipeline
//!
//! Pulls a paginated product catalog into a durable raw store, tracks
//! every run as a resumable ingestion session, and normalizes staged
//! payloads into queryable product rows in a decoupled second stage.

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;

// Re-export the pieces a binary or embedding caller wires together
pub use application::{IngestionOrchestrator, NormalizationStage, ProductNormalizer, RunReport};
pub use infrastructure::config::{AppConfig, ConfigManager};
pub use infrastructure::database_connection::DatabaseConnection;
