//! Domain module - Core entities and contracts of the ingestion pipeline
//!
//! This module contains the entities staged by ingestion (raw records,
//! sessions, processing batches, normalized products), the pagination
//! contract of the upstream catalog, and the service traits the
//! application layer is wired against. Nothing in here talks to the
//! network or the database directly.
//!
//! Modern Rust module organization (Rust 2018+ style):
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod batch;
pub mod ingest;
pub mod pagination;
pub mod product;
pub mod services;
pub mod session;

// Re-export commonly used items for convenience
// Note: Be specific about re-exports to avoid ambiguous glob warnings
pub use batch::{BatchStatus, BatchType, ProcessingBatch};
pub use ingest::{
    classify_upsert, payload_fingerprint, ProcessingStatus, RawRecord, RecordDraft, RecordOutcome,
    RecordRejection, StoredSnapshot, UpsertAction, UpsertOutcome,
};
pub use pagination::{CatalogPage, PageInfo};
pub use product::Product;
pub use services::{FetchError, NormalizeError, PageFetcher, RecordNormalizer};
pub use session::{IngestionSession, SessionError, SessionStatus};
