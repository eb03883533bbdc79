//! Service traits the application layer is wired against
//!
//! The orchestrator and the normalization stage depend on these seams
//! instead of concrete network or transform code, so tests can script
//! page sequences and normalization outcomes without a server.

use async_trait::async_trait;
use thiserror::Error;

use super::ingest::RawRecord;
use super::pagination::CatalogPage;

/// A single page fetch that failed. Classification into transient and
/// permanent lives here so the retry policy stays generic.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("transport failure while requesting page {page}: {message}")]
    Transport { page: u32, message: String },
    #[error("upstream returned HTTP {status} for page {page}")]
    UpstreamStatus { page: u32, status: u16 },
    #[error("upstream rate limit hit on page {page} (retry after {retry_after_secs}s)")]
    RateLimited { page: u32, retry_after_secs: u64 },
    #[error("page {page} response could not be decoded: {message}")]
    Decode { page: u32, message: String },
}

impl FetchError {
    /// Transport drops, throttling and server-side errors are worth
    /// retrying; client errors and undecodable bodies are not.
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::RateLimited { .. } => true,
            Self::UpstreamStatus { status, .. } => *status >= 500,
            Self::Decode { .. } => false,
        }
    }
}

/// Fetches one catalog page. Implementations perform exactly one upstream
/// request per call; retry policy belongs to the caller.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, page: u32) -> Result<CatalogPage, FetchError>;
}

/// A record-level normalization failure. Failures are isolated to the
/// record; the stage records them and moves on.
#[derive(Error, Debug, Clone)]
pub enum NormalizeError {
    #[error("record {id} is missing required content: {reason}")]
    MissingContent { id: i64, reason: String },
    #[error("record {id} failed to normalize: {message}")]
    Transform { id: i64, message: String },
}

/// Transforms one staged record into its normalized representation and
/// persists the result.
#[async_trait]
pub trait RecordNormalizer: Send + Sync {
    async fn normalize(&self, record: &RawRecord) -> Result<(), NormalizeError>;
}
