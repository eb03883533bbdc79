//! Raw record staging entities
//!
//! A raw record is one upstream catalog entity stored verbatim, plus the
//! bookkeeping the pipeline needs: a content fingerprint, liveness
//! timestamps, a tombstone flag, and the downstream processing state.
//! The upsert decision logic lives here as a pure function so the
//! repository stays a thin SQL shell around it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::sqlite::{SqliteArgumentValue, SqliteTypeInfo, SqliteValueRef};
use sqlx::{Decode, Encode, Sqlite, Type};
use thiserror::Error;

/// Downstream pipeline state of a staged record.
///
/// `Embedded` is reserved for a later enrichment stage; nothing in this
/// crate sets it, but the store counts it so mixed databases stay legible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Normalized,
    Embedded,
    Error,
}

impl ProcessingStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Normalized => "normalized",
            Self::Embedded => "embedded",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// Stored as TEXT; an unknown stored value fails the decode loudly instead
// of being coerced to a default.
impl Type<Sqlite> for ProcessingStatus {
    fn type_info() -> SqliteTypeInfo {
        <String as Type<Sqlite>>::type_info()
    }
}

impl<'q> Encode<'q, Sqlite> for ProcessingStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<SqliteArgumentValue<'q>>,
    ) -> Result<IsNull, BoxDynError> {
        <String as Encode<Sqlite>>::encode(self.as_str().to_string(), buf)
    }
}

impl<'r> Decode<'r, Sqlite> for ProcessingStatus {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <String as Decode<Sqlite>>::decode(value)?;
        match s.as_str() {
            "pending" => Ok(Self::Pending),
            "normalized" => Ok(Self::Normalized),
            "embedded" => Ok(Self::Embedded),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid ProcessingStatus: {s}").into()),
        }
    }
}

/// One staged copy of an upstream catalog entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    /// Upstream identifier, reused as the primary key.
    pub id: i64,
    /// Verbatim upstream payload.
    pub payload: serde_json::Value,
    /// blake3 hex digest of the canonical payload bytes.
    pub payload_hash: String,
    /// Upstream's own modification timestamp.
    pub source_updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Last time any ingestion run observed this record. Never moves backwards.
    pub last_seen_at: DateTime<Utc>,
    /// Soft-delete marker; tombstoned rows keep their payload.
    pub is_deleted: bool,
    pub processing_status: ProcessingStatus,
    pub processing_error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Why a fetched record never made it into the raw store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordRejection {
    #[error("record carries no usable integer id")]
    MissingId,
    #[error("record {id} is missing the required '{field}' field")]
    MissingField { id: i64, field: &'static str },
    #[error("record {id} has an unparseable '{field}' value: {value}")]
    InvalidField {
        id: i64,
        field: &'static str,
        value: String,
    },
}

/// A fetched record validated down to the fields the raw store keys on.
///
/// Construction is the only validation gate on the ingestion path; once a
/// draft exists it is storable by definition.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDraft {
    pub id: i64,
    pub payload: serde_json::Value,
    pub payload_hash: String,
    pub source_updated_at: DateTime<Utc>,
    pub is_deleted: bool,
}

impl RecordDraft {
    /// Validates an upstream payload into a storable draft.
    ///
    /// Required: an integer `id` and an RFC 3339 `updatedAt`. The optional
    /// `isActive` flag (default true) inverts into the tombstone marker.
    pub fn from_payload(payload: serde_json::Value) -> Result<Self, RecordRejection> {
        let id = payload
            .get("id")
            .and_then(serde_json::Value::as_i64)
            .ok_or(RecordRejection::MissingId)?;

        let updated_raw = payload
            .get("updatedAt")
            .and_then(serde_json::Value::as_str)
            .ok_or(RecordRejection::MissingField {
                id,
                field: "updatedAt",
            })?;
        let source_updated_at = DateTime::parse_from_rfc3339(updated_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| RecordRejection::InvalidField {
                id,
                field: "updatedAt",
                value: updated_raw.to_string(),
            })?;

        // Upstream marks withdrawn products inactive rather than omitting them.
        let is_active = payload
            .get("isActive")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(true);

        let payload_hash = payload_fingerprint(&payload);
        Ok(Self {
            id,
            payload,
            payload_hash,
            source_updated_at,
            is_deleted: !is_active,
        })
    }
}

/// blake3 hex digest over the canonical JSON bytes of a payload.
///
/// serde_json keeps object keys sorted in its default `Value` map, so the
/// same content always serializes to the same bytes regardless of the
/// field order the upstream response used.
pub fn payload_fingerprint(payload: &serde_json::Value) -> String {
    let bytes =
        serde_json::to_vec(payload).expect("serializing an in-memory JSON value cannot fail");
    blake3::hash(&bytes).to_hex().to_string()
}

/// The stored fields an upsert decision is made against.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSnapshot {
    pub source_updated_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub payload_hash: String,
}

/// What the store did with one observed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// The write an incoming observation requires, decided before any SQL runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    /// No stored row yet; insert fresh with `Pending` status.
    Insert,
    /// Overwrite payload and source metadata. The processing status resets
    /// to `Pending` only when the content fingerprint actually changed;
    /// metadata-only updates must not re-trigger normalization.
    Update { reset_status: bool },
    /// Stored row already reflects this observation; only refresh liveness.
    Touch,
}

/// Decides what an incoming draft does to the stored row, if any.
///
/// A row is rewritten when the incoming `source_updated_at` is strictly
/// newer or the tombstone flag flips. An older or equal timestamp with an
/// unchanged flag never regresses stored data, whatever the payload says.
pub fn classify_upsert(existing: Option<&StoredSnapshot>, draft: &RecordDraft) -> UpsertAction {
    match existing {
        None => UpsertAction::Insert,
        Some(stored) => {
            let newer = draft.source_updated_at > stored.source_updated_at;
            let tombstone_flip = draft.is_deleted != stored.is_deleted;
            if newer || tombstone_flip {
                UpsertAction::Update {
                    reset_status: draft.payload_hash != stored.payload_hash,
                }
            } else {
                UpsertAction::Touch
            }
        }
    }
}

/// Per-record staging result, aggregated by the orchestrator into the
/// run report. Skips carry their rejection so callers can log the reason.
#[derive(Debug, Clone)]
pub enum RecordOutcome {
    Staged(UpsertOutcome),
    Skipped(RecordRejection),
}
