//! Ingestion session entity and state machine
//!
//! A session is the durable progress marker of one ingestion run. It is
//! created from the first page's pagination snapshot, advanced once per
//! committed page, and finished exactly once: `running` is the only state
//! that accepts transitions, and the cursor only ever moves forward.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::sqlite::{SqliteArgumentValue, SqliteTypeInfo, SqliteValueRef};
use sqlx::{Decode, Encode, Sqlite, Type};
use thiserror::Error;

/// Lifecycle state of an ingestion session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Error,
}

impl SessionStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Terminal states accept no further transitions.
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Type<Sqlite> for SessionStatus {
    fn type_info() -> SqliteTypeInfo {
        <String as Type<Sqlite>>::type_info()
    }
}

impl<'q> Encode<'q, Sqlite> for SessionStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<SqliteArgumentValue<'q>>,
    ) -> Result<IsNull, BoxDynError> {
        <String as Encode<Sqlite>>::encode(self.as_str().to_string(), buf)
    }
}

impl<'r> Decode<'r, Sqlite> for SessionStatus {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <String as Decode<Sqlite>>::decode(value)?;
        match s.as_str() {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid SessionStatus: {s}").into()),
        }
    }
}

/// Durable progress record of one ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionSession {
    /// UUID v4, minted when the run starts.
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Page count derived from the first page's pagination metadata.
    /// Advisory only; an empty page ends the run early regardless.
    pub total_pages: u32,
    /// Highest page whose records are fully committed. Zero until the
    /// first page lands.
    pub current_page: u32,
    pub products_per_page: u32,
    pub total_products: u32,
    pub status: SessionStatus,
    pub error_message: Option<String>,
}

impl IngestionSession {
    /// Where a resumed run would pick up.
    pub const fn next_page(&self) -> u32 {
        self.current_page + 1
    }
}

/// Session transitions that were refused, kept distinct from plain
/// storage failures so callers can tell a programming error (driving a
/// finished session) from an operational one.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("ingestion session {id} not found")]
    NotFound { id: String },
    #[error("ingestion session {id} is already {status} and accepts no further transitions")]
    Terminal { id: String, status: SessionStatus },
    #[error("ingestion session {id} cursor cannot move backwards ({current} -> {requested})")]
    CursorRegression {
        id: String,
        current: u32,
        requested: u32,
    },
    #[error(transparent)]
    Storage(#[from] sqlx::Error),
}
