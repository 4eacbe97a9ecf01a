/// In-memory sync state store.
pub mod memory;
/// SQLite-backed log and state store.
pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    engine::Dispute,
    qso::{QsoRecord, QsoSet},
    run::SyncRun,
    state::SyncWatermark,
    types::{LogVersion, ProviderId},
};

/// Storage-layer failure.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// Underlying SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Payload (de)serialization error.
    #[error("payload error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Log changed between load and commit.
    #[error("concurrent modification: expected version {expected}, found {actual}")]
    ConcurrentModification {
        /// Version the caller loaded.
        expected: LogVersion,
        /// Version currently stored.
        actual: LogVersion,
    },
    /// Anything else (poisoned lock, bad format version).
    #[error("{0}")]
    Message(String),
}

impl PersistError {
    /// True for optimistic-concurrency conflicts, which are retried.
    pub fn is_concurrent_modification(&self) -> bool {
        matches!(self, PersistError::ConcurrentModification { .. })
    }
}

/// Result alias for storage calls.
pub type PersistResult<T> = Result<T, PersistError>;

/// Local log contents at one version.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogSnapshot {
    /// Version the records were read at.
    pub version: LogVersion,
    /// All records, keyed by identity.
    pub records: QsoSet,
}

/// Stored dispute with its audit context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeEntry {
    /// Run that observed the dispute.
    pub run_id: Uuid,
    /// When it was recorded.
    pub recorded_at: DateTime<Utc>,
    /// The dispute itself.
    pub dispute: Dispute,
}

/// Authoritative local QSO log with optimistic concurrency.
pub trait LogStore: Send + Sync {
    /// Reads every record along with the current version.
    fn load_all(&self) -> PersistResult<LogSnapshot>;

    /// Upserts `records` if the log is still at `base_version`.
    ///
    /// Returns the new version, or [`PersistError::ConcurrentModification`]
    /// when another writer committed first.
    fn commit(&self, base_version: LogVersion, records: &[QsoRecord]) -> PersistResult<LogVersion>;
}

/// Durable per-provider sync progress and run audit trail.
pub trait StateStore: Send + Sync {
    /// Watermark for `provider`, `None` before the first run.
    fn load_watermark(&self, provider: ProviderId) -> PersistResult<Option<SyncWatermark>>;

    /// Replaces the watermark row for `watermark.provider`.
    fn save_watermark(&self, watermark: &SyncWatermark) -> PersistResult<()>;

    /// Appends a finalized run.
    fn append_run(&self, run: &SyncRun) -> PersistResult<()>;

    /// Most recent runs, newest first.
    fn recent_runs(&self, limit: usize) -> PersistResult<Vec<SyncRun>>;

    /// Appends dispute audit entries for `run_id`.
    fn record_disputes(&self, run_id: Uuid, disputes: &[Dispute]) -> PersistResult<()>;

    /// Stored disputes, optionally for one provider, oldest first.
    fn disputes(&self, provider: Option<ProviderId>) -> PersistResult<Vec<DisputeEntry>>;
}
