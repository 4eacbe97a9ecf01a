//! Per-provider sync watermarks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ProviderId;

/// Opaque provider cursor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Cursor {
    /// Nothing fetched yet.
    #[default]
    Beginning,
    /// Provider-defined position (date, log id, page token).
    At(String),
}

impl Cursor {
    /// Cursor text, `None` at the beginning.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cursor::Beginning => None,
            Cursor::At(s) => Some(s),
        }
    }
}

/// Outcome of the last attempt recorded on a watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatermarkStatus {
    /// Last pass completed.
    Clean,
    /// Last pass committed part of the sequence.
    Partial,
    /// Last pass committed nothing.
    Failed,
}

/// How far a provider's data has been incorporated into the local log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWatermark {
    /// Owning provider.
    pub provider: ProviderId,
    /// Position after the last durably merged record.
    pub cursor: Cursor,
    /// Outcome of the last attempt.
    pub status: WatermarkStatus,
    /// Time of the last attempt.
    pub last_attempt: Option<DateTime<Utc>>,
}

impl SyncWatermark {
    /// First-run watermark.
    pub fn beginning(provider: ProviderId) -> Self {
        Self {
            provider,
            cursor: Cursor::Beginning,
            status: WatermarkStatus::Clean,
            last_attempt: None,
        }
    }

    /// Advances to `cursor` after a durable merge.
    pub fn advanced(&self, cursor: Cursor, status: WatermarkStatus, at: DateTime<Utc>) -> Self {
        Self {
            provider: self.provider,
            cursor,
            status,
            last_attempt: Some(at),
        }
    }

    /// Same cursor, attempt recorded as failed.
    pub fn failed(&self, at: DateTime<Utc>) -> Self {
        Self {
            provider: self.provider,
            cursor: self.cursor.clone(),
            status: WatermarkStatus::Failed,
            last_attempt: Some(at),
        }
    }
}
