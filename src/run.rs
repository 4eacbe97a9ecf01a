//! Sync run audit records and the accumulator that builds them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    engine::MergeCounts,
    qso::QsoKey,
    state::Cursor,
    types::{ProviderId, SyncMode},
};

/// Version number for serialized [`SyncRunEnvelope`] payloads.
pub const RUN_FORMAT_VERSION: u16 = 1;

/// Result of one provider's pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderOutcome {
    /// Everything fetched, pushed, and committed.
    Ok,
    /// Some progress committed, some work left for the next run.
    Partial,
    /// Nothing committed for this provider.
    Error,
}

/// Why a provider did not finish cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "kebab-case")]
pub enum OutcomeReason {
    /// No adapter registered for the provider.
    NotRegistered,
    /// Credential store had no entry.
    NoCredentials,
    /// Credential store could not be read.
    Credentials(String),
    /// The credentials' persona has the provider switched off.
    Disabled,
    /// Provider refused the credentials or the session.
    Auth(String),
    /// Still rate limited after the retry budget.
    RateLimited(String),
    /// Still failing transiently after the retry budget.
    Transient(String),
    /// Provider reported a non-retryable failure.
    Permanent(String),
    /// Local log commit failed; watermark left untouched.
    Commit(String),
    /// Run was cancelled before the provider finished.
    Cancelled,
    /// Run aborted by a fatal store failure.
    Aborted(String),
    /// Provider worker panicked.
    Crashed(String),
}

/// Tallies for one provider in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordCounts {
    /// New local records.
    pub added: usize,
    /// Local records whose confirmation state changed.
    pub updated: usize,
    /// Records seen but left unchanged, including push duplicates.
    pub unchanged: usize,
    /// Downgrades recorded as disputes.
    pub disputed: usize,
    /// Records the provider accepted on push.
    pub accepted: usize,
    /// Records the provider rejected on push.
    pub rejected: usize,
}

impl RecordCounts {
    /// Folds merge tallies in.
    pub fn absorb_merge(&mut self, counts: MergeCounts) {
        self.added += counts.added;
        self.updated += counts.updated;
        self.unchanged += counts.unchanged;
    }
}

/// A push rejection kept per record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Rejected QSO.
    pub key: QsoKey,
    /// Provider's reason text.
    pub reason: String,
}

/// Outcome of one provider within a [`SyncRun`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderReport {
    /// Provider.
    pub provider: ProviderId,
    /// Ok / partial / error.
    pub outcome: ProviderOutcome,
    /// Cause of a degraded outcome.
    pub reason: Option<OutcomeReason>,
    /// Record tallies.
    pub counts: RecordCounts,
    /// Per-record push rejections.
    pub rejections: Vec<Rejection>,
    /// Watermark cursor after this run, `None` when it is not known.
    pub cursor: Option<Cursor>,
}

impl ProviderReport {
    /// Error report carrying no progress.
    pub fn error(provider: ProviderId, reason: OutcomeReason, cursor: Cursor) -> Self {
        Self {
            provider,
            outcome: ProviderOutcome::Error,
            reason: Some(reason),
            counts: RecordCounts::default(),
            rejections: Vec::new(),
            cursor: Some(cursor),
        }
    }

    /// Error report for a provider whose watermark was never read.
    pub fn unreported(provider: ProviderId, reason: OutcomeReason) -> Self {
        Self {
            cursor: None,
            ..Self::error(provider, reason, Cursor::Beginning)
        }
    }
}

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every attempted provider is ok.
    Ok,
    /// At least one provider degraded.
    Partial,
    /// A fatal failure aborted the run.
    Error,
}

/// One finalized orchestrator invocation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    /// Run identifier.
    pub id: Uuid,
    /// Requested mode.
    pub mode: SyncMode,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Completion time.
    pub finished_at: DateTime<Utc>,
    /// Providers attempted, in request order.
    pub providers: Vec<ProviderId>,
    /// One report per attempted provider, in the same order.
    pub reports: Vec<ProviderReport>,
    /// Overall status.
    pub status: RunStatus,
    /// Fatal failure description, when `status` is `Error`.
    pub fatal: Option<String>,
}

impl SyncRun {
    /// Report for `provider`, if it was attempted.
    pub fn report(&self, provider: ProviderId) -> Option<&ProviderReport> {
        self.reports.iter().find(|r| r.provider == provider)
    }
}

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRunEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped run.
    pub run: SyncRun,
}

impl SyncRunEnvelope {
    /// Constructs an envelope using [`RUN_FORMAT_VERSION`].
    pub fn new(run: SyncRun) -> Self {
        Self {
            format_version: RUN_FORMAT_VERSION,
            run,
        }
    }
}

/// Evolving run state, owned by the committer and finalized once.
#[derive(Debug)]
pub struct RunAccumulator {
    id: Uuid,
    mode: SyncMode,
    started_at: DateTime<Utc>,
    providers: Vec<ProviderId>,
    reports: Vec<Option<ProviderReport>>,
    fatal: Option<String>,
}

impl RunAccumulator {
    /// Opens a run for `providers` in request order.
    pub fn start(mode: SyncMode, providers: Vec<ProviderId>) -> Self {
        let reports = vec![None; providers.len()];
        Self {
            id: Uuid::new_v4(),
            mode,
            started_at: Utc::now(),
            providers,
            reports,
            fatal: None,
        }
    }

    /// Run identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Records a provider report. A second report for the same provider is ignored.
    pub fn record(&mut self, report: ProviderReport) {
        if let Some(idx) = self.providers.iter().position(|p| *p == report.provider) {
            if self.reports[idx].is_none() {
                self.reports[idx] = Some(report);
            }
        }
    }

    /// Marks the run as fatally failed. The first cause is kept.
    pub fn fail(&mut self, cause: impl Into<String>) {
        if self.fatal.is_none() {
            self.fatal = Some(cause.into());
        }
    }

    /// True after [`RunAccumulator::fail`].
    pub fn is_failed(&self) -> bool {
        self.fatal.is_some()
    }

    /// Freezes the run. Providers without a report become errors.
    pub fn finish(self) -> SyncRun {
        let fatal = self.fatal;
        let reports: Vec<ProviderReport> = self
            .providers
            .iter()
            .zip(self.reports)
            .map(|(p, r)| {
                r.unwrap_or_else(|| {
                    let reason = match &fatal {
                        Some(cause) => OutcomeReason::Aborted(cause.clone()),
                        None => OutcomeReason::Cancelled,
                    };
                    ProviderReport::unreported(*p, reason)
                })
            })
            .collect();

        let status = if fatal.is_some() {
            RunStatus::Error
        } else if reports.iter().all(|r| r.outcome == ProviderOutcome::Ok) {
            RunStatus::Ok
        } else {
            RunStatus::Partial
        };

        SyncRun {
            id: self.id,
            mode: self.mode,
            started_at: self.started_at,
            finished_at: Utc::now(),
            providers: self.providers,
            reports,
            status,
            fatal,
        }
    }
}
