//! Contract every provider adapter implements.

/// Backoff policy, call pacing and the guarded call wrapper used by the orchestrator.
pub mod retry;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    core::{credentials::Credentials, persona::Persona},
    qso::{ProviderRecord, QsoKey, QsoRecord},
    state::Cursor,
    types::ProviderId,
};

/// Error surfaced by an adapter call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Credentials refused or session expired. Fatal for this provider this run.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Provider asked us to slow down.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Suggested wait before the next call.
        retry_after: Option<Duration>,
        /// Provider message.
        message: String,
    },
    /// Timeout, connection reset, 5xx. Retried within the run.
    #[error("transient failure: {0}")]
    Transient(String),
    /// Non-retryable failure. The provider is skipped for this run.
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl ProviderError {
    /// True for errors worth retrying within the same run.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. } | ProviderError::Transient(_))
    }
}

/// Authenticated provider session.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    /// Provider that issued the session.
    pub provider: ProviderId,
    /// Account name used to log in.
    pub username: String,
    /// Station callsign used when rows omit one.
    pub callsign: Option<String>,
    /// Opaque token or secret presented on later calls.
    pub token: String,
    /// Session expiry, when the provider reports one.
    pub expires_at: Option<DateTime<Utc>>,
    /// Application key sent alongside the account secret.
    pub api_key: Option<String>,
    /// Persona whose callsign history fills in a missing operator.
    pub persona: Option<Persona>,
}

impl Session {
    /// Operator callsign for a QSO on `day`: the persona's callsign active
    /// that day, then the session callsign.
    pub fn operator_on(&self, day: Option<NaiveDate>) -> Option<&str> {
        day.and_then(|d| self.persona.as_ref()?.callsign_on(d))
            .or(self.callsign.as_deref())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("provider", &self.provider)
            .field("username", &self.username)
            .field("callsign", &self.callsign)
            .field("token", &"***")
            .field("expires_at", &self.expires_at)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("persona", &self.persona.as_ref().map(|p| p.id.as_str()))
            .finish()
    }
}

/// Knobs for a fetch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchOptions {
    /// Maximum records per page.
    pub page_size: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self { page_size: 500 }
    }
}

/// One page of the fetch sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPage {
    /// Records newer than the requested cursor.
    pub records: Vec<ProviderRecord>,
    /// Cursor covering exactly the records yielded so far.
    pub next_cursor: Cursor,
    /// False on the last page.
    pub has_more: bool,
}

/// Per-record push result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "reason", rename_all = "lowercase")]
pub enum PushOutcome {
    /// Provider stored the record.
    Accepted,
    /// Provider already had the record.
    Duplicate,
    /// Provider refused the record.
    Rejected(String),
}

/// Provider rate-limit hints.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RateLimitInfo {
    /// Requests left in the current window.
    pub remaining: Option<u32>,
    /// When the window resets.
    pub reset_at: Option<DateTime<Utc>>,
    /// Requests allowed per window.
    pub limit: Option<u32>,
    /// Length of the window `limit` applies to.
    pub window: Option<Duration>,
}

impl RateLimitInfo {
    /// Spacing between calls that keeps within `limit` per `window`.
    pub fn min_interval(&self) -> Option<Duration> {
        let limit = self.limit.filter(|l| *l > 0)?;
        Some(self.window? / limit)
    }

    /// Time left until the window resets, when the budget is already spent.
    pub fn exhausted_for(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.remaining != Some(0) {
            return None;
        }
        (self.reset_at? - now).to_std().ok()
    }
}

/// Result of a local credential check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
    /// Credentials have the shape the provider needs.
    Ok,
    /// Fields are missing, blank, or for another provider.
    Invalid,
    /// Credentials carry an expiry that has passed.
    Expired,
    /// Nothing stored for the provider.
    Missing,
    /// The check itself failed.
    Error,
}

impl std::fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AuthStatus::Ok => "ok",
            AuthStatus::Invalid => "invalid",
            AuthStatus::Expired => "expired",
            AuthStatus::Missing => "missing",
            AuthStatus::Error => "error",
        })
    }
}

/// Checks every adapter applies before its own shape rules: the credentials
/// belong to `provider` and, if they carry `expires_at`, it is in the future.
pub fn precheck(
    provider: ProviderId,
    credentials: &Credentials,
    now: DateTime<Utc>,
) -> Option<AuthStatus> {
    if credentials.provider != provider {
        return Some(AuthStatus::Invalid);
    }
    match credentials.expires_at() {
        Some(Ok(at)) if at <= now => Some(AuthStatus::Expired),
        Some(Err(_)) => Some(AuthStatus::Error),
        _ => None,
    }
}

/// Reachability check result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// True when the provider answered.
    pub ok: bool,
    /// Status text or failure cause.
    pub detail: String,
}

impl Health {
    /// Service answered.
    pub fn up(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: detail.into(),
        }
    }

    /// Service did not answer or answered with an error.
    pub fn down(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
        }
    }
}

/// Capability set of one remote service.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable provider id.
    fn id(&self) -> ProviderId;

    /// Checks credential presence and shape. No network I/O.
    fn auth_check(&self, credentials: &Credentials) -> AuthStatus;

    /// Checks whether the service answers.
    async fn ping(&self) -> Health;

    /// Logs in. Idempotent; no remote side effects beyond login.
    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, ProviderError>;

    /// Fetches the page of confirmations following `cursor`.
    async fn fetch_confirmations(
        &self,
        session: &Session,
        cursor: &Cursor,
        options: &FetchOptions,
    ) -> Result<FetchPage, ProviderError>;

    /// Submits records one by one; partial success is expected.
    async fn push_records(
        &self,
        session: &Session,
        records: &[QsoRecord],
    ) -> Result<Vec<(QsoKey, PushOutcome)>, ProviderError>;

    /// Current rate-limit hints, if the provider publishes any.
    fn rate_limit_info(&self) -> Option<RateLimitInfo> {
        None
    }
}
