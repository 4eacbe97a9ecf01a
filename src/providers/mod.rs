//! Remote provider adapters over a pluggable transport.
//!
//! Each service is a [`ProviderProfile`]: it knows its credential shape, its
//! request parameters, how its rows express confirmation, and how its cursor
//! advances. [`RemoteAdapter`] turns any profile into a
//! [`ProviderAdapter`](crate::spi::ProviderAdapter) by driving a [`Transport`].

/// ADIF field-map conversion helpers.
pub mod adif;
/// Club Log profile.
pub mod clublog;
/// eQSL profile.
pub mod eqsl;
/// LoTW profile.
pub mod lotw;
/// QRZ logbook profile.
pub mod qrz;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tracing::{debug, warn};

use crate::{
    core::credentials::Credentials,
    qso::{QsoKey, QsoRecord},
    spi::{
        AuthStatus, FetchOptions, FetchPage, Health, ProviderAdapter, ProviderError, PushOutcome,
        RateLimitInfo, Session, precheck,
    },
    state::Cursor,
    types::{ConfirmationStatus, ProviderId},
};

use adif::{AdifFields, field, normalize_row, record_to_row, row_to_record};

/// Request parameters sent to a provider endpoint.
pub type Params = BTreeMap<String, String>;

/// Endpoint family of a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteAction {
    /// Reachability check; carries no credentials.
    Ping,
    /// Credential check / session creation.
    Login,
    /// Confirmation download.
    Download,
    /// Record upload.
    Upload,
}

/// Transport-neutral request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRequest {
    /// Target provider.
    pub provider: ProviderId,
    /// Endpoint family.
    pub action: RemoteAction,
    /// Query/form parameters, secrets included.
    pub params: Params,
    /// Upload rows.
    pub rows: Vec<AdifFields>,
}

/// Transport-neutral response with ADIF already decoded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteResponse {
    /// HTTP-like status code.
    pub status: u16,
    /// `Retry-After` hint.
    pub retry_after: Option<Duration>,
    /// Decoded ADIF rows.
    pub rows: Vec<AdifFields>,
    /// True when more rows follow this page.
    pub more: bool,
    /// Server-reported high-water mark for the rows returned.
    pub cursor: Option<String>,
    /// Session token issued on login.
    pub token: Option<String>,
    /// Human-readable status text.
    pub message: Option<String>,
}

impl RemoteResponse {
    /// `200` with `rows`.
    pub fn ok(rows: Vec<AdifFields>) -> Self {
        Self {
            status: 200,
            rows,
            ..Self::default()
        }
    }

    /// Bare status response.
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Failure below the HTTP status level.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Request exceeded its deadline.
    #[error("request timed out")]
    Timeout,
    /// Connection could not be established or was reset.
    #[error("connection failed: {0}")]
    Connect(String),
}

impl From<TransportError> for ProviderError {
    fn from(value: TransportError) -> Self {
        ProviderError::Transient(value.to_string())
    }
}

/// Wire layer (HTTP client, test double) under the adapters.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs one request.
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, TransportError>;
}

/// Maps a response status onto the adapter error taxonomy.
pub fn classify(resp: &RemoteResponse) -> Result<(), ProviderError> {
    let message = resp
        .message
        .clone()
        .unwrap_or_else(|| format!("status {}", resp.status));
    match resp.status {
        200..=299 => Ok(()),
        401 | 403 => Err(ProviderError::Auth(message)),
        429 => Err(ProviderError::RateLimited {
            retry_after: resp.retry_after,
            message,
        }),
        503 if resp.retry_after.is_some() => Err(ProviderError::RateLimited {
            retry_after: resp.retry_after,
            message,
        }),
        408 | 500..=599 => Err(ProviderError::Transient(message)),
        _ => Err(ProviderError::Permanent(message)),
    }
}

/// Login material produced by a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login {
    /// Account name.
    pub username: String,
    /// Secret reused as the session token when the provider issues none.
    pub secret: String,
    /// Station callsign for rows that omit one.
    pub callsign: Option<String>,
    /// Application key kept on the session for later calls.
    pub api_key: Option<String>,
    /// Parameters of the login request.
    pub params: Params,
}

/// Service-specific behaviour plugged into [`RemoteAdapter`].
pub trait ProviderProfile: Send + Sync + 'static {
    /// Provider id.
    fn id(&self) -> ProviderId;

    /// Validates credential shape and builds the login request.
    fn login(&self, credentials: &Credentials) -> Result<Login, ProviderError>;

    /// Parameters for the download following `cursor`.
    fn fetch_params(&self, session: &Session, cursor: &Cursor, options: &FetchOptions) -> Params;

    /// Parameters for an upload.
    fn push_params(&self, session: &Session) -> Params;

    /// Confirmation status expressed by a normalized row.
    fn row_status(&self, row: &AdifFields) -> ConfirmationStatus;

    /// Cursor value covering `rows`, when the server reports none.
    fn high_water(&self, rows: &[AdifFields]) -> Option<String>;

    /// Published rate-limit hints.
    fn rate_limit_info(&self) -> Option<RateLimitInfo> {
        None
    }
}

/// Station callsign for a login: `callsign` field, then persona, then username.
pub(crate) fn login_callsign(credentials: &Credentials, username: &str) -> Option<String> {
    credentials
        .get("callsign")
        .map(str::to_string)
        .or_else(|| credentials.persona.clone())
        .or_else(|| (!username.is_empty()).then(|| username.to_string()))
}

/// Builds a [`Params`] map from literal pairs.
pub(crate) fn params<const N: usize>(pairs: [(&str, &str); N]) -> Params {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// [`ProviderAdapter`] for any [`ProviderProfile`].
pub struct RemoteAdapter<P> {
    profile: P,
    transport: Arc<dyn Transport>,
}

impl<P: ProviderProfile> RemoteAdapter<P> {
    /// Adapter for `profile` over `transport`.
    pub fn new(profile: P, transport: Arc<dyn Transport>) -> Self {
        Self { profile, transport }
    }

    async fn send(
        &self,
        action: RemoteAction,
        params: Params,
        rows: Vec<AdifFields>,
    ) -> Result<RemoteResponse, ProviderError> {
        let request = RemoteRequest {
            provider: self.profile.id(),
            action,
            params,
            rows,
        };
        let resp = self.transport.send(request).await?;
        classify(&resp)?;
        Ok(resp)
    }
}

#[async_trait]
impl<P: ProviderProfile> ProviderAdapter for RemoteAdapter<P> {
    fn id(&self) -> ProviderId {
        self.profile.id()
    }

    fn auth_check(&self, credentials: &Credentials) -> AuthStatus {
        if let Some(status) = precheck(self.profile.id(), credentials, Utc::now()) {
            return status;
        }
        match self.profile.login(credentials) {
            Ok(_) => AuthStatus::Ok,
            Err(ProviderError::Auth(_)) => AuthStatus::Invalid,
            Err(_) => AuthStatus::Error,
        }
    }

    async fn ping(&self) -> Health {
        match self.send(RemoteAction::Ping, Params::new(), Vec::new()).await {
            Ok(resp) => {
                let status = resp.status;
                Health::up(resp.message.unwrap_or_else(|| format!("status {status}")))
            }
            Err(err) => Health::down(err.to_string()),
        }
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, ProviderError> {
        let login = self.profile.login(credentials)?;
        let resp = self
            .send(RemoteAction::Login, login.params.clone(), Vec::new())
            .await?;
        Ok(Session {
            provider: self.profile.id(),
            username: login.username,
            callsign: login.callsign,
            token: resp.token.unwrap_or(login.secret),
            expires_at: None,
            api_key: login.api_key,
            persona: None,
        })
    }

    async fn fetch_confirmations(
        &self,
        session: &Session,
        cursor: &Cursor,
        options: &FetchOptions,
    ) -> Result<FetchPage, ProviderError> {
        let provider = self.profile.id();
        let params = self.profile.fetch_params(session, cursor, options);
        let resp = self.send(RemoteAction::Download, params, Vec::new()).await?;

        let rows: Vec<AdifFields> = resp.rows.iter().map(normalize_row).collect();
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let status = self.profile.row_status(row);
            let day = field(row, "QSO_DATE")
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y%m%d").ok());
            match row_to_record(row, provider, status, session.operator_on(day)) {
                Ok(rec) => records.push(rec),
                Err(err) => warn!(%provider, error = %err, "skipping unusable row"),
            }
        }

        let next_cursor = resp
            .cursor
            .clone()
            .or_else(|| self.profile.high_water(&rows))
            .map(Cursor::At)
            .unwrap_or_else(|| cursor.clone());
        debug!(
            %provider,
            rows = rows.len(),
            records = records.len(),
            more = resp.more,
            "page decoded"
        );

        Ok(FetchPage {
            records,
            next_cursor,
            has_more: resp.more,
        })
    }

    async fn push_records(
        &self,
        session: &Session,
        records: &[QsoRecord],
    ) -> Result<Vec<(QsoKey, PushOutcome)>, ProviderError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let rows = records.iter().map(record_to_row).collect();
        let params = self.profile.push_params(session);
        let resp = self.send(RemoteAction::Upload, params, rows).await?;

        let results: Vec<AdifFields> = resp.rows.iter().map(normalize_row).collect();
        Ok(records
            .iter()
            .enumerate()
            .map(|(idx, rec)| {
                let outcome = results
                    .get(idx)
                    .and_then(|r| field(r, "RESULT"))
                    .map(parse_push_result)
                    .unwrap_or_else(|| PushOutcome::Rejected("no result returned".to_string()));
                (rec.key.clone(), outcome)
            })
            .collect())
    }

    fn rate_limit_info(&self) -> Option<RateLimitInfo> {
        self.profile.rate_limit_info()
    }
}

/// Parses an upload `RESULT` value: `accepted`, `duplicate`, `rejected[: reason]`.
pub fn parse_push_result(raw: &str) -> PushOutcome {
    let text = raw.trim();
    let lower = text.to_ascii_lowercase();
    if lower == "accepted" || lower == "ok" {
        PushOutcome::Accepted
    } else if lower == "duplicate" || lower.starts_with("duplicate") {
        PushOutcome::Duplicate
    } else if let Some((_, reason)) = text.split_once(':') {
        PushOutcome::Rejected(reason.trim().to_string())
    } else {
        PushOutcome::Rejected(text.to_string())
    }
}

/// Adapters registered by provider id.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: BTreeMap<ProviderId, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remote adapters for `enabled` providers over a shared transport.
    pub fn from_config(enabled: &[ProviderId], transport: Arc<dyn Transport>) -> Self {
        let mut registry = Self::new();
        for id in enabled {
            let transport = Arc::clone(&transport);
            let adapter: Arc<dyn ProviderAdapter> = match id {
                ProviderId::Eqsl => Arc::new(RemoteAdapter::new(eqsl::Eqsl, transport)),
                ProviderId::Lotw => Arc::new(RemoteAdapter::new(lotw::Lotw, transport)),
                ProviderId::Clublog => Arc::new(RemoteAdapter::new(clublog::Clublog, transport)),
                ProviderId::Qrz => Arc::new(RemoteAdapter::new(qrz::Qrz, transport)),
            };
            registry.register(adapter);
        }
        registry
    }

    /// Registers `adapter` under its id, returning any adapter it replaced.
    pub fn register(
        &mut self,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.insert(adapter.id(), adapter)
    }

    /// Adapter for `id`.
    pub fn get(&self, id: ProviderId) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&id).cloned()
    }

    /// Registered ids, in stable order.
    pub fn ids(&self) -> Vec<ProviderId> {
        self.adapters.keys().copied().collect()
    }
}
