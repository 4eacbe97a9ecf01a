use std::time::Duration;

use crate::{
    core::credentials::Credentials,
    spi::{FetchOptions, ProviderError, RateLimitInfo, Session},
    state::Cursor,
    types::{ConfirmationStatus, ProviderId},
};

use super::{
    Login, Params, ProviderProfile,
    adif::{AdifFields, field, max_numeric, qsl_rcvd_status},
    login_callsign, params,
};

/// Requests per minute Club Log tolerates before blocking the key.
const REQUESTS_PER_MINUTE: u32 = 60;

/// Club Log match download and realtime upload.
///
/// Login needs the account email, its password and an application key. The
/// cursor is the highest numeric match id seen.
#[derive(Debug, Clone, Copy, Default)]
pub struct Clublog;

impl Clublog {
    fn status_word(raw: &str) -> Option<ConfirmationStatus> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "confirmed" | "matched" => Some(ConfirmationStatus::Confirmed),
            "disputed" | "mismatch" => Some(ConfirmationStatus::Disputed),
            "unconfirmed" | "unmatched" => Some(ConfirmationStatus::Unconfirmed),
            _ => None,
        }
    }
}

impl ProviderProfile for Clublog {
    fn id(&self) -> ProviderId {
        ProviderId::Clublog
    }

    fn login(&self, credentials: &Credentials) -> Result<Login, ProviderError> {
        let email = credentials
            .get("email")
            .or_else(|| credentials.get("username"))
            .ok_or_else(|| ProviderError::Auth("clublog needs an email".to_string()))?;
        let password = credentials
            .get("password")
            .ok_or_else(|| ProviderError::Auth("clublog needs a password".to_string()))?;
        let api_key = credentials
            .get("api_key")
            .ok_or_else(|| ProviderError::Auth("clublog needs an api_key".to_string()))?;
        Ok(Login {
            username: email.to_string(),
            secret: password.to_string(),
            callsign: login_callsign(credentials, ""),
            api_key: Some(api_key.to_string()),
            params: params([("email", email), ("password", password), ("api", api_key)]),
        })
    }

    fn fetch_params(&self, session: &Session, cursor: &Cursor, options: &FetchOptions) -> Params {
        let limit = options.page_size.to_string();
        let mut p = params([
            ("email", session.username.as_str()),
            ("password", session.token.as_str()),
            ("limit", limit.as_str()),
        ]);
        if let Some(api) = session.api_key.as_deref() {
            p.insert("api".to_string(), api.to_string());
        }
        if let Some(call) = session.callsign.as_deref() {
            p.insert("call".to_string(), call.to_string());
        }
        if let Some(after) = cursor.as_str() {
            p.insert("after_match".to_string(), after.to_string());
        }
        p
    }

    fn push_params(&self, session: &Session) -> Params {
        let mut p = params([
            ("email", session.username.as_str()),
            ("password", session.token.as_str()),
        ]);
        if let Some(api) = session.api_key.as_deref() {
            p.insert("api".to_string(), api.to_string());
        }
        if let Some(call) = session.callsign.as_deref() {
            p.insert("callsign".to_string(), call.to_string());
        }
        p
    }

    fn row_status(&self, row: &AdifFields) -> ConfirmationStatus {
        field(row, "APP_CLUBLOG_STATUS")
            .and_then(Self::status_word)
            .or_else(|| field(row, "QSL_RCVD").and_then(qsl_rcvd_status))
            .unwrap_or(ConfirmationStatus::Unconfirmed)
    }

    fn high_water(&self, rows: &[AdifFields]) -> Option<String> {
        max_numeric(rows, "APP_CLUBLOG_MATCHID")
    }

    fn rate_limit_info(&self) -> Option<RateLimitInfo> {
        Some(RateLimitInfo {
            limit: Some(REQUESTS_PER_MINUTE),
            window: Some(Duration::from_secs(60)),
            ..RateLimitInfo::default()
        })
    }
}
