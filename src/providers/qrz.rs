use crate::{
    core::credentials::Credentials,
    spi::{FetchOptions, ProviderError, Session},
    state::Cursor,
    types::{ConfirmationStatus, ProviderId},
};

use super::{
    Login, Params, ProviderProfile,
    adif::{AdifFields, field, max_numeric},
    login_callsign, params,
};

/// QRZ logbook API, keyed by a per-logbook access key.
#[derive(Debug, Clone, Copy, Default)]
pub struct Qrz;

impl ProviderProfile for Qrz {
    fn id(&self) -> ProviderId {
        ProviderId::Qrz
    }

    fn login(&self, credentials: &Credentials) -> Result<Login, ProviderError> {
        let key = credentials
            .get("api_key")
            .ok_or_else(|| ProviderError::Auth("qrz needs an api_key".to_string()))?;
        let username = credentials.get("username").unwrap_or_default();
        Ok(Login {
            username: username.to_string(),
            secret: key.to_string(),
            callsign: login_callsign(credentials, username),
            api_key: None,
            params: params([("KEY", key), ("ACTION", "STATUS")]),
        })
    }

    fn fetch_params(&self, session: &Session, cursor: &Cursor, options: &FetchOptions) -> Params {
        let max = options.page_size.to_string();
        let after = cursor.as_str().unwrap_or("0");
        let option = format!("STATUS:CONFIRMED,AFTERLOGID:{after},MAX:{max}");
        params([
            ("KEY", session.token.as_str()),
            ("ACTION", "FETCH"),
            ("OPTION", option.as_str()),
            ("AFTERLOGID", after),
        ])
    }

    fn push_params(&self, session: &Session) -> Params {
        params([("KEY", session.token.as_str()), ("ACTION", "INSERT")])
    }

    fn row_status(&self, row: &AdifFields) -> ConfirmationStatus {
        match field(row, "APP_QRZLOG_STATUS") {
            Some(s) if s.eq_ignore_ascii_case("C") => ConfirmationStatus::Confirmed,
            _ => ConfirmationStatus::Unconfirmed,
        }
    }

    fn high_water(&self, rows: &[AdifFields]) -> Option<String> {
        max_numeric(rows, "APP_QRZLOG_LOGID")
    }
}
