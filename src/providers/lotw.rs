use crate::{
    core::credentials::Credentials,
    spi::{FetchOptions, ProviderError, Session},
    state::Cursor,
    types::{ConfirmationStatus, ProviderId},
};

use super::{
    Login, Params, ProviderProfile,
    adif::{AdifFields, field, max_text, qsl_rcvd_status},
    login_callsign, params,
};

/// LoTW report download and signed upload.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lotw;

impl ProviderProfile for Lotw {
    fn id(&self) -> ProviderId {
        ProviderId::Lotw
    }

    fn login(&self, credentials: &Credentials) -> Result<Login, ProviderError> {
        let creds = credentials
            .user_pass()
            .ok_or_else(|| ProviderError::Auth("lotw needs username and password".to_string()))?;
        Ok(Login {
            username: creds.username.to_string(),
            secret: creds.password.to_string(),
            callsign: login_callsign(credentials, creds.username),
            api_key: None,
            params: params([("login", creds.username), ("password", creds.password)]),
        })
    }

    fn fetch_params(&self, session: &Session, cursor: &Cursor, _options: &FetchOptions) -> Params {
        let mut p = params([
            ("login", session.username.as_str()),
            ("password", session.token.as_str()),
            ("qso_query", "1"),
            ("qso_qsl", "yes"),
            ("qso_qsldetail", "yes"),
        ]);
        p.insert(
            "qso_qslsince".to_string(),
            cursor.as_str().unwrap_or("1900-01-01").to_string(),
        );
        if let Some(call) = session.callsign.as_deref() {
            p.insert("qso_owncall".to_string(), call.to_string());
        }
        p
    }

    fn push_params(&self, session: &Session) -> Params {
        params([
            ("login", session.username.as_str()),
            ("password", session.token.as_str()),
        ])
    }

    fn row_status(&self, row: &AdifFields) -> ConfirmationStatus {
        field(row, "QSL_RCVD")
            .and_then(qsl_rcvd_status)
            .unwrap_or(ConfirmationStatus::Unconfirmed)
    }

    fn high_water(&self, rows: &[AdifFields]) -> Option<String> {
        max_text(rows, "APP_LOTW_RXQSL")
    }
}
