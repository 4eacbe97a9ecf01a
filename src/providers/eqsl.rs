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

/// eQSL inbox download and log upload.
///
/// Every row in the inbox is a received card, so rows count as confirmed
/// unless `QSL_RCVD` says otherwise. The cursor is the newest `QSLRDATE` seen.
#[derive(Debug, Clone, Copy, Default)]
pub struct Eqsl;

impl ProviderProfile for Eqsl {
    fn id(&self) -> ProviderId {
        ProviderId::Eqsl
    }

    fn login(&self, credentials: &Credentials) -> Result<Login, ProviderError> {
        let creds = credentials
            .user_pass()
            .ok_or_else(|| ProviderError::Auth("eqsl needs username and password".to_string()))?;
        Ok(Login {
            username: creds.username.to_string(),
            secret: creds.password.to_string(),
            callsign: login_callsign(credentials, creds.username),
            api_key: None,
            params: params([("UserName", creds.username), ("Password", creds.password)]),
        })
    }

    fn fetch_params(&self, session: &Session, cursor: &Cursor, options: &FetchOptions) -> Params {
        let limit = options.page_size.to_string();
        let mut p = params([
            ("UserName", session.username.as_str()),
            ("Password", session.token.as_str()),
            ("Limit", limit.as_str()),
        ]);
        if let Some(since) = cursor.as_str() {
            p.insert("RcvdSince".to_string(), since.to_string());
        }
        p
    }

    fn push_params(&self, session: &Session) -> Params {
        params([
            ("EQSL_USER", session.username.as_str()),
            ("EQSL_PSWD", session.token.as_str()),
        ])
    }

    fn row_status(&self, row: &AdifFields) -> ConfirmationStatus {
        field(row, "QSL_RCVD")
            .and_then(qsl_rcvd_status)
            .unwrap_or(ConfirmationStatus::Confirmed)
    }

    fn high_water(&self, rows: &[AdifFields]) -> Option<String> {
        max_text(rows, "QSLRDATE")
    }
}
