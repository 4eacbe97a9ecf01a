//! Conversion between decoded ADIF field maps and QSO records.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::{
    qso::{ProviderRecord, QsoKey, QsoRecord},
    types::{Band, ConfirmationStatus, Mode, ProviderId},
};

/// One decoded ADIF record: upper-case field name to value.
pub type AdifFields = BTreeMap<String, String>;

const IDENTITY_FIELDS: [&str; 8] = [
    "STATION_CALLSIGN",
    "OPERATOR",
    "CALL",
    "QSO_DATE",
    "TIME_ON",
    "BAND",
    "MODE",
    "FREQ",
];

/// Why a row could not become a record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowError {
    /// Required field absent or blank.
    #[error("missing field {0}")]
    Missing(&'static str),
    /// Field present but unparseable.
    #[error("invalid {field}: {value}")]
    Invalid {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Upper-cases field names and trims values; blank values are dropped.
pub fn normalize_row(row: &AdifFields) -> AdifFields {
    row.iter()
        .filter(|(_, v)| !v.trim().is_empty())
        .map(|(k, v)| (k.trim().to_ascii_uppercase(), v.trim().to_string()))
        .collect()
}

/// Non-blank value of `name` in a normalized row.
pub fn field<'a>(row: &'a AdifFields, name: &str) -> Option<&'a str> {
    row.get(name).map(String::as_str)
}

/// Maps an ADIF `QSL_RCVD`-style flag to a confirmation status.
pub fn qsl_rcvd_status(flag: &str) -> Option<ConfirmationStatus> {
    match flag.trim().to_ascii_uppercase().as_str() {
        "Y" | "V" => Some(ConfirmationStatus::Confirmed),
        "I" => Some(ConfirmationStatus::Disputed),
        "N" | "R" => Some(ConfirmationStatus::Unconfirmed),
        _ => None,
    }
}

/// Parses `QSO_DATE` (`YYYYMMDD`) and `TIME_ON` (`HHMM` or `HHMMSS`).
pub fn parse_qso_start(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date, "%Y%m%d").ok()?;
    let time = match time.len() {
        4 => NaiveTime::parse_from_str(time, "%H%M").ok()?,
        6 => NaiveTime::parse_from_str(time, "%H%M%S").ok()?,
        _ => return None,
    };
    Some(date.and_time(time).and_utc())
}

/// Parses an ADIF `FREQ` value (MHz) into Hz.
pub fn parse_freq_mhz(raw: &str) -> Option<u64> {
    let mhz: f64 = raw.trim().parse().ok()?;
    if !mhz.is_finite() || mhz <= 0.0 {
        return None;
    }
    Some((mhz * 1_000_000.0).round() as u64)
}

/// Builds a provider record from a normalized row.
///
/// The operator comes from `STATION_CALLSIGN`, then `OPERATOR`, then
/// `fallback_operator`. A missing `BAND` is derived from `FREQ`. Every
/// non-identity field is kept as provider metadata.
pub fn row_to_record(
    row: &AdifFields,
    provider: ProviderId,
    status: ConfirmationStatus,
    fallback_operator: Option<&str>,
) -> Result<ProviderRecord, RowError> {
    let operator = field(row, "STATION_CALLSIGN")
        .or_else(|| field(row, "OPERATOR"))
        .or(fallback_operator)
        .ok_or(RowError::Missing("STATION_CALLSIGN"))?;
    let remote = field(row, "CALL").ok_or(RowError::Missing("CALL"))?;
    let date = field(row, "QSO_DATE").ok_or(RowError::Missing("QSO_DATE"))?;
    let time = field(row, "TIME_ON").ok_or(RowError::Missing("TIME_ON"))?;
    let start = parse_qso_start(date, time).ok_or_else(|| RowError::Invalid {
        field: "QSO_DATE",
        value: format!("{date} {time}"),
    })?;

    let freq_hz = match field(row, "FREQ") {
        Some(raw) => Some(parse_freq_mhz(raw).ok_or_else(|| RowError::Invalid {
            field: "FREQ",
            value: raw.to_string(),
        })?),
        None => None,
    };

    let band = match field(row, "BAND") {
        Some(raw) => Band::from_adif(raw).ok_or_else(|| RowError::Invalid {
            field: "BAND",
            value: raw.to_string(),
        })?,
        None => freq_hz
            .and_then(Band::from_freq_hz)
            .ok_or(RowError::Missing("BAND"))?,
    };
    let mode = field(row, "MODE").ok_or(RowError::Missing("MODE"))?;

    let meta = row
        .iter()
        .filter(|(k, _)| !IDENTITY_FIELDS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(ProviderRecord {
        key: QsoKey::new(operator, remote, start, band, Mode::new(mode)),
        freq_hz,
        provider,
        status,
        meta,
    })
}

/// Renders a local record as an upload row.
pub fn record_to_row(rec: &QsoRecord) -> AdifFields {
    let mut row = AdifFields::new();
    row.insert("STATION_CALLSIGN".to_string(), rec.key.operator.clone());
    row.insert("CALL".to_string(), rec.key.remote.clone());
    row.insert("QSO_DATE".to_string(), rec.key.start.format("%Y%m%d").to_string());
    row.insert("TIME_ON".to_string(), rec.key.start.format("%H%M%S").to_string());
    row.insert("BAND".to_string(), rec.key.band.as_adif().to_string());
    row.insert("MODE".to_string(), rec.key.mode.as_str().to_string());
    if let Some(hz) = rec.freq_hz {
        row.insert("FREQ".to_string(), format!("{:.6}", hz as f64 / 1_000_000.0));
    }
    row
}

/// Largest value of `name` across rows, compared as text.
pub fn max_text(rows: &[AdifFields], name: &str) -> Option<String> {
    rows.iter().filter_map(|r| field(r, name)).max().map(str::to_string)
}

/// Largest value of `name` across rows, compared as an integer.
pub fn max_numeric(rows: &[AdifFields], name: &str) -> Option<String> {
    rows.iter()
        .filter_map(|r| field(r, name))
        .filter_map(|v| v.parse::<u64>().ok())
        .max()
        .map(|v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> AdifFields {
        normalize_row(
            &pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn converts_row_and_keeps_extra_fields_as_meta() {
        let r = row(&[
            ("station_callsign", "ki7mt"),
            ("call", "k1abc"),
            ("qso_date", "20240301"),
            ("time_on", "1234"),
            ("freq", "14.074"),
            ("mode", "ft8"),
            ("qsl_rcvd", "Y"),
        ]);
        let rec = row_to_record(&r, ProviderId::Lotw, ConfirmationStatus::Confirmed, None).unwrap();
        assert_eq!(rec.key.operator, "KI7MT");
        assert_eq!(rec.key.remote, "K1ABC");
        assert_eq!(rec.key.band, Band::B20m);
        assert_eq!(rec.key.mode.as_str(), "FT8");
        assert_eq!(rec.freq_hz, Some(14_074_000));
        assert_eq!(rec.meta.get("QSL_RCVD").map(String::as_str), Some("Y"));
        assert!(!rec.meta.contains_key("CALL"));
    }

    #[test]
    fn falls_back_to_session_callsign() {
        let r = row(&[
            ("CALL", "W1AW"),
            ("QSO_DATE", "20240301"),
            ("TIME_ON", "123456"),
            ("BAND", "40m"),
            ("MODE", "CW"),
        ]);
        let confirmed = ConfirmationStatus::Confirmed;
        let rec = row_to_record(&r, ProviderId::Eqsl, confirmed, Some("KI7MT")).unwrap();
        assert_eq!(rec.key.operator, "KI7MT");

        let err = row_to_record(&r, ProviderId::Eqsl, confirmed, None).unwrap_err();
        assert_eq!(err, RowError::Missing("STATION_CALLSIGN"));
    }

    #[test]
    fn round_trips_identity_through_upload_row() {
        let r = row(&[
            ("STATION_CALLSIGN", "KI7MT"),
            ("CALL", "W1AW"),
            ("QSO_DATE", "20240301"),
            ("TIME_ON", "123456"),
            ("BAND", "40m"),
            ("MODE", "CW"),
            ("FREQ", "7.025"),
        ]);
        let unconfirmed = ConfirmationStatus::Unconfirmed;
        let rec = row_to_record(&r, ProviderId::Qrz, unconfirmed, None).unwrap();
        let local = QsoRecord::new(rec.key.clone(), rec.freq_hz);
        let upload = record_to_row(&local);
        let back = row_to_record(&upload, ProviderId::Qrz, unconfirmed, None).unwrap();
        assert_eq!(back.key, rec.key);
        assert_eq!(back.freq_hz, Some(7_025_000));
    }
}
