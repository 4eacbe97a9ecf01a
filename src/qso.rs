//! QSO identity key, local record, and provider-reported record types.

use std::collections::BTreeMap;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Band, ConfirmationStatus, Mode, ProviderId, normalize_call};

/// Opaque provider metadata: ADIF field name to value.
pub type ProviderMeta = BTreeMap<String, String>;

/// Keyed set of local records.
pub type QsoSet = BTreeMap<QsoKey, QsoRecord>;

/// Identity of a QSO. Two records describe the same contact iff keys match.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QsoKey {
    /// Logging station callsign.
    pub operator: String,
    /// Worked station callsign.
    pub remote: String,
    /// UTC start time, whole seconds.
    pub start: DateTime<Utc>,
    /// Band bucket.
    pub band: Band,
    /// Normalized mode.
    pub mode: Mode,
}

impl QsoKey {
    /// Builds a normalized key.
    pub fn new(operator: &str, remote: &str, start: DateTime<Utc>, band: Band, mode: Mode) -> Self {
        Self {
            operator: normalize_call(operator),
            remote: normalize_call(remote),
            start: start.trunc_subsecs(0),
            band,
            mode,
        }
    }
}

/// Authoritative local QSO with one confirmation slot per provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QsoRecord {
    /// Identity key.
    pub key: QsoKey,
    /// Frequency in Hz, when known.
    pub freq_hz: Option<u64>,
    /// Confirmation status per provider.
    pub confirmations: BTreeMap<ProviderId, ConfirmationStatus>,
    /// Opaque metadata last reported by each provider.
    #[serde(default)]
    pub provider_meta: BTreeMap<ProviderId, ProviderMeta>,
}

impl QsoRecord {
    /// New record with every provider slot `Unconfirmed`.
    pub fn new(key: QsoKey, freq_hz: Option<u64>) -> Self {
        let confirmations = ProviderId::ALL
            .iter()
            .map(|p| (*p, ConfirmationStatus::Unconfirmed))
            .collect();
        Self {
            key,
            freq_hz,
            confirmations,
            provider_meta: BTreeMap::new(),
        }
    }

    /// Status of one provider's slot; missing slots read as `Unconfirmed`.
    pub fn status(&self, provider: ProviderId) -> ConfirmationStatus {
        self.confirmations
            .get(&provider)
            .copied()
            .unwrap_or_default()
    }

    /// Builder-style slot override, handy for seeding logs.
    pub fn with_status(mut self, provider: ProviderId, status: ConfirmationStatus) -> Self {
        self.confirmations.insert(provider, status);
        self
    }

    /// Fills in any provider slot missing after deserialization.
    pub fn fill_missing_slots(&mut self) {
        for p in ProviderId::ALL {
            self.confirmations.entry(p).or_default();
        }
    }
}

/// A record as reported by one provider pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRecord {
    /// Identity key.
    pub key: QsoKey,
    /// Frequency in Hz, when reported.
    pub freq_hz: Option<u64>,
    /// Reporting provider.
    pub provider: ProviderId,
    /// Status according to that provider.
    pub status: ConfirmationStatus,
    /// Provider-specific fields, carried through untouched.
    pub meta: ProviderMeta,
}

/// Collects records into a [`QsoSet`]; later duplicates replace earlier ones.
pub fn to_set(records: impl IntoIterator<Item = QsoRecord>) -> QsoSet {
    records
        .into_iter()
        .map(|mut rec| {
            rec.fill_missing_slots();
            (rec.key.clone(), rec)
        })
        .collect()
}
