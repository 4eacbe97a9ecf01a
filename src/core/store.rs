use std::sync::{Mutex, MutexGuard};

use hashbrown::HashMap;

use crate::{
    persist::{LogSnapshot, LogStore, PersistError, PersistResult},
    qso::{QsoKey, QsoRecord},
    types::LogVersion,
};

/// Versioned QSO log held in memory.
#[derive(Debug, Default)]
pub struct QsoLog {
    records: HashMap<QsoKey, QsoRecord>,
    version: LogVersion,
}

impl QsoLog {
    /// Empty log at version 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a log from seed records; later duplicates replace earlier ones.
    pub fn from_records(records: impl IntoIterator<Item = QsoRecord>) -> Self {
        let mut log = Self::new();
        for rec in records {
            log.upsert(rec);
        }
        log
    }

    /// Current version.
    pub fn version(&self) -> LogVersion {
        self.version
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the log holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record by key.
    pub fn get(&self, key: &QsoKey) -> Option<&QsoRecord> {
        self.records.get(key)
    }

    /// Copies every record out with the current version.
    pub fn export_snapshot(&self) -> LogSnapshot {
        LogSnapshot {
            version: self.version,
            records: crate::qso::to_set(self.records.values().cloned()),
        }
    }

    /// Applies `records` as one versioned write when `base_version` still matches.
    pub fn commit(
        &mut self,
        base_version: LogVersion,
        records: &[QsoRecord],
    ) -> PersistResult<LogVersion> {
        if base_version != self.version {
            return Err(PersistError::ConcurrentModification {
                expected: base_version,
                actual: self.version,
            });
        }
        if records.is_empty() {
            return Ok(self.version);
        }
        for rec in records {
            self.upsert(rec.clone());
        }
        self.version += 1;
        Ok(self.version)
    }

    /// Inserts or replaces one record outside of a commit, bumping the version.
    ///
    /// Stands in for edits made by other writers (UI, logger import).
    pub fn touch(&mut self, rec: QsoRecord) -> LogVersion {
        self.upsert(rec);
        self.version += 1;
        self.version
    }

    fn upsert(&mut self, mut rec: QsoRecord) {
        rec.fill_missing_slots();
        self.records.insert(rec.key.clone(), rec);
    }
}

/// Thread-safe [`LogStore`] over a [`QsoLog`].
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    inner: Mutex<QsoLog>,
}

impl MemoryLogStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `records`.
    pub fn with_records(records: impl IntoIterator<Item = QsoRecord>) -> Self {
        Self {
            inner: Mutex::new(QsoLog::from_records(records)),
        }
    }

    /// Locks the underlying log for direct inspection or out-of-band edits.
    pub fn lock(&self) -> PersistResult<MutexGuard<'_, QsoLog>> {
        self.inner
            .lock()
            .map_err(|_| PersistError::Message("log store lock poisoned".to_string()))
    }
}

impl LogStore for MemoryLogStore {
    fn load_all(&self) -> PersistResult<LogSnapshot> {
        Ok(self.lock()?.export_snapshot())
    }

    fn commit(&self, base_version: LogVersion, records: &[QsoRecord]) -> PersistResult<LogVersion> {
        self.lock()?.commit(base_version, records)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::types::{Band, ConfirmationStatus, Mode, ProviderId};

    fn rec(remote: &str, minute: u32) -> QsoRecord {
        let key = QsoKey::new(
            "KI7MT",
            remote,
            Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap(),
            Band::B20m,
            Mode::new("ft8"),
        );
        QsoRecord::new(key, Some(14_074_000))
    }

    #[test]
    fn stale_commit_is_rejected() {
        let mut log = QsoLog::from_records([rec("K1ABC", 1)]);
        let v0 = log.version();
        log.touch(rec("W1AW", 2));

        let err = log.commit(v0, &[rec("N0CALL", 3)]).unwrap_err();
        assert!(err.is_concurrent_modification());
        assert_eq!(log.len(), 2);

        let v = log.commit(log.version(), &[rec("N0CALL", 3)]).unwrap();
        assert_eq!(v, log.version());
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn seeding_keeps_the_last_duplicate() {
        let confirmed =
            rec("K1ABC", 1).with_status(ProviderId::Eqsl, ConfirmationStatus::Confirmed);
        let log = QsoLog::from_records([rec("k1abc", 1), confirmed.clone()]);
        assert_eq!(log.len(), 1);
        assert_eq!(log.version(), 0);
        assert_eq!(log.get(&confirmed.key), Some(&confirmed));
    }
}
