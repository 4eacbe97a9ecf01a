use std::sync::Mutex;

use chrono::Utc;
use hashbrown::HashMap;
use uuid::Uuid;

use crate::{
    engine::Dispute,
    run::SyncRun,
    state::SyncWatermark,
    types::ProviderId,
};

use super::{DisputeEntry, PersistError, PersistResult, StateStore};

#[derive(Debug, Default)]
struct Inner {
    watermarks: HashMap<ProviderId, SyncWatermark>,
    runs: Vec<SyncRun>,
    disputes: Vec<DisputeEntry>,
}

/// Process-local [`StateStore`], for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: Mutex<Inner>,
}

impl MemoryStateStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> PersistResult<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| PersistError::Message("state store lock poisoned".to_string()))
    }
}

impl StateStore for MemoryStateStore {
    fn load_watermark(&self, provider: ProviderId) -> PersistResult<Option<SyncWatermark>> {
        Ok(self.lock()?.watermarks.get(&provider).cloned())
    }

    fn save_watermark(&self, watermark: &SyncWatermark) -> PersistResult<()> {
        self.lock()?
            .watermarks
            .insert(watermark.provider, watermark.clone());
        Ok(())
    }

    fn append_run(&self, run: &SyncRun) -> PersistResult<()> {
        self.lock()?.runs.push(run.clone());
        Ok(())
    }

    fn recent_runs(&self, limit: usize) -> PersistResult<Vec<SyncRun>> {
        Ok(self.lock()?.runs.iter().rev().take(limit).cloned().collect())
    }

    fn record_disputes(&self, run_id: Uuid, disputes: &[Dispute]) -> PersistResult<()> {
        let recorded_at = Utc::now();
        self.lock()?
            .disputes
            .extend(disputes.iter().cloned().map(|dispute| DisputeEntry {
                run_id,
                recorded_at,
                dispute,
            }));
        Ok(())
    }

    fn disputes(&self, provider: Option<ProviderId>) -> PersistResult<Vec<DisputeEntry>> {
        Ok(self
            .lock()?
            .disputes
            .iter()
            .filter(|e| provider.is_none_or(|p| e.dispute.provider == p))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::{
        qso::QsoKey,
        types::{Band, ConfirmationStatus, Mode},
    };

    fn dispute(provider: ProviderId, remote: &str) -> Dispute {
        Dispute {
            key: QsoKey::new(
                "KI7MT",
                remote,
                Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
                Band::B20m,
                Mode::new("CW"),
            ),
            provider,
            previous: ConfirmationStatus::Confirmed,
            reported: ConfirmationStatus::Unconfirmed,
            resolved: ConfirmationStatus::Disputed,
        }
    }

    #[test]
    fn dispute_trail_is_kept_per_run_and_filtered_by_provider() {
        let store = MemoryStateStore::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        store
            .record_disputes(first, &[dispute(ProviderId::Lotw, "K1ABC")])
            .unwrap();
        store
            .record_disputes(
                second,
                &[dispute(ProviderId::Eqsl, "W1AW"), dispute(ProviderId::Lotw, "N0CALL")],
            )
            .unwrap();

        let all = store.disputes(None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].run_id, first);

        let lotw = store.disputes(Some(ProviderId::Lotw)).unwrap();
        assert_eq!(lotw.len(), 2);
        assert_eq!(lotw[1].run_id, second);
        assert_eq!(lotw[1].dispute.key.remote, "N0CALL");
    }
}
