use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::{
    qso::{ProviderMeta, ProviderRecord, QsoKey, QsoRecord, QsoSet},
    types::{ConfirmationStatus, ProviderId},
};

/// Audit entry for a slot that moved into `disputed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    /// Affected QSO.
    pub key: QsoKey,
    /// Provider whose report conflicted.
    pub provider: ProviderId,
    /// Slot value before the merge.
    pub previous: ConfirmationStatus,
    /// Value the provider reported.
    pub reported: ConfirmationStatus,
    /// Value stored after the merge.
    pub resolved: ConfirmationStatus,
}

/// Per-merge record tallies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MergeCounts {
    /// Keys not previously in the local set.
    pub added: usize,
    /// Existing keys whose record changed.
    pub updated: usize,
    /// Existing keys left as they were.
    pub unchanged: usize,
}

/// Full result of [`reconcile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Merged local set.
    pub set: QsoSet,
    /// Keys inserted or modified, in key order.
    pub changed: Vec<QsoKey>,
    /// Tallies.
    pub counts: MergeCounts,
    /// Slots that entered `disputed` in this merge.
    pub disputes: Vec<Dispute>,
}

impl MergeOutcome {
    /// Records that must be written back to the local store.
    pub fn changed_records(&self) -> Vec<QsoRecord> {
        self.changed
            .iter()
            .filter_map(|k| self.set.get(k).cloned())
            .collect()
    }
}

/// Next slot value for `current` given a provider report of `reported`.
///
/// `confirmed` never silently drops back to `unconfirmed`; `disputed` is
/// sticky until resolved locally.
pub fn transition(current: ConfirmationStatus, reported: ConfirmationStatus) -> ConfirmationStatus {
    use ConfirmationStatus::*;
    match (current, reported) {
        (Unconfirmed, r) => r,
        (Confirmed, Confirmed) => Confirmed,
        (Confirmed, Unconfirmed) | (Confirmed, Disputed) => Disputed,
        (Disputed, _) => Disputed,
    }
}

struct Collapsed<'a> {
    status: ConfirmationStatus,
    freq_hz: Option<u64>,
    meta: &'a ProviderMeta,
}

/// Merges one provider's batch into `local`. Pure; see [`reconcile`].
pub fn merge(local: &QsoSet, incoming: &[ProviderRecord], provider: ProviderId) -> QsoSet {
    reconcile(local, incoming, provider).set
}

/// Merges one provider's batch into `local` and reports what changed.
///
/// Records reported for a different provider are ignored. Duplicate keys in
/// the batch collapse first: the strongest status wins, the last occurrence
/// supplies metadata and frequency.
pub fn reconcile(
    local: &QsoSet,
    incoming: &[ProviderRecord],
    provider: ProviderId,
) -> MergeOutcome {
    let mut batch: HashMap<&QsoKey, Collapsed<'_>> = HashMap::new();
    for rec in incoming.iter().filter(|r| r.provider == provider) {
        batch
            .entry(&rec.key)
            .and_modify(|c| {
                c.status = c.status.max(rec.status);
                c.freq_hz = rec.freq_hz.or(c.freq_hz);
                c.meta = &rec.meta;
            })
            .or_insert(Collapsed {
                status: rec.status,
                freq_hz: rec.freq_hz,
                meta: &rec.meta,
            });
    }

    let mut set = local.clone();
    let mut changed = Vec::new();
    let mut counts = MergeCounts::default();
    let mut disputes = Vec::new();

    for (key, c) in batch {
        match set.get_mut(key) {
            None => {
                if c.status == ConfirmationStatus::Disputed {
                    disputes.push(Dispute {
                        key: key.clone(),
                        provider,
                        previous: ConfirmationStatus::Unconfirmed,
                        reported: c.status,
                        resolved: c.status,
                    });
                }
                let mut rec = QsoRecord::new(key.clone(), c.freq_hz)
                    .with_status(provider, c.status);
                if !c.meta.is_empty() {
                    rec.provider_meta.insert(provider, c.meta.clone());
                }
                set.insert(key.clone(), rec);
                changed.push(key.clone());
                counts.added += 1;
            }
            Some(rec) => {
                let before = rec.clone();
                let current = rec.status(provider);
                let next = transition(current, c.status);
                if next == ConfirmationStatus::Disputed && current != ConfirmationStatus::Disputed {
                    disputes.push(Dispute {
                        key: key.clone(),
                        provider,
                        previous: current,
                        reported: c.status,
                        resolved: next,
                    });
                }
                rec.confirmations.insert(provider, next);
                if rec.freq_hz.is_none() {
                    rec.freq_hz = c.freq_hz;
                }
                if !c.meta.is_empty() {
                    rec.provider_meta.insert(provider, c.meta.clone());
                }
                rec.fill_missing_slots();

                if *rec != before {
                    changed.push(key.clone());
                    counts.updated += 1;
                } else {
                    counts.unchanged += 1;
                }
            }
        }
    }

    changed.sort();
    disputes.sort_by(|a, b| a.key.cmp(&b.key));

    MergeOutcome {
        set,
        changed,
        counts,
        disputes,
    }
}
