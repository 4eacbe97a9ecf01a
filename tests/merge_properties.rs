use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use qsosync::{
    engine::{merge, reconcile},
    qso::{ProviderRecord, QsoKey, QsoRecord, QsoSet, to_set},
    types::{Band, ConfirmationStatus, Mode, ProviderId},
};

fn key(idx: u8) -> QsoKey {
    let start =
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(i64::from(idx));
    QsoKey::new("KI7MT", &format!("K{idx}AA"), start, Band::B20m, Mode::new("CW"))
}

fn status(n: u8) -> ConfirmationStatus {
    match n % 3 {
        0 => ConfirmationStatus::Unconfirmed,
        1 => ConfirmationStatus::Confirmed,
        _ => ConfirmationStatus::Disputed,
    }
}

fn local_strategy() -> impl Strategy<Value = QsoSet> {
    prop::collection::vec((0u8..12, prop::array::uniform4(0u8..3)), 0..12).prop_map(|rows| {
        to_set(rows.into_iter().map(|(idx, slots)| {
            ProviderId::ALL
                .iter()
                .zip(slots)
                .fold(QsoRecord::new(key(idx), None), |rec, (p, s)| rec.with_status(*p, status(s)))
        }))
    })
}

fn batch_strategy(
    provider: ProviderId,
    keys: std::ops::Range<u8>,
) -> impl Strategy<Value = Vec<ProviderRecord>> {
    let row = (keys, 0u8..3, prop::option::of(7_000_000u64..30_000_000));
    prop::collection::vec(row, 0..16).prop_map(move |rows| {
        rows.into_iter()
            .map(|(idx, s, freq_hz)| ProviderRecord {
                key: key(idx),
                freq_hz,
                provider,
                status: status(s),
                meta: [("APP_SEEN".to_string(), idx.to_string())].into_iter().collect(),
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn merge_is_idempotent(
        local in local_strategy(),
        batch in batch_strategy(ProviderId::Lotw, 0..16),
    ) {
        let once = merge(&local, &batch, ProviderId::Lotw);
        let twice = reconcile(&once, &batch, ProviderId::Lotw);
        prop_assert_eq!(&twice.set, &once);
        prop_assert!(twice.changed.is_empty());
        prop_assert_eq!(twice.counts.added, 0);
        prop_assert_eq!(twice.counts.updated, 0);
    }

    #[test]
    fn merge_commutes_across_providers_on_disjoint_keys(
        local in local_strategy(),
        a in batch_strategy(ProviderId::Eqsl, 0..8),
        b in batch_strategy(ProviderId::Qrz, 8..16),
    ) {
        let ab = merge(&merge(&local, &a, ProviderId::Eqsl), &b, ProviderId::Qrz);
        let ba = merge(&merge(&local, &b, ProviderId::Qrz), &a, ProviderId::Eqsl);
        prop_assert_eq!(ab, ba);
    }

    #[test]
    fn confirmations_never_silently_regress(
        local in local_strategy(),
        batch in batch_strategy(ProviderId::Clublog, 0..16),
    ) {
        let outcome = reconcile(&local, &batch, ProviderId::Clublog);
        for (k, before) in &local {
            let after = outcome.set.get(k);
            prop_assert!(after.is_some(), "record {:?} lost", k);
            let after = after.unwrap();
            for p in ProviderId::ALL {
                if p != ProviderId::Clublog {
                    prop_assert_eq!(before.status(p), after.status(p));
                }
            }
            match before.status(ProviderId::Clublog) {
                ConfirmationStatus::Confirmed => prop_assert_ne!(
                    after.status(ProviderId::Clublog),
                    ConfirmationStatus::Unconfirmed
                ),
                ConfirmationStatus::Disputed => prop_assert_eq!(
                    after.status(ProviderId::Clublog),
                    ConfirmationStatus::Disputed
                ),
                ConfirmationStatus::Unconfirmed => {}
            }
            if before.freq_hz.is_some() {
                prop_assert_eq!(before.freq_hz, after.freq_hz);
            }
        }
        prop_assert_eq!(
            outcome.counts.added + outcome.counts.updated,
            outcome.changed.len()
        );
    }
}

#[test]
fn downgrade_of_confirmed_slot_is_recorded_as_dispute() {
    let local = to_set([QsoRecord::new(key(1), Some(14_025_000))
        .with_status(ProviderId::Lotw, ConfirmationStatus::Confirmed)]);
    let batch = vec![ProviderRecord {
        key: key(1),
        freq_hz: None,
        provider: ProviderId::Lotw,
        status: ConfirmationStatus::Unconfirmed,
        meta: Default::default(),
    }];

    let outcome = reconcile(&local, &batch, ProviderId::Lotw);
    assert_eq!(outcome.disputes.len(), 1);
    assert_eq!(outcome.disputes[0].resolved, ConfirmationStatus::Disputed);
    assert_eq!(outcome.set[&key(1)].status(ProviderId::Lotw), ConfirmationStatus::Disputed);
    assert_eq!(outcome.counts.updated, 1);
}

#[test]
fn records_for_other_providers_are_ignored() {
    let batch = vec![ProviderRecord {
        key: key(2),
        freq_hz: None,
        provider: ProviderId::Eqsl,
        status: ConfirmationStatus::Confirmed,
        meta: Default::default(),
    }];
    let outcome = reconcile(&QsoSet::new(), &batch, ProviderId::Qrz);
    assert!(outcome.set.is_empty());
}
