use chrono::{Duration, TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use qsosync::{
    engine::reconcile,
    qso::{ProviderRecord, QsoKey, QsoRecord, QsoSet, to_set},
    types::{Band, ConfirmationStatus, Mode, ProviderId},
};

fn key(i: u64) -> QsoKey {
    let start =
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(i as i64 * 90);
    QsoKey::new("KI7MT", &format!("K{i}AA"), start, Band::B20m, Mode::new("FT8"))
}

fn local_log(n: u64) -> QsoSet {
    to_set((0..n).map(|i| QsoRecord::new(key(i), Some(14_074_000))))
}

fn batch(n: u64, provider: ProviderId) -> Vec<ProviderRecord> {
    (0..n)
        .map(|i| ProviderRecord {
            key: key(i * 2),
            freq_hz: Some(14_074_000),
            provider,
            status: if i % 3 == 0 {
                ConfirmationStatus::Unconfirmed
            } else {
                ConfirmationStatus::Confirmed
            },
            meta: [("QSL_RCVD".to_string(), "Y".to_string())].into_iter().collect(),
        })
        .collect()
}

fn bench_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile");
    for size in [1_000u64, 10_000, 50_000] {
        let local = local_log(size);
        let incoming = batch(size / 2, ProviderId::Lotw);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| reconcile(&local, &incoming, ProviderId::Lotw));
        });
    }
    group.finish();
}

fn bench_repeat_pass(c: &mut Criterion) {
    let local = local_log(20_000);
    let incoming = batch(10_000, ProviderId::Eqsl);
    let merged = reconcile(&local, &incoming, ProviderId::Eqsl).set;
    c.bench_function("reconcile_no_op_20k", |b| {
        b.iter(|| reconcile(&merged, &incoming, ProviderId::Eqsl));
    });
}

criterion_group!(benches, bench_reconcile, bench_repeat_pass);
criterion_main!(benches);
