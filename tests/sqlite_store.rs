use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use uuid::Uuid;

use qsosync::{
    engine::Dispute,
    persist::{LogStore, PersistError, StateStore, sqlite::SqliteStore},
    qso::{QsoKey, QsoRecord},
    run::{RunAccumulator, RunStatus},
    state::{Cursor, SyncWatermark, WatermarkStatus},
    types::{Band, ConfirmationStatus, Mode, ProviderId, SyncMode},
};

fn record(remote: &str, minute: u32) -> QsoRecord {
    let key = QsoKey::new(
        "KI7MT",
        remote,
        Utc.with_ymd_and_hms(2024, 3, 1, 18, minute, 0).unwrap(),
        Band::B40m,
        Mode::new("CW"),
    );
    QsoRecord::new(key, Some(7_020_000))
}

#[test]
fn log_survives_reopen_with_version() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("sync.db");

    let written = {
        let store = SqliteStore::open(&db_path).expect("open");
        let mut rec =
            record("K1ABC", 1).with_status(ProviderId::Lotw, ConfirmationStatus::Confirmed);
        rec.provider_meta.insert(
            ProviderId::Lotw,
            [("APP_LOTW_RXQSL".to_string(), "2024-03-02".to_string())].into_iter().collect(),
        );
        let v1 = store.commit(0, &[rec.clone(), record("W1AW", 2)]).expect("commit");
        assert_eq!(v1, 1);
        store.load_all().expect("load")
    };

    let reopened = SqliteStore::open(&db_path).expect("reopen");
    let loaded = reopened.load_all().expect("load");
    assert_eq!(loaded, written);
    assert_eq!(loaded.version, 1);
    assert_eq!(reopened.version().expect("version"), 1);
    assert_eq!(loaded.records.len(), 2);
}

#[test]
fn stale_commit_is_rejected() {
    let store = SqliteStore::open_in_memory().expect("open");
    store.commit(0, &[record("K1ABC", 1)]).expect("first commit");

    let err = store.commit(0, &[record("W1AW", 2)]).unwrap_err();
    assert!(matches!(
        err,
        PersistError::ConcurrentModification { expected: 0, actual: 1 }
    ));
    assert_eq!(store.load_all().expect("load").records.len(), 1);
}

#[test]
fn sync_state_survives_reopen() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("sync.db");
    let run_id = Uuid::new_v4();

    {
        let store = SqliteStore::open(&db_path).expect("open");
        let wm = SyncWatermark::beginning(ProviderId::Qrz).advanced(
            Cursor::At("4711".to_string()),
            WatermarkStatus::Partial,
            Utc::now(),
        );
        store.save_watermark(&wm).expect("save watermark");

        let first = RunAccumulator::start(SyncMode::Pull, vec![ProviderId::Qrz]).finish();
        let second = RunAccumulator::start(SyncMode::Both, vec![ProviderId::Qrz]).finish();
        store.append_run(&first).expect("append");
        store.append_run(&second).expect("append");

        let rec = record("K1ABC", 1);
        store
            .record_disputes(
                run_id,
                &[Dispute {
                    key: rec.key,
                    provider: ProviderId::Lotw,
                    previous: ConfirmationStatus::Confirmed,
                    reported: ConfirmationStatus::Unconfirmed,
                    resolved: ConfirmationStatus::Disputed,
                }],
            )
            .expect("disputes");
    }

    let store = SqliteStore::open(&db_path).expect("reopen");
    let wm = store.load_watermark(ProviderId::Qrz).expect("load").expect("present");
    assert_eq!(wm.cursor, Cursor::At("4711".to_string()));
    assert_eq!(wm.status, WatermarkStatus::Partial);
    assert!(store.load_watermark(ProviderId::Eqsl).expect("load").is_none());

    let runs = store.recent_runs(10).expect("runs");
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].mode, SyncMode::Both);
    assert_eq!(runs[1].status, RunStatus::Partial);

    assert_eq!(store.disputes(None).expect("disputes").len(), 1);
    assert_eq!(store.disputes(Some(ProviderId::Lotw)).expect("disputes")[0].run_id, run_id);
    assert!(store.disputes(Some(ProviderId::Eqsl)).expect("disputes").is_empty());
}
