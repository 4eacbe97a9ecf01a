//! SQLite-backed local log and sync state.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    engine::Dispute,
    qso::{QsoRecord, to_set},
    run::{RUN_FORMAT_VERSION, SyncRun, SyncRunEnvelope},
    state::SyncWatermark,
    types::{LogVersion, ProviderId},
};

use super::{DisputeEntry, LogSnapshot, LogStore, PersistError, PersistResult, StateStore};

const RECORD_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordEnvelope {
    format_version: u16,
    record: QsoRecord,
}

/// SQLite implementation of [`LogStore`] and [`StateStore`] over one database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens or creates a database at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory database.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> PersistResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PersistError::Message("sqlite connection lock poisoned".to_string()))
    }

    /// Current log version.
    pub fn version(&self) -> PersistResult<LogVersion> {
        let conn = self.lock()?;
        read_version(&conn)
    }
}

impl LogStore for SqliteStore {
    fn load_all(&self) -> PersistResult<LogSnapshot> {
        let conn = self.lock()?;
        let version = read_version(&conn)?;

        let mut stmt = conn.prepare("SELECT payload FROM qsos")?;
        let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;
        let mut records = Vec::new();
        for payload in rows {
            let env: RecordEnvelope = serde_json::from_slice(&payload?)?;
            if env.format_version != RECORD_FORMAT_VERSION {
                return Err(PersistError::Message(format!(
                    "unsupported record format version: {}",
                    env.format_version
                )));
            }
            records.push(env.record);
        }

        Ok(LogSnapshot {
            version,
            records: to_set(records),
        })
    }

    fn commit(&self, base_version: LogVersion, records: &[QsoRecord]) -> PersistResult<LogVersion> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let actual = read_version(&tx)?;
        if actual != base_version {
            return Err(PersistError::ConcurrentModification {
                expected: base_version,
                actual,
            });
        }
        if records.is_empty() {
            return Ok(actual);
        }

        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO qsos(operator, remote, start_ts, band, mode, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for rec in records {
                let payload = serde_json::to_vec(&RecordEnvelope {
                    format_version: RECORD_FORMAT_VERSION,
                    record: rec.clone(),
                })?;
                stmt.execute(params![
                    rec.key.operator,
                    rec.key.remote,
                    rec.key.start.timestamp(),
                    rec.key.band.as_adif(),
                    rec.key.mode.as_str(),
                    payload,
                ])?;
            }
        }

        let next = actual + 1;
        tx.execute("UPDATE log_meta SET version = ?1 WHERE id = 1", params![next as i64])?;
        tx.commit()?;
        Ok(next)
    }
}

impl StateStore for SqliteStore {
    fn load_watermark(&self, provider: ProviderId) -> PersistResult<Option<SyncWatermark>> {
        let conn = self.lock()?;
        let payload: Option<Vec<u8>> = conn
            .query_row(
                "SELECT payload FROM watermarks WHERE provider = ?1",
                params![provider.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match payload {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save_watermark(&self, watermark: &SyncWatermark) -> PersistResult<()> {
        let payload = serde_json::to_vec(watermark)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO watermarks(provider, payload) VALUES (?1, ?2)",
            params![watermark.provider.as_str(), payload],
        )?;
        Ok(())
    }

    fn append_run(&self, run: &SyncRun) -> PersistResult<()> {
        let payload = serde_json::to_vec(&SyncRunEnvelope::new(run.clone()))?;
        let status = serde_json::to_string(&run.status)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO runs(id, started_ms, status, payload) VALUES (?1, ?2, ?3, ?4)",
            params![
                run.id.to_string(),
                run.started_at.timestamp_millis(),
                status.trim_matches('"'),
                payload,
            ],
        )?;
        Ok(())
    }

    fn recent_runs(&self, limit: usize) -> PersistResult<Vec<SyncRun>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT payload FROM runs ORDER BY started_ms DESC, rowid DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, Vec<u8>>(0))?;
        let mut out = Vec::new();
        for payload in rows {
            let env: SyncRunEnvelope = serde_json::from_slice(&payload?)?;
            if env.format_version != RUN_FORMAT_VERSION {
                return Err(PersistError::Message(format!(
                    "unsupported run format version: {}",
                    env.format_version
                )));
            }
            out.push(env.run);
        }
        Ok(out)
    }

    fn record_disputes(&self, run_id: Uuid, disputes: &[Dispute]) -> PersistResult<()> {
        if disputes.is_empty() {
            return Ok(());
        }
        let recorded_at = Utc::now();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO disputes(run_id, provider, recorded_ms, payload)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for dispute in disputes {
                let entry = DisputeEntry {
                    run_id,
                    recorded_at,
                    dispute: dispute.clone(),
                };
                stmt.execute(params![
                    run_id.to_string(),
                    dispute.provider.as_str(),
                    recorded_at.timestamp_millis(),
                    serde_json::to_vec(&entry)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn disputes(&self, provider: Option<ProviderId>) -> PersistResult<Vec<DisputeEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT payload FROM disputes WHERE ?1 IS NULL OR provider = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![provider.map(|p| p.as_str())], |row| {
            row.get::<_, Vec<u8>>(0)
        })?;
        let mut out = Vec::new();
        for payload in rows {
            out.push(serde_json::from_slice(&payload?)?);
        }
        Ok(out)
    }
}

fn read_version(conn: &Connection) -> PersistResult<LogVersion> {
    let version: i64 = conn.query_row("SELECT version FROM log_meta WHERE id = 1", [], |row| {
        row.get(0)
    })?;
    Ok(version as LogVersion)
}
