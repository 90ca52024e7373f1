use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

use crate::config::WatchConfig;
use crate::models::{
    CheckCommit, FailureRecord, NormalizedText, Snapshot, Watch, WatchId, WatchState,
};
use crate::storage::{Storage, StoreError};

pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    pub fn new(db_path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(id: &WatchId, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(id.clone(), format!("bad timestamp '{}': {}", raw, e)))
}

struct WatchRow {
    id: String,
    url: String,
    config: String,
    state: String,
    created_at: String,
    last_checked_at: Option<String>,
    next_due_at: String,
    last_error: Option<String>,
}

/// Newest first, at most `limit` snapshots.
fn recent_snapshots(
    conn: &Connection,
    id: &WatchId,
    limit: usize,
) -> Result<Vec<Snapshot>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT text, fingerprint, fetched_at FROM snapshots
         WHERE watch_id = ?1 ORDER BY seq DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![&id.0, limit as i64], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut snapshots = Vec::new();
    for row in rows {
        let (text, fingerprint, fetched_at) = row?;
        let snapshot = Snapshot::new(NormalizedText(text), parse_ts(id, &fetched_at)?);
        if snapshot.fingerprint().0 != fingerprint {
            return Err(StoreError::Corrupt(id.clone(), "snapshot fingerprint mismatch".to_string()));
        }
        snapshots.push(snapshot);
    }
    Ok(snapshots)
}

fn row_to_watch(conn: &Connection, row: WatchRow) -> Result<Watch, StoreError> {
    let id = WatchId(row.id);
    let state = WatchState::from_key(&row.state)
        .ok_or_else(|| StoreError::Corrupt(id.clone(), format!("unknown state '{}'", row.state)))?;
    let config: WatchConfig = serde_json::from_str(&row.config)?;

    let mut recent = recent_snapshots(conn, &id, 2)?.into_iter();
    let last_snapshot = recent.next();
    let previous_snapshot = recent.next();

    Ok(Watch {
        url: row.url,
        config,
        last_snapshot,
        previous_snapshot,
        state,
        created_at: parse_ts(&id, &row.created_at)?,
        last_checked_at: row
            .last_checked_at
            .as_deref()
            .map(|raw| parse_ts(&id, raw))
            .transpose()?,
        next_due_at: parse_ts(&id, &row.next_due_at)?,
        last_error: row.last_error,
        id,
    })
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS watches (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                config TEXT NOT NULL,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_checked_at TEXT,
                next_due_at TEXT NOT NULL,
                last_error TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS snapshots (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                watch_id TEXT NOT NULL,
                text TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                fetched_at TEXT NOT NULL
            )",
            [],
        )?;

        // Create index for faster lookups
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_snapshots_watch ON snapshots(watch_id, seq)",
            [],
        )?;

        info!("Database migration completed");
        Ok(())
    }

    async fn insert_watch(&self, watch: &Watch) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let config = serde_json::to_string(&watch.config)?;

        conn.execute(
            "INSERT INTO watches (id, url, config, state, created_at, last_checked_at, next_due_at, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                &watch.id.0,
                &watch.url,
                config,
                watch.state.key(),
                format_ts(watch.created_at),
                watch.last_checked_at.map(format_ts),
                format_ts(watch.next_due_at),
                &watch.last_error,
            ],
        )?;

        Ok(())
    }

    async fn update_config(&self, id: &WatchId, config: &WatchConfig) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let config = serde_json::to_string(config)?;

        let updated = conn.execute(
            "UPDATE watches SET config = ?2 WHERE id = ?1",
            params![&id.0, config],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(id.clone()));
        }
        Ok(())
    }

    async fn load_watches(&self) -> Result<Vec<Watch>, StoreError> {
        let conn = self.lock()?;

        let rows = {
            let mut stmt = conn.prepare(
                "SELECT id, url, config, state, created_at, last_checked_at, next_due_at, last_error
                 FROM watches ORDER BY created_at, id",
            )?;
            let mapped = stmt.query_map([], |row| {
                Ok(WatchRow {
                    id: row.get(0)?,
                    url: row.get(1)?,
                    config: row.get(2)?,
                    state: row.get(3)?,
                    created_at: row.get(4)?,
                    last_checked_at: row.get(5)?,
                    next_due_at: row.get(6)?,
                    last_error: row.get(7)?,
                })
            })?;
            mapped.collect::<Result<Vec<_>, _>>()?
        };

        rows.into_iter().map(|row| row_to_watch(&conn, row)).collect()
    }

    async fn load_last(&self, id: &WatchId) -> Result<Option<Snapshot>, StoreError> {
        let conn = self.lock()?;
        Ok(recent_snapshots(&conn, id, 1)?.into_iter().next())
    }

    async fn commit(&self, id: &WatchId, commit: &CheckCommit) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE watches SET state = ?2, last_checked_at = ?3, next_due_at = ?4, last_error = NULL
             WHERE id = ?1",
            params![
                &id.0,
                commit.state.key(),
                format_ts(commit.checked_at),
                format_ts(commit.next_due_at),
            ],
        )?;
        if updated == 0 {
            // Dropping the transaction rolls it back.
            return Err(StoreError::NotFound(id.clone()));
        }

        tx.execute(
            "INSERT INTO snapshots (watch_id, text, fingerprint, fetched_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                &id.0,
                commit.snapshot.text().as_str(),
                &commit.snapshot.fingerprint().0,
                format_ts(commit.snapshot.fetched_at()),
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    async fn record_failure(&self, id: &WatchId, record: &FailureRecord) -> Result<(), StoreError> {
        let conn = self.lock()?;

        let updated = conn.execute(
            "UPDATE watches SET last_checked_at = ?2, next_due_at = ?3, last_error = ?4 WHERE id = ?1",
            params![
                &id.0,
                format_ts(record.checked_at),
                format_ts(record.next_due_at),
                &record.error,
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(id.clone()));
        }
        Ok(())
    }

    async fn set_state(&self, id: &WatchId, state: WatchState) -> Result<(), StoreError> {
        let conn = self.lock()?;

        let updated = conn.execute(
            "UPDATE watches SET state = ?2 WHERE id = ?1",
            params![&id.0, state.key()],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(id.clone()));
        }
        Ok(())
    }

    async fn delete(&self, id: &WatchId) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM snapshots WHERE watch_id = ?1", params![&id.0])?;
        let deleted = tx.execute("DELETE FROM watches WHERE id = ?1", params![&id.0])?;
        if deleted == 0 {
            return Err(StoreError::NotFound(id.clone()));
        }

        tx.commit()?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM snapshots", [])?;
        let deleted = tx.execute("DELETE FROM watches", [])?;

        tx.commit()?;
        info!("Deleted {} watches", deleted);
        Ok(deleted)
    }
}
