//! SQLite-backed durable timer store: survives restarts.

use async_trait::async_trait;
use chime_core::{ChimeError, Result};
use chrono::{DateTime, NaiveDateTime};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::store::{TimerFilter, TimerStore};
use crate::timer::{Timer, TimerPayload};


const COLUMNS: &str = "id, event, extra, created, expires, author_id";

// NULL parameters match every row.
const FILTER: &str = "(?1 IS NULL OR id = ?1) AND (?2 IS NULL OR event = ?2) AND (?3 IS NULL OR author_id = ?3)";

/// SQLite timer store. Blocking calls run on tokio's blocking pool.
#[derive(Clone)]
pub struct SqliteTimerStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTimerStore {
    /// Open or create the timer database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| ChimeError::Store(format!("DB open: {e}")))?;
        // WAL lets producers write while the loop reads.
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        Self::with_connection(conn)
    }

    /// Private in-memory database (not durable).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| ChimeError::Store(format!("DB open: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| ChimeError::Store(format!("{op}: lock poisoned: {e}")))?;
            f(&conn).map_err(|e| ChimeError::Store(format!("{op}: {e}")))
        })
        .await
        .map_err(|e| ChimeError::Store(format!("{op}: blocking task failed: {e}")))?
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS timers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event TEXT NOT NULL,
            extra TEXT NOT NULL DEFAULT '{}',   -- JSON: {\"args\": [...], \"kwargs\": {...}}
            created INTEGER NOT NULL,           -- UTC microseconds since the epoch
            expires INTEGER NOT NULL,           -- UTC microseconds since the epoch
            author_id INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_timers_expires ON timers (expires, id);
        CREATE INDEX IF NOT EXISTS idx_timers_owner ON timers (event, author_id);
        ",
    )
    .map_err(|e| ChimeError::Store(format!("Migration: {e}")))
}

/// Integer microseconds keep SQLite ordering numeric for every representable year.
fn to_micros(ts: &NaiveDateTime) -> i64 {
    ts.and_utc().timestamp_micros()
}

fn from_micros(idx: usize, micros: i64) -> rusqlite::Result<NaiveDateTime> {
    DateTime::from_timestamp_micros(micros)
        .map(|ts| ts.naive_utc())
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, micros))
}

fn row_to_timer(row: &rusqlite::Row<'_>) -> rusqlite::Result<Timer> {
    let id: i64 = row.get(0)?;
    let event: String = row.get(1)?;
    let extra: String = row.get(2)?;
    let created: i64 = row.get(3)?;
    let expires: i64 = row.get(4)?;
    let author_id: i64 = row.get(5)?;

    let payload = TimerPayload::from_json(&extra).unwrap_or_else(|e| {
        tracing::warn!("⚠️ Timer #{id} has an unreadable payload, dispatching without it: {e}");
        TimerPayload::default()
    });

    Ok(Timer {
        id: Some(id),
        event,
        created_at: from_micros(3, created)?,
        expires_at: from_micros(4, expires)?,
        author_id,
        payload,
    })
}

fn filter_params(filter: &TimerFilter) -> (Option<i64>, Option<String>, Option<i64>) {
    (filter.id, filter.event.clone(), filter.author_id)
}

#[async_trait]
impl TimerStore for SqliteTimerStore {
    async fn find_earliest(&self, before: NaiveDateTime) -> Result<Option<Timer>> {
        let before = to_micros(&before);
        self.run("Find earliest", move |conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM timers WHERE expires < ?1 ORDER BY expires, id LIMIT 1"),
                [before],
                row_to_timer,
            )
            .optional()
        })
        .await
    }

    async fn insert(&self, timer: &Timer) -> Result<i64> {
        let extra = timer.payload.to_json()?;
        let event = timer.event.clone();
        let created = to_micros(&timer.created_at);
        let expires = to_micros(&timer.expires_at);
        let author_id = timer.author_id;
        self.run("Insert timer", move |conn| {
            conn.execute(
                "INSERT INTO timers (event, extra, created, expires, author_id) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![event, extra, created, expires, author_id],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn delete_by_id(&self, id: i64) -> Result<bool> {
        self.run("Delete timer", move |conn| {
            conn.execute("DELETE FROM timers WHERE id = ?1", [id]).map(|n| n > 0)
        })
        .await
    }

    async fn delete_matching(&self, filter: &TimerFilter) -> Result<u64> {
        let (id, event, author) = filter_params(filter);
        self.run("Delete timers", move |conn| {
            conn.execute(&format!("DELETE FROM timers WHERE {FILTER}"), params![id, event, author])
                .map(|n| n as u64)
        })
        .await
    }

    async fn count_pending(&self, filter: &TimerFilter) -> Result<u64> {
        let (id, event, author) = filter_params(filter);
        self.run("Count timers", move |conn| {
            conn.query_row(
                &format!("SELECT COUNT(*) FROM timers WHERE {FILTER}"),
                params![id, event, author],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n.max(0) as u64)
        })
        .await
    }

    async fn list_pending(&self, filter: &TimerFilter, limit: usize) -> Result<Vec<Timer>> {
        let (id, event, author) = filter_params(filter);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.run("List timers", move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM timers WHERE {FILTER} ORDER BY expires, id LIMIT ?4"
            ))?;
            let rows = stmt.query_map(params![id, event, author, limit], row_to_timer)?;
            let timers = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(timers)
        })
        .await
    }
}
