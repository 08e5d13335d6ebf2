//! SQLite log store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::models::{LogEntry, LogQuery};
use super::store::{LogStore, StoreError};
use crate::site::Line;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

const CREATE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ping_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    site_id TEXT NOT NULL,
    site_name TEXT NOT NULL,
    target TEXT NOT NULL,
    ip TEXT NOT NULL,
    success INTEGER NOT NULL,
    latency REAL,
    error TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_ping_logs_timestamp ON ping_logs(timestamp);
CREATE INDEX IF NOT EXISTS idx_ping_logs_site_timestamp ON ping_logs(site_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_ping_logs_success ON ping_logs(success);
";

/// Columns added after the first release. Applied with ADD COLUMN so that
/// existing history survives the upgrade.
const ADDED_COLUMNS: &[(&str, &str)] = &[
    ("packets_sent", "INTEGER NOT NULL DEFAULT 0"),
    ("packets_recv", "INTEGER NOT NULL DEFAULT 0"),
    ("packets_duplicates", "INTEGER NOT NULL DEFAULT 0"),
    ("packet_loss", "REAL"),
    ("min_latency", "REAL"),
    ("max_latency", "REAL"),
    ("jitter", "REAL"),
    ("isolated", "INTEGER NOT NULL DEFAULT 0"),
];

const SELECT_COLUMNS: &str = "SELECT id, timestamp, site_id, site_name, target, ip, success, latency, error, \
     packets_sent, packets_recv, packets_duplicates, packet_loss, min_latency, max_latency, jitter, isolated \
     FROM ping_logs";

/// Durable store. Every append is committed before it returns, so queries
/// always see it.
pub struct SqliteStore {
    conn: Mutex<Option<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let store = Self {
            conn: Mutex::new(Some(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Create the table and add any columns missing from older databases.
    fn init(&self) -> Result<(), StoreError> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;

        conn.execute_batch(CREATE_SCHEMA)
            .map_err(|e| StoreError::Migration(format!("create schema: {}", e)))?;

        let existing = existing_columns(conn)?;
        for (name, decl) in ADDED_COLUMNS {
            if existing.iter().any(|c| c == name) {
                continue;
            }
            conn.execute_batch(&format!("ALTER TABLE ping_logs ADD COLUMN {} {}", name, decl))
                .map_err(|e| StoreError::Migration(format!("add column {}: {}", name, e)))?;
            tracing::info!("Log store: added column {}", name);
        }

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn select(&self, sql: &str, args: Vec<Value>) -> Result<Vec<LogEntry>, StoreError> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;

        let mut stmt = conn.prepare(sql)?;
        let entries = stmt
            .query_map(params_from_iter(args.iter()), row_to_entry)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(entries)
    }
}

impl LogStore for SqliteStore {
    fn append(&self, entry: LogEntry) -> Result<i64, StoreError> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;

        conn.execute(
            "INSERT INTO ping_logs (timestamp, site_id, site_name, target, ip, success, latency, error, \
             packets_sent, packets_recv, packets_duplicates, packet_loss, min_latency, max_latency, jitter, isolated) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                entry.timestamp.format(TIME_FORMAT).to_string(),
                entry.site_id,
                entry.site_name,
                entry.line.as_str(),
                entry.ip,
                entry.success,
                entry.latency,
                entry.error,
                entry.packets_sent,
                entry.packets_recv,
                entry.packets_duplicates,
                entry.packet_loss,
                entry.min_latency,
                entry.max_latency,
                entry.jitter,
                entry.isolated,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn query(&self, query: &LogQuery) -> Result<Vec<LogEntry>, StoreError> {
        let mut sql = format!("{} WHERE 1=1", SELECT_COLUMNS);
        let mut args: Vec<Value> = Vec::new();

        if let Some(site_id) = &query.site_id {
            sql.push_str(" AND site_id = ?");
            args.push(Value::Text(site_id.clone()));
        }
        if let Some(success) = query.success {
            sql.push_str(" AND success = ?");
            args.push(Value::Integer(success as i64));
        }

        sql.push_str(" ORDER BY timestamp DESC, id DESC");

        if let Some(limit) = query.max_len() {
            sql.push_str(" LIMIT ?");
            args.push(Value::Integer(limit as i64));
        }

        self.select(&sql, args)
    }

    fn all_entries(&self) -> Result<Vec<LogEntry>, StoreError> {
        self.select(&format!("{} ORDER BY timestamp ASC, id ASC", SELECT_COLUMNS), Vec::new())
    }

    fn len(&self) -> Result<usize, StoreError> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM ping_logs", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    fn close(&self) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
        }
        Ok(())
    }
}

fn existing_columns(conn: &Connection) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare("PRAGMA table_info(ping_logs)")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<SqlResult<Vec<_>>>()?;
    Ok(names)
}

fn row_to_entry(row: &Row<'_>) -> SqlResult<LogEntry> {
    let time_str: String = row.get(1)?;
    let timestamp = parse_db_time(&time_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            Type::Text,
            format!("invalid timestamp: {}", time_str).into(),
        )
    })?;

    let target: String = row.get(4)?;
    let line = target
        .parse::<Line>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, e.into()))?;

    let error: Option<String> = row.get(8)?;

    Ok(LogEntry {
        id: row.get(0)?,
        timestamp,
        site_id: row.get(2)?,
        site_name: row.get(3)?,
        line,
        ip: row.get(5)?,
        success: row.get(6)?,
        latency: row.get(7)?,
        error: error.unwrap_or_default(),
        packets_sent: row.get(9)?,
        packets_recv: row.get(10)?,
        packets_duplicates: row.get(11)?,
        packet_loss: row.get(12)?,
        min_latency: row.get(13)?,
        max_latency: row.get(14)?,
        jitter: row.get(15)?,
        isolated: row.get(16)?,
    })
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        TIME_FORMAT,
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.fZ",
        "%Y-%m-%dT%H:%M:%SZ",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}
