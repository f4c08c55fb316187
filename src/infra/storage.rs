use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::domain::{Change, ChangeKind};
use crate::error::StoreError;

/// Durable home of collected changes and the watermark.
pub trait Store: Send + Sync {
    /// Watermark of the last successful run, `None` before the first one.
    fn last_check_date(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Insert unless (type, id, repository) is already stored.
    /// Returns `true` when the change is new.
    fn add_change(&self, change: &Change) -> Result<bool, StoreError>;

    /// Record "now" as the new watermark and return it.
    fn updated(&self) -> Result<DateTime<Utc>, StoreError>;

    /// Newest changes first.
    fn recent_changes(&self, limit: usize) -> Result<Vec<Change>, StoreError>;

    fn count(&self) -> Result<usize, StoreError>;
}

const WATERMARK_KEY: &str = "last_check_date";

pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();

        // Ensure directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        Self::init(conn, Some(db_path.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        // Every insert must be on disk before the watermark moves.
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS changes (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                source_id TEXT NOT NULL,
                repository TEXT NOT NULL,
                date TEXT NOT NULL,
                author TEXT NOT NULL,
                message TEXT NOT NULL,
                url TEXT NOT NULL,
                metadata TEXT NOT NULL,
                UNIQUE (kind, source_id, repository)
            );
            CREATE INDEX IF NOT EXISTS idx_changes_date ON changes(date DESC);
            CREATE TABLE IF NOT EXISTS state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;

        debug!(path = ?path, "store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn row_to_change(row: &rusqlite::Row) -> rusqlite::Result<(Change, serde_json::Value)> {
        let kind: String = row.get(0)?;
        let change = Change {
            kind: ChangeKind::from(kind),
            id: row.get(1)?,
            repository: row.get(2)?,
            date: row.get(3)?,
            author: row.get(4)?,
            message: row.get(5)?,
            url: row.get(6)?,
            metadata: Default::default(),
        };
        Ok((change, row.get(7)?))
    }
}

impl Store for SqliteStore {
    fn last_check_date(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.conn()?;
        let watermark = conn
            .query_row(
                "SELECT value FROM state WHERE key = ?1",
                params![WATERMARK_KEY],
                |row| row.get::<_, DateTime<Utc>>(0),
            )
            .optional()?;
        Ok(watermark)
    }

    fn add_change(&self, change: &Change) -> Result<bool, StoreError> {
        let metadata = serde_json::to_value(&change.metadata)?;
        let conn = self.conn()?;

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO changes
                (kind, source_id, repository, date, author, message, url, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                change.kind.as_str(),
                change.id,
                change.repository,
                change.date,
                change.author,
                change.message,
                change.url,
                metadata,
            ],
        )?;

        Ok(inserted == 1)
    }

    fn updated(&self) -> Result<DateTime<Utc>, StoreError> {
        let now = Utc::now();
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO state (key, value) VALUES (?1, ?2)",
            params![WATERMARK_KEY, now],
        )?;
        Ok(now)
    }

    fn recent_changes(&self, limit: usize) -> Result<Vec<Change>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT kind, source_id, repository, date, author, message, url, metadata
             FROM changes
             ORDER BY date DESC, seq DESC
             LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(params![limit as i64], Self::row_to_change)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(mut change, metadata)| {
                change.metadata = serde_json::from_value(metadata)?;
                Ok(change)
            })
            .collect()
    }

    fn count(&self) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM changes", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
