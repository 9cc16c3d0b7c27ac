// SQLite-backed crawl state

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use sitedex_scanner::error::StateError;
use sitedex_scanner::state::{CrawlStateStore, EntryStatus, ProgressEntry, StateResult};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Crawl progress and URI filter persisted in a SQLite database, so a crashed
/// run leaves state behind that `reset` can clear.
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

fn current_timestamp() -> String {
    Utc::now().to_rfc3339()
}

impl SqliteStateStore {
    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn remove(path: &Path) -> std::io::Result<()> {
        fs::remove_file(path)
    }

    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -16000;  -- 16MB cache
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        Self::with_connection(conn)
    }

    pub fn in_memory() -> rusqlite::Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> rusqlite::Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StateResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::Poisoned)
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        -- Every URL claimed by a crawl session, keyed by canonical URL
        CREATE TABLE IF NOT EXISTS crawl_progress (
    url TEXT PRIMARY KEY,
    status TEXT NOT NULL CHECK(status IN ('queued', 'in_flight', 'visited', 'failed')),
    depth INTEGER NOT NULL,
    parent TEXT,
    claimed_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_progress_status ON crawl_progress(status);

-- Raw discovered URIs already run through the link filter
CREATE TABLE IF NOT EXISTS uri_filter (
    uri TEXT PRIMARY KEY,
    seen_at TEXT NOT NULL
);
        ",
    )
}

impl CrawlStateStore for SqliteStateStore {
    fn claim(&self, key: &str, depth: usize, parent: Option<&str>) -> StateResult<bool> {
        let conn = self.lock()?;
        let timestamp = current_timestamp();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO crawl_progress (url, status, depth, parent, claimed_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![key, EntryStatus::Queued.as_str(), depth as i64, parent, timestamp],
            )
            .map_err(StateError::backend)?;
        Ok(inserted == 1)
    }

    fn set_status(&self, key: &str, status: EntryStatus) -> StateResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE crawl_progress SET status = ?1, updated_at = ?2 WHERE url = ?3",
            params![status.as_str(), current_timestamp(), key],
        )
        .map_err(StateError::backend)?;
        Ok(())
    }

    fn entry(&self, key: &str) -> StateResult<Option<ProgressEntry>> {
        let conn = self.lock()?;
        let row: Option<(String, i64, Option<String>)> = conn
            .query_row(
                "SELECT status, depth, parent FROM crawl_progress WHERE url = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(StateError::backend)?;

        let Some((status, depth, parent)) = row else {
            return Ok(None);
        };
        let status = EntryStatus::from_str(&status).ok_or_else(|| {
            StateError::Backend(format!("unknown crawl status '{}' for {}", status, key).into())
        })?;

        Ok(Some(ProgressEntry {
            status,
            depth: depth as usize,
            parent,
        }))
    }

    fn progress_len(&self) -> StateResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM crawl_progress", [], |row| row.get(0))
            .map_err(StateError::backend)?;
        Ok(count as usize)
    }

    fn remember_uri(&self, uri: &str) -> StateResult<bool> {
        let conn = self.lock()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO uri_filter (uri, seen_at) VALUES (?1, ?2)",
                params![uri, current_timestamp()],
            )
            .map_err(StateError::backend)?;
        Ok(inserted == 1)
    }

    fn uri_filter_len(&self) -> StateResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM uri_filter", [], |row| row.get(0))
            .map_err(StateError::backend)?;
        Ok(count as usize)
    }

    fn reset_progress(&self) -> StateResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM crawl_progress", [])
            .map_err(StateError::backend)?;
        Ok(())
    }

    fn reset_uri_filter(&self) -> StateResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM uri_filter", [])
            .map_err(StateError::backend)?;
        Ok(())
    }
}
