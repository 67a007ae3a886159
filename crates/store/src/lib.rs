//! Persistent store — the single source of truth for tasks, vacancies,
//! employers, plugin results, process registry, health samples, and the
//! database log sink.
//!
//! One SQLite file opened in WAL mode. Writers serialize on an internal
//! mutex; the busy timeout bounds how long a reader may wait on a lock.
//! All DDL (including additive column migrations) commits in [`Store::open`]
//! before the handle is shared.

mod schema;
mod stats;
mod tasks;
mod vacancies;

pub mod processes;

pub use stats::{HealthSample, StoreStats, VacancyStats};
pub use tasks::CleanupReport;
pub use vacancies::{SaveOutcome, VacancyRow};

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::Connection;

use vh_domain::config::DatabaseConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for vh_domain::Error {
    fn from(e: StoreError) -> Self {
        vh_domain::Error::Store(e.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Store {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl Store {
    /// Open (or create) the database and run the additive migrations.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Other(format!("creating {}: {e}", parent.display())))?;
            }
        }
        Self::open_at(&config.path, config.busy_timeout_sec, config.wal)
    }

    pub fn open_at(path: &Path, busy_timeout_sec: u64, wal: bool) -> Result<Self> {
        let conn = Connection::open(path)?;
        if wal {
            // journal_mode returns the resulting mode as a row.
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |_row| Ok(()))?;
        }
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "cache_size", 10_000)?;
        conn.busy_timeout(std::time::Duration::from_secs(busy_timeout_sec))?;

        schema::apply(&conn)?;
        tracing::info!(path = %path.display(), "store ready");

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Database file size in megabytes (0 for in-memory / missing file).
    pub fn database_size_mb(&self) -> f64 {
        std::fs::metadata(&self.path)
            .map(|m| m.len() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0)
    }

    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }
}

/// Wall-clock now as unix seconds, the timestamp unit of every table.
pub(crate) fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Store backed by a temp file; returns the guard so the file outlives
    /// the test body.
    pub fn temp_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_at(&dir.path().join("test.sqlite3"), 5, true).unwrap();
        (store, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("nested/deeper/db.sqlite3"),
            busy_timeout_sec: 5,
            wal: true,
        };
        let store = Store::open(&config).unwrap();
        assert!(config.path.exists());
        assert!(store.database_size_mb() >= 0.0);
    }

    #[test]
    fn reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.sqlite3");
        drop(Store::open_at(&path, 5, true).unwrap());
        // Second open re-runs DDL against the existing schema.
        Store::open_at(&path, 5, true).unwrap();
    }
}
