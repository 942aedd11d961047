//! SQLite-backed key-value storage.
//!
//! The [`SqliteBackend`] struct owns a [`rusqlite::Connection`] and guarantees
//! that migrations are run before any other operation. Every batch is applied
//! inside a single transaction, so a snapshot and its preferences are either
//! both written or neither is.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};

use crate::backend::{KvBackend, Write};
use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/vellum/vellum.db`
    /// - macOS:   `~/Library/Application Support/org.vellum.vellum/vellum.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\vellum\vellum\data\vellum.db`
    pub fn open_default() -> Result<Self> {
        let data_dir = default_data_dir()?;
        std::fs::create_dir_all(&data_dir)?;
        Self::open_at(&data_dir.join("vellum.db"))
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn()
            .ok()
            .and_then(|c| c.path().map(PathBuf::from))
            .filter(|p| !p.as_os_str().is_empty())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::BackendUnavailable(format!("Lock poisoned: {e}")))
    }
}

/// Platform data directory for Vellum.
pub fn default_data_dir() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("org", "vellum", "vellum").ok_or(StoreError::NoDataDir)?;
    Ok(project_dirs.data_dir().to_path_buf())
}

impl KvBackend for SqliteBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()?
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn write_batch(&self, writes: &[Write<'_>]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = chrono::Utc::now().to_rfc3339();
        for (key, value) in writes {
            match value {
                Some(v) => {
                    tx.execute(
                        "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                                        updated_at = excluded.updated_at",
                        params![key, v, now],
                    )?;
                }
                None => {
                    tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn usage(&self) -> Result<usize> {
        let used: i64 = self.conn()?.query_row(
            "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
             FROM kv",
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(used).unwrap_or(0))
    }

    fn probe(&self) -> Result<()> {
        self.conn()?
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = SqliteBackend::open_at(&path).expect("should open");
        assert!(db.path().is_some());
        db.set("greeting", "héllo").unwrap();
        drop(db);

        let reopened = SqliteBackend::open_at(&path).unwrap();
        assert_eq!(reopened.get("greeting").unwrap().as_deref(), Some("héllo"));
        assert_eq!(reopened.usage().unwrap(), "greeting".len() + "héllo".len());
    }

    #[test]
    fn batch_overwrites_and_deletes() {
        let db = SqliteBackend::open_in_memory().unwrap();
        db.write_batch(&[("a", Some("1")), ("b", Some("2"))]).unwrap();
        db.write_batch(&[("a", Some("3")), ("b", None)]).unwrap();

        assert_eq!(db.get("a").unwrap().as_deref(), Some("3"));
        assert!(db.get("b").unwrap().is_none());
        db.probe().unwrap();
    }
}
