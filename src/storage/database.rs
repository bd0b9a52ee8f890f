// Local SQLite settings store
// Handles app data directory resolution and the app_state schema

use rusqlite::{Connection, Result as SqliteResult};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to get app data directory")]
    AppDataDir,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage connection lock poisoned")]
    LockPoisoned,
}

pub type StorageResult<T> = Result<T, StorageError>;

/// File name of the settings store inside the data directory
pub const STORE_FILE_NAME: &str = "querydock.db";

/// Key-value store backed by a local SQLite file
pub struct SqliteStore {
    connection: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (or create) the store at the given path
    pub fn new(db_path: PathBuf) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let connection = Connection::open(&db_path)?;

        let store = Self {
            connection: Mutex::new(connection),
            db_path,
        };

        store.init_schema()?;

        Ok(store)
    }

    /// Open the store file inside a data directory
    pub fn open_in(data_dir: &Path) -> StorageResult<Self> {
        Self::new(data_dir.join(STORE_FILE_NAME))
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    fn init_schema(&self) -> StorageResult<()> {
        self.with_connection(|conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS app_state (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );
                "#,
            )
        })
    }

    /// Execute a function with database connection access
    pub fn with_connection<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Connection) -> SqliteResult<T>,
    {
        let conn = self.connection.lock().map_err(|_| StorageError::LockPoisoned)?;
        f(&conn).map_err(StorageError::from)
    }
}

/// Default data directory for the settings store
pub fn default_data_dir() -> StorageResult<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "querydock", "querydock")
        .ok_or(StorageError::AppDataDir)?;

    Ok(proj_dirs.data_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_creation() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("store.db");

        let store = SqliteStore::new(db_path.clone()).unwrap();

        assert!(db_path.exists());
        assert_eq!(store.db_path(), &db_path);
    }

    #[test]
    fn test_schema_initialization() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open_in(dir.path()).unwrap();

        assert!(store.db_path().ends_with(STORE_FILE_NAME));

        store
            .with_connection(|conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name = 'app_state'",
                    [],
                    |row| row.get(0),
                )?;
                assert_eq!(count, 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        drop(SqliteStore::open_in(dir.path()).unwrap());
        assert!(SqliteStore::open_in(dir.path()).is_ok());
    }
}
