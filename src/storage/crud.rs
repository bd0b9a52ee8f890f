// Key-value operations on the app_state table

use super::database::{SqliteStore, StorageResult};
use super::store::KeyValueStore;
use rusqlite::params;

impl SqliteStore {
    /// Get all stored keys
    pub fn get_all_keys(&self) -> StorageResult<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM app_state ORDER BY key")?;
            let keys = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(keys)
        })
    }
}

impl KeyValueStore for SqliteStore {
    fn load(&self, key: &str) -> StorageResult<Option<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT value FROM app_state WHERE key = ?1")?;
            let result = stmt.query_row(params![key], |row| row.get(0));

            match result {
                Ok(value) => Ok(Some(value)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    fn save(&self, key: &str, value: &str) -> StorageResult<()> {
        self.with_connection(|conn| {
            conn.execute(
                r#"
                INSERT INTO app_state (key, value, updated_at)
                VALUES (?1, ?2, datetime('now'))
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = datetime('now')
                "#,
                params![key, value],
            )?;
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        self.with_connection(|conn| {
            let rows_affected = conn.execute("DELETE FROM app_state WHERE key = ?1", params![key])?;
            Ok(rows_affected > 0)
        })
    }
}
