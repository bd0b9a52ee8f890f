// Key-value persistence seam used by the connection manager

use super::database::{StorageError, StorageResult};
use std::collections::HashMap;
use std::sync::Mutex;

/// Durable string key-value store
pub trait KeyValueStore: Send + Sync {
    fn load(&self, key: &str) -> StorageResult<Option<String>>;

    fn save(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Returns whether the key existed
    fn delete(&self, key: &str) -> StorageResult<bool>;
}

/// In-process store, for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, key: &str) -> StorageResult<Option<String>> {
        let values = self.values.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(values.get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut values = self.values.lock().map_err(|_| StorageError::LockPoisoned)?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let mut values = self.values.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(values.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();

        assert_eq!(store.load("k").unwrap(), None);
        store.save("k", "v1").unwrap();
        store.save("k", "v2").unwrap();
        assert_eq!(store.load("k").unwrap(), Some("v2".to_string()));
        assert!(store.delete("k").unwrap());
        assert!(!store.delete("k").unwrap());
    }
}
