// Persisted set of logical connections

use super::database::StorageResult;
use super::store::KeyValueStore;
use crate::db::traits::Connection;

/// Store key holding the JSON array of connections
pub const CONNECTIONS_KEY: &str = "connections";

/// Load the persisted connections. A missing key is an empty set.
pub fn load_connections(store: &dyn KeyValueStore) -> StorageResult<Vec<Connection>> {
    match store.load(CONNECTIONS_KEY)? {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(Vec::new()),
    }
}

/// Replace the persisted connections with `connections`
pub fn save_connections(store: &dyn KeyValueStore, connections: &[Connection]) -> StorageResult<()> {
    let json = serde_json::to_string(connections)?;
    store.save(CONNECTIONS_KEY, &json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::traits::{ConnectionConfig, EngineId};
    use crate::storage::database::StorageError;
    use crate::storage::store::MemoryStore;

    #[test]
    fn test_missing_key_is_empty() {
        let store = MemoryStore::new();
        assert!(load_connections(&store).unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let store = MemoryStore::new();
        let mut config = ConnectionConfig::new(EngineId::Postgresql, "prod", "app");
        config.password = Some("secret".to_string());
        let connections = vec![
            Connection::new(config),
            Connection::new(ConnectionConfig::new(EngineId::Sqlite, "local", "/tmp/a.db")),
        ];

        save_connections(&store, &connections).unwrap();

        assert_eq!(load_connections(&store).unwrap(), connections);
    }

    #[test]
    fn test_corrupt_payload_is_an_error() {
        let store = MemoryStore::new();
        store.save(CONNECTIONS_KEY, "{not json").unwrap();

        assert!(matches!(load_connections(&store), Err(StorageError::Json(_))));
    }
}
