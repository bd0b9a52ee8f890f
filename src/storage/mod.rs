// Local persistence
// Durable settings store and the persisted connection set

pub mod connections;
pub mod crud;
pub mod database;
pub mod store;

pub use connections::{load_connections, save_connections, CONNECTIONS_KEY};
pub use database::{default_data_dir, SqliteStore, StorageError, StorageResult, STORE_FILE_NAME};
pub use store::{KeyValueStore, MemoryStore};
