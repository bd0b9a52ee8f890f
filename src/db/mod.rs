// Database Module
// Plugin contract, registry, per-engine pool managers and the connection orchestrator

pub mod drivers;
pub mod manager;
pub mod metadata;
pub mod plugin;
pub mod postgres_manager;
pub mod query;
pub mod registry;
pub mod sqlite_manager;
pub mod traits;

pub use drivers::{register_builtin_plugins, PostgresPlugin, SqlitePlugin};
pub use manager::{ConnectionManager, CreateConnectionResponse};
pub use metadata::{MetadataProvider, MetadataRequest, MetadataResponse};
pub use plugin::{DatabasePlugin, DynPlugin, NewConnection, PoolHandle, PoolManager};
pub use postgres_manager::{PostgresPool, PostgresPoolManager};
pub use query::{split_sql_statements, trim_statement};
pub use registry::PluginRegistry;
pub use sqlite_manager::{SqlitePool, SqlitePoolManager};
pub use traits::{
    Connection, ConnectionConfig, ConnectionResult, DatabasePluginConfig, EngineId, FieldInfo,
    ManagerError, PluginError, PluginResult, QueryOutput, QueryResult, Row,
};
