// Built-in database plugins
// Contains the plugin front-end for each compiled-in engine

pub mod postgres;
pub mod sqlite;

pub use postgres::{PostgresMetadataProvider, PostgresPlugin};
pub use sqlite::{SqliteMetadataProvider, SqlitePlugin};

use crate::config::PoolSettings;
use crate::db::registry::PluginRegistry;
use std::sync::Arc;

/// Register every compiled-in plugin
pub async fn register_builtin_plugins(registry: &PluginRegistry, settings: &PoolSettings) {
    registry
        .register(Arc::new(PostgresPlugin::new(settings.clone())))
        .await;
    registry.register(Arc::new(SqlitePlugin::new())).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::traits::EngineId;

    #[tokio::test]
    async fn test_builtin_plugins() {
        let registry = PluginRegistry::new();
        register_builtin_plugins(&registry, &PoolSettings::default()).await;

        assert_eq!(
            registry.get_plugin_ids().await,
            vec![EngineId::Postgresql, EngineId::Sqlite]
        );
        assert!(!registry.has_plugin(EngineId::Mysql).await);
    }
}
