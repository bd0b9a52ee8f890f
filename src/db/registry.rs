// Plugin Registry
// Maps engine ids to the plugin that implements them

use crate::db::plugin::DynPlugin;
use crate::db::traits::{DatabasePluginConfig, EngineId, ManagerError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Registry of available database plugins. At most one plugin per engine id.
pub struct PluginRegistry {
    plugins: RwLock<HashMap<EngineId, Arc<dyn DynPlugin>>>,
}

impl PluginRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            plugins: RwLock::new(HashMap::new()),
        }
    }

    /// Register a plugin. A later registration for the same id replaces the earlier one.
    pub async fn register(&self, plugin: Arc<dyn DynPlugin>) {
        let config = plugin.config();
        let mut plugins = self.plugins.write().await;
        if plugins.insert(config.id, plugin).is_some() {
            tracing::warn!(plugin = %config.id, "replaced previously registered plugin");
        } else {
            tracing::info!(plugin = %config.id, name = %config.name, "registered plugin");
        }
    }

    /// Get a plugin by engine id
    pub async fn get_plugin(&self, id: EngineId) -> Result<Arc<dyn DynPlugin>, ManagerError> {
        let plugins = self.plugins.read().await;
        plugins
            .get(&id)
            .cloned()
            .ok_or(ManagerError::PluginNotFound(id))
    }

    /// All registered plugins, ordered by engine id
    pub async fn get_all_plugins(&self) -> Vec<Arc<dyn DynPlugin>> {
        let plugins = self.plugins.read().await;
        let mut entries: Vec<_> = plugins.iter().collect();
        entries.sort_by_key(|(id, _)| **id);
        entries.into_iter().map(|(_, plugin)| plugin.clone()).collect()
    }

    pub async fn get_plugin_config(&self, id: EngineId) -> Option<DatabasePluginConfig> {
        let plugins = self.plugins.read().await;
        plugins.get(&id).map(|plugin| plugin.config())
    }

    pub async fn get_plugin_ids(&self) -> Vec<EngineId> {
        let plugins = self.plugins.read().await;
        let mut ids: Vec<_> = plugins.keys().copied().collect();
        ids.sort();
        ids
    }

    pub async fn get_plugin_configs(&self) -> Vec<DatabasePluginConfig> {
        self.get_all_plugins()
            .await
            .iter()
            .map(|plugin| plugin.config())
            .collect()
    }

    /// Check if a plugin is registered for a given engine
    pub async fn has_plugin(&self, id: EngineId) -> bool {
        let plugins = self.plugins.read().await;
        plugins.contains_key(&id)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
