// Connection orchestration
//
// Owns the live logical connections and their pools. Pools are created
// lazily, health-checked before reuse and recreated under the same
// connection id when stale. Persistence is write-through: the in-memory
// maps change first, then the connection set is written to the store.

use crate::db::metadata::{MetadataRequest, MetadataResponse};
use crate::db::plugin::{DynPlugin, NewConnection, PoolHandle};
use crate::db::query::split_sql_statements;
use crate::db::registry::PluginRegistry;
use crate::db::traits::{Connection, ConnectionConfig, ConnectionResult, ManagerError, QueryResult};
use crate::storage::{load_connections, save_connections, KeyValueStore, CONNECTIONS_KEY};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};

/// Answer to a create request. `connection` is absent on failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateConnectionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<Connection>,
    pub result: ConnectionResult,
}

impl CreateConnectionResponse {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            connection: None,
            result: ConnectionResult::failed(message),
        }
    }
}

pub struct ConnectionManager {
    registry: Arc<PluginRegistry>,
    store: Arc<dyn KeyValueStore>,
    connections: RwLock<HashMap<String, Connection>>,
    pools: RwLock<HashMap<String, PoolHandle>>,
    /// One lock per connection id, serializing pool checks and recreation
    pool_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConnectionManager {
    pub fn new(registry: Arc<PluginRegistry>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            registry,
            store,
            connections: RwLock::new(HashMap::new()),
            pools: RwLock::new(HashMap::new()),
            pool_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Open a pool for `config` and register the new logical connection.
    /// Never fails: errors come back as an unsuccessful result.
    pub async fn create_connection(&self, config: ConnectionConfig) -> CreateConnectionResponse {
        let plugin_id = config.plugin_id;
        let plugin = match self.registry.get_plugin(plugin_id).await {
            Ok(plugin) => plugin,
            Err(e) => {
                tracing::error!(plugin_id = %plugin_id, error = %e, "cannot create connection");
                return CreateConnectionResponse::failed(e.to_string());
            }
        };

        let started = Instant::now();
        let NewConnection { connection, pool } = match plugin.create_connection(&config).await {
            Ok(created) => created,
            Err(e) => {
                tracing::warn!(plugin_id = %plugin_id, error = %e, "failed to create connection");
                return CreateConnectionResponse::failed(e.to_string());
            }
        };
        let connection_id = connection.connection_id.clone();

        self.hydrate().await;
        self.pools.write().await.insert(connection_id.clone(), pool);
        {
            let mut connections = self.connections.write().await;
            connections.insert(connection_id.clone(), connection.clone());
            self.persist(&connections);
        }

        tracing::info!(
            connection_id = %connection_id,
            plugin_id = %plugin_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "connection created"
        );

        CreateConnectionResponse {
            connection: Some(connection),
            result: ConnectionResult::ok("Connection created successfully"),
        }
    }

    /// Connect with a throwaway pool, report connect time and server version,
    /// then close it again. Nothing is registered.
    pub async fn test_connection(&self, config: ConnectionConfig) -> ConnectionResult {
        let plugin = match self.registry.get_plugin(config.plugin_id).await {
            Ok(plugin) => plugin,
            Err(e) => return ConnectionResult::failed(e.to_string()),
        };

        let started = Instant::now();
        let NewConnection {
            mut connection,
            pool,
        } = match plugin.create_connection(&config).await {
            Ok(created) => created,
            Err(e) => {
                tracing::debug!(plugin_id = %config.plugin_id, error = %e, "connection test failed");
                return ConnectionResult::failed(e.to_string());
            }
        };
        let connection_time = started.elapsed().as_millis() as u64;

        let version = plugin.get_server_version(&pool).await;
        if let Err(e) = plugin.close_connection(&mut connection, &pool).await {
            tracing::warn!(plugin_id = %config.plugin_id, error = %e, "failed to close test connection");
        }

        let mut result = match version {
            Ok(version) => ConnectionResult::ok(version),
            Err(e) => ConnectionResult::failed(e.to_string()),
        };
        result.connection_time = Some(connection_time);
        result
    }

    /// Return a healthy pool for `connection_id`, recreating it when the
    /// cached one is missing or fails its health check.
    pub async fn get_pool(
        &self,
        connection_id: &str,
    ) -> Result<(Arc<dyn DynPlugin>, PoolHandle), ManagerError> {
        if self.lookup(connection_id).await.is_none() {
            return Err(ManagerError::ConnectionNotFound(connection_id.to_string()));
        }

        let lock = self.pool_lock(connection_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.get_pool_locked(connection_id).await
        };
        if matches!(result, Err(ManagerError::ConnectionNotFound(_))) {
            self.release_pool_lock(connection_id, lock).await;
        }
        result
    }

    /// Body of `get_pool`, run while holding the connection's pool lock
    async fn get_pool_locked(
        &self,
        connection_id: &str,
    ) -> Result<(Arc<dyn DynPlugin>, PoolHandle), ManagerError> {
        let connection = self
            .lookup(connection_id)
            .await
            .ok_or_else(|| ManagerError::ConnectionNotFound(connection_id.to_string()))?;
        let plugin_id = connection.connection_config.plugin_id;
        let plugin = self.registry.get_plugin(plugin_id).await?;

        let cached = self.pools.read().await.get(connection_id).cloned();
        if let Some(pool) = cached {
            if plugin.is_connection_healthy(&pool).await {
                return Ok((plugin, pool));
            }

            tracing::warn!(connection_id, plugin_id = %plugin_id, "pool is unhealthy, discarding");
            self.pools.write().await.remove(connection_id);
            self.set_active(connection_id, false).await;
            let mut stale = connection.clone();
            if let Err(e) = plugin.close_connection(&mut stale, &pool).await {
                tracing::warn!(connection_id, error = %e, "failed to close stale pool");
            }
        }

        let started = Instant::now();
        let created = plugin.create_connection(&connection.connection_config).await?;

        let mut connections = self.connections.write().await;
        match connections.get_mut(connection_id) {
            Some(entry) => entry.mark_active(),
            None => {
                // Removed while the pool was being opened
                drop(connections);
                let mut orphan = created.connection;
                if let Err(e) = plugin.close_connection(&mut orphan, &created.pool).await {
                    tracing::warn!(connection_id, error = %e, "failed to close orphaned pool");
                }
                return Err(ManagerError::ConnectionNotFound(connection_id.to_string()));
            }
        }
        self.pools
            .write()
            .await
            .insert(connection_id.to_string(), created.pool.clone());
        self.persist(&connections);
        drop(connections);

        tracing::info!(
            connection_id,
            plugin_id = %plugin_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "pool created"
        );

        Ok((plugin, created.pool))
    }

    /// Execute one statement. A transport failure discards the pool and
    /// retries once on a fresh one; SQL errors are returned as they are.
    pub async fn execute_query(&self, connection_id: &str, statement: &str) -> QueryResult {
        let first = match self.try_execute(connection_id, statement).await {
            Ok(result) => return result,
            Err(e @ (ManagerError::ConnectionNotFound(_) | ManagerError::PluginNotFound(_))) => {
                tracing::warn!(connection_id, error = %e, "cannot execute query");
                return QueryResult::failure(e.to_string());
            }
            Err(e) => e,
        };

        tracing::warn!(connection_id, error = %first, "query attempt failed, retrying on a new pool");

        match self.try_execute(connection_id, statement).await {
            Ok(result) => result,
            Err(second) => {
                tracing::error!(connection_id, error = %second, "query retry failed");
                QueryResult::failure(format!("Query execution failed: {second}"))
            }
        }
    }

    /// Execute each statement of `script` in order, stopping after the first
    /// one that fails.
    pub async fn execute_script(&self, connection_id: &str, script: &str) -> Vec<QueryResult> {
        let mut results = Vec::new();
        for statement in split_sql_statements(script) {
            let result = self.execute_query(connection_id, &statement).await;
            let failed = !result.success;
            results.push(result);
            if failed {
                break;
            }
        }
        results
    }

    /// Close the pool and forget the logical connection. Close failures are
    /// logged and the connection is removed anyway. Returns false when the id
    /// is unknown.
    pub async fn close_connection(&self, connection_id: &str) -> bool {
        self.hydrate().await;

        if !self.connections.read().await.contains_key(connection_id) {
            tracing::warn!(connection_id, "close requested for unknown connection");
            return false;
        }

        let lock = self.pool_lock(connection_id).await;
        let guard = lock.lock().await;

        let Some(mut connection) = self.connections.read().await.get(connection_id).cloned() else {
            // Closed by a concurrent caller while waiting for the lock
            drop(guard);
            self.release_pool_lock(connection_id, lock).await;
            return false;
        };

        let pool = self.pools.write().await.remove(connection_id);
        if let Some(pool) = pool {
            self.close_pool(&mut connection, &pool).await;
        }

        {
            let mut connections = self.connections.write().await;
            connections.remove(connection_id);
            self.persist(&connections);
        }
        drop(guard);
        self.release_pool_lock(connection_id, lock).await;

        tracing::info!(connection_id, "connection closed");
        true
    }

    /// Replace the stored record for `connection_id`. The pool is discarded so
    /// the next access reconnects with the new config. Mismatched or unknown
    /// ids are logged and ignored.
    pub async fn update_connection(&self, connection_id: &str, connection: Connection) -> bool {
        if connection.connection_id != connection_id {
            tracing::warn!(
                connection_id,
                body_id = %connection.connection_id,
                "connection id mismatch, update ignored"
            );
            return false;
        }

        self.hydrate().await;

        if !self.connections.read().await.contains_key(connection_id) {
            tracing::warn!(connection_id, "update requested for unknown connection");
            return false;
        }

        let lock = self.pool_lock(connection_id).await;
        let guard = lock.lock().await;

        let previous = {
            let mut connections = self.connections.write().await;
            if !connections.contains_key(connection_id) {
                // Closed by a concurrent caller while waiting for the lock
                drop(connections);
                drop(guard);
                self.release_pool_lock(connection_id, lock).await;
                return false;
            }
            let Some(entry) = connections.get_mut(connection_id) else {
                return false;
            };

            let previous = entry.clone();
            let mut updated = connection;
            updated.created_at = previous.created_at;
            updated.updated_at = previous.updated_at;
            updated.is_active = false;
            updated.touch();
            *entry = updated;

            self.persist(&connections);
            previous
        };

        let pool = self.pools.write().await.remove(connection_id);
        if let Some(pool) = pool {
            let mut stale = previous;
            self.close_pool(&mut stale, &pool).await;
        }

        tracing::info!(connection_id, "connection updated");
        true
    }

    /// All logical connections, oldest first. Connections persisted by an
    /// earlier process are merged in on the way.
    pub async fn get_all_connections(&self) -> Vec<Connection> {
        self.hydrate().await;

        let mut connections: Vec<Connection> =
            self.connections.read().await.values().cloned().collect();
        connections.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.connection_id.cmp(&b.connection_id))
        });
        connections
    }

    pub async fn get_connection(&self, connection_id: &str) -> Option<Connection> {
        self.lookup(connection_id).await
    }

    pub async fn get_all_connection_ids(&self) -> Vec<String> {
        self.get_all_connections()
            .await
            .into_iter()
            .map(|connection| connection.connection_id)
            .collect()
    }

    /// Close every connection, then clear the live maps and the store.
    pub async fn delete_all_connections(&self) {
        let ids = self.get_all_connection_ids().await;

        futures::future::join_all(ids.iter().map(|id| self.close_connection(id))).await;

        self.pools.write().await.clear();
        let mut connections = self.connections.write().await;
        connections.clear();
        if let Err(e) = self.store.delete(CONNECTIONS_KEY) {
            tracing::error!(error = %e, "failed to clear persisted connections");
        }

        tracing::info!(count = ids.len(), "all connections deleted");
    }

    pub async fn get_metadata(
        &self,
        connection_id: &str,
        request: MetadataRequest,
    ) -> Result<MetadataResponse, ManagerError> {
        let (plugin, pool) = self.get_pool(connection_id).await?;
        Ok(plugin.get_metadata(&pool, request).await?)
    }

    /// Close every open pool, keeping the logical connections. Used on shutdown.
    pub async fn close_all_pools(&self) {
        let pools: Vec<(String, PoolHandle)> = self.pools.write().await.drain().collect();
        if pools.is_empty() {
            return;
        }

        for (connection_id, pool) in &pools {
            let Some(mut connection) = self.connections.read().await.get(connection_id).cloned()
            else {
                continue;
            };
            self.close_pool(&mut connection, pool).await;
        }

        let mut connections = self.connections.write().await;
        for (connection_id, _) in &pools {
            if let Some(connection) = connections.get_mut(connection_id) {
                connection.mark_inactive();
            }
        }
        self.persist(&connections);

        tracing::info!(count = pools.len(), "closed all pools");
    }

    /// One attempt: obtain a pool, run the statement. A transport error drops
    /// the pool that produced it.
    async fn try_execute(
        &self,
        connection_id: &str,
        statement: &str,
    ) -> Result<QueryResult, ManagerError> {
        let (plugin, pool) = self.get_pool(connection_id).await?;

        match plugin.execute_query(&pool, statement).await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.discard_pool(connection_id, &plugin, &pool).await;
                Err(e.into())
            }
        }
    }

    /// Drop `pool` from the cache unless another caller already replaced it
    async fn discard_pool(&self, connection_id: &str, plugin: &Arc<dyn DynPlugin>, pool: &PoolHandle) {
        // A closed connection has already dropped its pool
        if !self.connections.read().await.contains_key(connection_id) {
            return;
        }

        let lock = self.pool_lock(connection_id).await;
        let _guard = lock.lock().await;

        {
            let mut pools = self.pools.write().await;
            match pools.get(connection_id) {
                Some(cached) if cached.same_pool(pool) => {
                    pools.remove(connection_id);
                }
                _ => return,
            }
        }

        let Some(mut connection) = self.connections.read().await.get(connection_id).cloned() else {
            return;
        };
        if let Err(e) = plugin.close_connection(&mut connection, pool).await {
            tracing::warn!(connection_id, error = %e, "failed to close discarded pool");
        }
        self.set_active(connection_id, false).await;
    }

    /// Best-effort close through the connection's own plugin
    async fn close_pool(&self, connection: &mut Connection, pool: &PoolHandle) {
        let plugin_id = connection.connection_config.plugin_id;
        let plugin = match self.registry.get_plugin(plugin_id).await {
            Ok(plugin) => plugin,
            Err(e) => {
                tracing::error!(connection_id = %connection.connection_id, error = %e, "cannot close pool");
                return;
            }
        };

        if let Err(e) = plugin.close_connection(connection, pool).await {
            tracing::warn!(
                connection_id = %connection.connection_id,
                plugin_id = %plugin_id,
                error = %e,
                "failed to close pool"
            );
        }
    }

    async fn pool_lock(&self, connection_id: &str) -> Arc<Mutex<()>> {
        self.pool_locks
            .lock()
            .await
            .entry(connection_id.to_string())
            .or_default()
            .clone()
    }

    /// Forget the lock for `connection_id` unless another caller still holds
    /// a clone of it. Only the map and `lock` itself may reference it.
    async fn release_pool_lock(&self, connection_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.pool_locks.lock().await;
        let unused = locks
            .get(connection_id)
            .is_some_and(|current| Arc::ptr_eq(current, &lock) && Arc::strong_count(&lock) == 2);
        if unused {
            locks.remove(connection_id);
        }
    }

    async fn set_active(&self, connection_id: &str, active: bool) {
        let mut connections = self.connections.write().await;
        if let Some(connection) = connections.get_mut(connection_id) {
            if active {
                connection.mark_active();
            } else {
                connection.mark_inactive();
            }
            self.persist(&connections);
        }
    }

    /// Live record, falling back to the persisted set
    async fn lookup(&self, connection_id: &str) -> Option<Connection> {
        if let Some(connection) = self.connections.read().await.get(connection_id) {
            return Some(connection.clone());
        }
        self.hydrate().await;
        self.connections.read().await.get(connection_id).cloned()
    }

    /// Merge persisted connections missing from the live map. Existing live
    /// entries are never overwritten. Merged records have no pool yet, so
    /// they start inactive.
    async fn hydrate(&self) {
        let mut connections = self.connections.write().await;
        let persisted = match load_connections(self.store.as_ref()) {
            Ok(persisted) => persisted,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load persisted connections");
                return;
            }
        };

        for mut connection in persisted {
            if connections.contains_key(&connection.connection_id) {
                continue;
            }
            tracing::debug!(connection_id = %connection.connection_id, "restored persisted connection");
            connection.is_active = false;
            connections.insert(connection.connection_id.clone(), connection);
        }
    }

    /// Write the connection set through to the store. Called with the
    /// connections lock held so writes land in mutation order.
    fn persist(&self, connections: &HashMap<String, Connection>) {
        let mut snapshot: Vec<Connection> = connections.values().cloned().collect();
        snapshot.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        if let Err(e) = save_connections(self.store.as_ref(), &snapshot) {
            tracing::error!(error = %e, "failed to persist connections");
        }
    }
}
