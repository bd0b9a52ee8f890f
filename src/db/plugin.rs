// Plugin contract
//
// Each engine implements `DatabasePlugin` with its own concrete pool type.
// The registry and the connection manager only ever see `DynPlugin`, which
// carries pools as opaque `PoolHandle`s and hands them back to the plugin
// that created them.

use crate::db::metadata::{MetadataProvider, MetadataRequest, MetadataResponse};
use crate::db::traits::{
    Connection, ConnectionConfig, DatabasePluginConfig, EngineId, PluginError, PluginResult,
    QueryResult,
};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A freshly minted logical connection plus the pool backing it
#[derive(Debug)]
pub struct NewConnection<P> {
    pub connection: Connection,
    pub pool: P,
}

/// Per-engine pool lifecycle
#[async_trait::async_trait]
pub trait PoolManager: Send + Sync {
    type Pool: Send + Sync + 'static;

    /// Open a pool, check it once, and mint a new logical connection.
    async fn create_connection(
        &self,
        config: &ConnectionConfig,
    ) -> PluginResult<NewConnection<Self::Pool>>;

    async fn get_server_version(&self, pool: &Self::Pool) -> PluginResult<String>;

    /// Run one statement. SQL errors come back as `Ok` with `success == false`;
    /// `Err` is reserved for transport failures.
    async fn execute_query(&self, pool: &Self::Pool, statement: &str) -> PluginResult<QueryResult>;

    async fn close_connection(
        &self,
        connection: &mut Connection,
        pool: &Self::Pool,
    ) -> PluginResult<bool>;

    /// Never fails; any error means unhealthy.
    async fn is_connection_healthy(&self, pool: &Self::Pool) -> bool;
}

/// A database engine implementation
pub trait DatabasePlugin: Send + Sync + 'static {
    type Pool: Send + Sync + 'static;
    type Manager: PoolManager<Pool = Self::Pool>;
    type Metadata: MetadataProvider<Pool = Self::Pool>;

    fn config(&self) -> DatabasePluginConfig;

    fn connection_manager(&self) -> &Self::Manager;

    fn metadata(&self) -> &Self::Metadata;
}

/// Opaque, engine-owned pool. Only the plugin that produced it can look inside.
#[derive(Clone)]
pub struct PoolHandle {
    engine: EngineId,
    inner: Arc<dyn Any + Send + Sync>,
}

impl PoolHandle {
    pub fn new<P: Send + Sync + 'static>(engine: EngineId, pool: P) -> Self {
        Self {
            engine,
            inner: Arc::new(pool),
        }
    }

    pub fn engine(&self) -> EngineId {
        self.engine
    }

    /// Whether both handles refer to the same underlying pool
    pub fn same_pool(&self, other: &PoolHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn downcast<P: 'static>(&self, expected: EngineId) -> PluginResult<&P> {
        if self.engine != expected {
            return Err(PluginError::InvalidPoolHandle(expected));
        }
        self.inner
            .downcast_ref::<P>()
            .ok_or(PluginError::InvalidPoolHandle(expected))
    }
}

impl fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolHandle").field("engine", &self.engine).finish_non_exhaustive()
    }
}

/// Object-safe view of a plugin, as stored in the registry
#[async_trait::async_trait]
pub trait DynPlugin: Send + Sync {
    fn config(&self) -> DatabasePluginConfig;

    async fn create_connection(
        &self,
        config: &ConnectionConfig,
    ) -> PluginResult<NewConnection<PoolHandle>>;

    async fn get_server_version(&self, pool: &PoolHandle) -> PluginResult<String>;

    async fn execute_query(&self, pool: &PoolHandle, statement: &str) -> PluginResult<QueryResult>;

    async fn close_connection(
        &self,
        connection: &mut Connection,
        pool: &PoolHandle,
    ) -> PluginResult<bool>;

    async fn is_connection_healthy(&self, pool: &PoolHandle) -> bool;

    async fn get_metadata(
        &self,
        pool: &PoolHandle,
        request: MetadataRequest,
    ) -> PluginResult<MetadataResponse>;
}

#[async_trait::async_trait]
impl<P: DatabasePlugin> DynPlugin for P {
    fn config(&self) -> DatabasePluginConfig {
        DatabasePlugin::config(self)
    }

    async fn create_connection(
        &self,
        config: &ConnectionConfig,
    ) -> PluginResult<NewConnection<PoolHandle>> {
        let engine = DatabasePlugin::config(self).id;
        let manager = DatabasePlugin::connection_manager(self);
        let created = PoolManager::create_connection(manager, config).await?;
        Ok(NewConnection {
            connection: created.connection,
            pool: PoolHandle::new(engine, created.pool),
        })
    }

    async fn get_server_version(&self, pool: &PoolHandle) -> PluginResult<String> {
        let pool = pool.downcast::<P::Pool>(DatabasePlugin::config(self).id)?;
        PoolManager::get_server_version(DatabasePlugin::connection_manager(self), pool).await
    }

    async fn execute_query(&self, pool: &PoolHandle, statement: &str) -> PluginResult<QueryResult> {
        let pool = pool.downcast::<P::Pool>(DatabasePlugin::config(self).id)?;
        PoolManager::execute_query(DatabasePlugin::connection_manager(self), pool, statement).await
    }

    async fn close_connection(
        &self,
        connection: &mut Connection,
        pool: &PoolHandle,
    ) -> PluginResult<bool> {
        let pool = pool.downcast::<P::Pool>(DatabasePlugin::config(self).id)?;
        PoolManager::close_connection(DatabasePlugin::connection_manager(self), connection, pool)
            .await
    }

    async fn is_connection_healthy(&self, pool: &PoolHandle) -> bool {
        match pool.downcast::<P::Pool>(DatabasePlugin::config(self).id) {
            Ok(pool) => {
                PoolManager::is_connection_healthy(DatabasePlugin::connection_manager(self), pool)
                    .await
            }
            Err(_) => false,
        }
    }

    async fn get_metadata(
        &self,
        pool: &PoolHandle,
        request: MetadataRequest,
    ) -> PluginResult<MetadataResponse> {
        let pool = pool.downcast::<P::Pool>(DatabasePlugin::config(self).id)?;
        request.dispatch(DatabasePlugin::metadata(self), pool).await
    }
}
