// Scripted in-memory plugin for driving the connection manager

#![allow(dead_code)]

use async_trait::async_trait;
use querydock::db::metadata::{Database, MetadataProvider, Schema, Table, TableColumn, TableIndex};
use querydock::db::{
    Connection, ConnectionConfig, DatabasePlugin, DatabasePluginConfig, EngineId, NewConnection,
    PluginError, PluginResult, PoolManager, QueryOutput, QueryResult,
};
use querydock::storage::MemoryStore;
use querydock::{ConnectionManager, PluginRegistry};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// What the next `execute_query` call does
#[derive(Debug, Clone)]
pub enum Outcome {
    Rows,
    SqlError(String),
    Transport(String),
}

pub struct FakePool {
    pub serial: usize,
    pub healthy: AtomicBool,
}

#[derive(Default)]
pub struct FakeState {
    pub creates: AtomicUsize,
    pub executes: AtomicUsize,
    pub closes: AtomicUsize,
    pub fail_create: AtomicBool,
    pub fail_close: AtomicBool,
    pub outcomes: Mutex<VecDeque<Outcome>>,
    pub pools: Mutex<Vec<Arc<FakePool>>>,
}

impl FakeState {
    pub fn script(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.outcomes.lock().unwrap().extend(outcomes);
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn executes(&self) -> usize {
        self.executes.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Mark the most recently created pool unhealthy
    pub fn poison_latest_pool(&self) {
        if let Some(pool) = self.pools.lock().unwrap().last() {
            pool.healthy.store(false, Ordering::SeqCst);
        }
    }
}

pub struct FakeManager {
    state: Arc<FakeState>,
}

#[async_trait]
impl PoolManager for FakeManager {
    type Pool = Arc<FakePool>;

    async fn create_connection(
        &self,
        config: &ConnectionConfig,
    ) -> PluginResult<NewConnection<Arc<FakePool>>> {
        // Yield so concurrent callers can interleave
        tokio::task::yield_now().await;

        if self.state.fail_create.load(Ordering::SeqCst) {
            return Err(PluginError::ConnectionFailed(format!(
                "connection refused: {}",
                config.host
            )));
        }

        let serial = self.state.creates.fetch_add(1, Ordering::SeqCst) + 1;
        let pool = Arc::new(FakePool {
            serial,
            healthy: AtomicBool::new(true),
        });
        self.state.pools.lock().unwrap().push(Arc::clone(&pool));

        Ok(NewConnection {
            connection: Connection::new(config.clone()),
            pool,
        })
    }

    async fn get_server_version(&self, _pool: &Arc<FakePool>) -> PluginResult<String> {
        Ok("FakeDB 1.0".to_string())
    }

    async fn execute_query(&self, _pool: &Arc<FakePool>, statement: &str) -> PluginResult<QueryResult> {
        self.state.executes.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .state
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Rows);

        match outcome {
            Outcome::Rows => {
                let mut row = serde_json::Map::new();
                row.insert("statement".to_string(), statement.into());
                Ok(QueryResult::success(QueryOutput {
                    rows: vec![row],
                    row_count: Some(1),
                    fields: Vec::new(),
                    execution_time_ms: 0.5,
                }))
            }
            Outcome::SqlError(message) => Ok(QueryResult::failure(message)),
            Outcome::Transport(message) => Err(PluginError::Transport(message)),
        }
    }

    async fn close_connection(
        &self,
        connection: &mut Connection,
        pool: &Arc<FakePool>,
    ) -> PluginResult<bool> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        pool.healthy.store(false, Ordering::SeqCst);
        connection.mark_inactive();
        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(PluginError::Close("drain timed out".to_string()));
        }
        Ok(true)
    }

    async fn is_connection_healthy(&self, pool: &Arc<FakePool>) -> bool {
        pool.healthy.load(Ordering::SeqCst)
    }
}

pub struct FakeMetadata;

#[async_trait]
impl MetadataProvider for FakeMetadata {
    type Pool = Arc<FakePool>;

    async fn get_databases(&self, _pool: &Arc<FakePool>) -> PluginResult<Vec<Database>> {
        Ok(vec![Database {
            name: "fake".to_string(),
            comment: None,
        }])
    }

    async fn get_schemas(&self, _pool: &Arc<FakePool>, _database: &str) -> PluginResult<Vec<Schema>> {
        Ok(Vec::new())
    }

    async fn get_tables(
        &self,
        _pool: &Arc<FakePool>,
        _database: &str,
        _schema: &str,
    ) -> PluginResult<Vec<Table>> {
        Ok(Vec::new())
    }

    async fn get_columns(
        &self,
        _pool: &Arc<FakePool>,
        _database: &str,
        _schema: &str,
        _table: &str,
    ) -> PluginResult<Vec<TableColumn>> {
        Ok(Vec::new())
    }

    async fn get_indexes(
        &self,
        _pool: &Arc<FakePool>,
        _database: &str,
        _schema: &str,
        _table: &str,
    ) -> PluginResult<Vec<TableIndex>> {
        Ok(Vec::new())
    }
}

pub struct FakePlugin {
    manager: FakeManager,
    metadata: FakeMetadata,
}

impl DatabasePlugin for FakePlugin {
    type Pool = Arc<FakePool>;
    type Manager = FakeManager;
    type Metadata = FakeMetadata;

    fn config(&self) -> DatabasePluginConfig {
        DatabasePluginConfig::for_engine(EngineId::Postgresql)
    }

    fn connection_manager(&self) -> &FakeManager {
        &self.manager
    }

    fn metadata(&self) -> &FakeMetadata {
        &self.metadata
    }
}

pub struct Harness {
    pub manager: ConnectionManager,
    pub state: Arc<FakeState>,
    pub store: Arc<MemoryStore>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new())).await
    }

    pub async fn with_store(store: Arc<MemoryStore>) -> Self {
        let state = Arc::new(FakeState::default());
        let registry = PluginRegistry::new();
        registry
            .register(Arc::new(FakePlugin {
                manager: FakeManager {
                    state: Arc::clone(&state),
                },
                metadata: FakeMetadata,
            }))
            .await;

        Self {
            manager: ConnectionManager::new(Arc::new(registry), store.clone()),
            state,
            store,
        }
    }

    /// Create a connection that is expected to succeed
    pub async fn connect(&self) -> Connection {
        let response = self.manager.create_connection(pg_config()).await;
        assert!(response.result.success, "{}", response.result.message);
        response.connection.unwrap()
    }
}

pub fn pg_config() -> ConnectionConfig {
    let mut config = ConnectionConfig::new(EngineId::Postgresql, "local", "db");
    config.host = "localhost".to_string();
    config.port = 5432;
    config.user = Some("u".to_string());
    config.password = Some("p".to_string());
    config
}
