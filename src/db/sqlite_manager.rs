// SQLite pool manager
// SQLite is single-writer, so a "pool" is one serialized connection per logical connection.
// All rusqlite calls run on the blocking thread pool.

use crate::db::plugin::{NewConnection, PoolManager};
use crate::db::traits::{
    hex_bytes, Connection, ConnectionConfig, FieldInfo, PluginError, PluginResult, QueryOutput,
    QueryResult, Row,
};
use rusqlite::types::ValueRef;
use rusqlite::{Connection as RusqliteConnection, ErrorCode, OpenFlags};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

const MEMORY_PATH: &str = ":memory:";

/// The connection behind one SQLite logical connection. `None` once closed.
pub struct SqlitePool {
    path: String,
    conn: Arc<Mutex<Option<RusqliteConnection>>>,
}

impl SqlitePool {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Run `f` against the open connection on the blocking pool
    pub async fn run<T, F>(&self, f: F) -> PluginResult<T>
    where
        F: FnOnce(&RusqliteConnection) -> PluginResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| PluginError::Transport("SQLite connection lock poisoned".to_string()))?;
            let conn = guard
                .as_ref()
                .ok_or_else(|| PluginError::Transport("SQLite connection is closed".to_string()))?;
            f(conn)
        })
        .await
        .map_err(|e| PluginError::Transport(e.to_string()))?
    }
}

/// Resolve the database path, expanding `~/` to the home directory
pub fn resolve_database_path(database: &str) -> PluginResult<String> {
    let database = database.trim();
    if database.is_empty() {
        return Err(PluginError::InvalidConfig(
            "SQLite database path is required".to_string(),
        ));
    }

    let path = match database.strip_prefix("~/") {
        Some(rest) => match std::env::var_os("HOME") {
            Some(home) => Path::new(&home).join(rest).to_string_lossy().to_string(),
            None => database.to_string(),
        },
        None => database.to_string(),
    };
    Ok(path)
}

/// Errors that mean the file itself is unusable, as opposed to a bad statement
fn is_transport_error(error: &rusqlite::Error) -> bool {
    matches!(
        error.sqlite_error_code(),
        Some(
            ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::DatabaseBusy
        )
    )
}

fn classify_error(error: rusqlite::Error) -> PluginResult<QueryResult> {
    if is_transport_error(&error) {
        Err(PluginError::Transport(error.to_string()))
    } else {
        Ok(QueryResult::failure(error.to_string()))
    }
}

fn sqlite_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(f.to_string())),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(hex_bytes(bytes)),
    }
}

fn run_statement(conn: &RusqliteConnection, sql: &str) -> PluginResult<QueryResult> {
    let start = Instant::now();

    let mut stmt = match conn.prepare(sql) {
        Ok(stmt) => stmt,
        Err(e) => return classify_error(e),
    };

    let fields: Vec<FieldInfo> = stmt
        .columns()
        .iter()
        .map(|column| FieldInfo {
            name: column.name().to_string(),
            data_type: column.decl_type().unwrap_or("ANY").to_uppercase(),
            data_type_id: None,
        })
        .collect();

    if fields.is_empty() {
        let affected = match stmt.execute([]) {
            Ok(affected) => affected,
            Err(e) => return classify_error(e),
        };
        return Ok(QueryResult::success(QueryOutput {
            rows: Vec::new(),
            row_count: Some(affected as u64),
            fields,
            execution_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        }));
    }

    let mut rows_out: Vec<Row> = Vec::new();
    let mut rows = match stmt.query([]) {
        Ok(rows) => rows,
        Err(e) => return classify_error(e),
    };
    loop {
        match rows.next() {
            Ok(Some(row)) => {
                let mut out = Row::new();
                for (idx, field) in fields.iter().enumerate() {
                    let value = row
                        .get_ref(idx)
                        .map(sqlite_value)
                        .unwrap_or(Value::Null);
                    out.insert(field.name.clone(), value);
                }
                rows_out.push(out);
            }
            Ok(None) => break,
            Err(e) => return classify_error(e),
        }
    }

    let count = rows_out.len() as u64;
    Ok(QueryResult::success(QueryOutput {
        rows: rows_out,
        row_count: Some(count),
        fields,
        execution_time_ms: start.elapsed().as_secs_f64() * 1000.0,
    }))
}

/// Opens and drives SQLite connections
#[derive(Default)]
pub struct SqlitePoolManager;

impl SqlitePoolManager {
    pub fn new() -> Self {
        Self
    }

    fn open(path: &str) -> PluginResult<RusqliteConnection> {
        let conn = RusqliteConnection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .map_err(|e| PluginError::ConnectionFailed(format!("Failed to open SQLite database: {}", e)))?;

        // Reading the schema fails fast on files that are not databases
        conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
            .map_err(|e| PluginError::ConnectionFailed(format!("Failed to open SQLite database: {}", e)))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| PluginError::ConnectionFailed(e.to_string()))?;

        Ok(conn)
    }
}

#[async_trait::async_trait]
impl PoolManager for SqlitePoolManager {
    type Pool = SqlitePool;

    async fn create_connection(
        &self,
        config: &ConnectionConfig,
    ) -> PluginResult<NewConnection<SqlitePool>> {
        let path = resolve_database_path(&config.database)?;

        let open_path = path.clone();
        let conn = tokio::task::spawn_blocking(move || Self::open(&open_path))
            .await
            .map_err(|e| PluginError::ConnectionFailed(e.to_string()))??;

        let connection = Connection::new(config.clone());
        tracing::info!(connection_id = %connection.connection_id, path = %path, "opened sqlite database");

        Ok(NewConnection {
            connection,
            pool: SqlitePool {
                path,
                conn: Arc::new(Mutex::new(Some(conn))),
            },
        })
    }

    async fn get_server_version(&self, pool: &SqlitePool) -> PluginResult<String> {
        pool.run(|conn| {
            conn.query_row("SELECT sqlite_version()", [], |row| row.get::<_, String>(0))
                .map(|v| format!("SQLite {}", v))
                .map_err(|e| PluginError::Transport(e.to_string()))
        })
        .await
    }

    async fn execute_query(&self, pool: &SqlitePool, statement: &str) -> PluginResult<QueryResult> {
        let sql = statement.to_string();
        pool.run(move |conn| run_statement(conn, &sql)).await
    }

    async fn close_connection(
        &self,
        connection: &mut Connection,
        pool: &SqlitePool,
    ) -> PluginResult<bool> {
        let slot = Arc::clone(&pool.conn);
        let closed = tokio::task::spawn_blocking(move || {
            let taken = slot
                .lock()
                .map_err(|_| PluginError::Close("SQLite connection lock poisoned".to_string()))?
                .take();
            match taken {
                Some(conn) => conn.close().map_err(|(_, e)| PluginError::Close(e.to_string())),
                None => Ok(()),
            }
        })
        .await
        .map_err(|e| PluginError::Close(e.to_string()))?;

        connection.mark_inactive();
        closed.map(|_| true)
    }

    async fn is_connection_healthy(&self, pool: &SqlitePool) -> bool {
        if pool.path() != MEMORY_PATH && !Path::new(pool.path()).exists() {
            return false;
        }
        pool.run(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(|e| PluginError::Transport(e.to_string()))
        })
        .await
        .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::traits::EngineId;

    fn config_for(path: &Path) -> ConnectionConfig {
        ConnectionConfig::new(EngineId::Sqlite, "local", path.to_string_lossy())
    }

    #[test]
    fn test_resolve_database_path() {
        assert!(matches!(
            resolve_database_path("   "),
            Err(PluginError::InvalidConfig(_))
        ));
        assert_eq!(resolve_database_path("/tmp/a.db").unwrap(), "/tmp/a.db");
        if let Some(home) = std::env::var_os("HOME") {
            let expected = Path::new(&home).join("data/a.db");
            assert_eq!(
                resolve_database_path("~/data/a.db").unwrap(),
                expected.to_string_lossy()
            );
        }
    }

    #[tokio::test]
    async fn test_execute_statements() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SqlitePoolManager::new();
        let created = manager
            .create_connection(&config_for(&dir.path().join("app.db")))
            .await
            .unwrap();
        let pool = created.pool;

        let ddl = manager
            .execute_query(&pool, "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, score REAL, avatar BLOB)")
            .await
            .unwrap();
        assert!(ddl.success);

        let insert = manager
            .execute_query(&pool, "INSERT INTO users (name, score, avatar) VALUES ('ada', 9.5, x'0102'), ('bob', NULL, NULL)")
            .await
            .unwrap();
        assert_eq!(insert.result.unwrap().row_count, Some(2));

        let select = manager
            .execute_query(&pool, "SELECT id, name, score, avatar FROM users ORDER BY id")
            .await
            .unwrap();
        assert!(select.success);
        let output = select.result.unwrap();
        assert_eq!(output.row_count, Some(2));
        assert_eq!(output.fields[1].name, "name");
        assert_eq!(output.fields[1].data_type, "TEXT");
        assert_eq!(output.rows[0]["name"], "ada");
        assert_eq!(output.rows[0]["score"], 9.5);
        assert_eq!(output.rows[0]["avatar"], "\\x0102");
        assert_eq!(output.rows[1]["score"], Value::Null);
        assert!(output.execution_time_ms > 0.0);
    }

    #[tokio::test]
    async fn test_sql_error_is_a_result() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SqlitePoolManager::new();
        let pool = manager
            .create_connection(&config_for(&dir.path().join("app.db")))
            .await
            .unwrap()
            .pool;

        let result = manager.execute_query(&pool, "SELECT * FROM missing").await.unwrap();

        assert!(!result.success);
        assert!(result.message.contains("no such table"));
        assert!(result.result.is_none());
    }

    #[tokio::test]
    async fn test_version_and_health() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SqlitePoolManager::new();
        let NewConnection { mut connection, pool } = manager
            .create_connection(&config_for(&dir.path().join("app.db")))
            .await
            .unwrap();

        assert!(manager.get_server_version(&pool).await.unwrap().starts_with("SQLite 3"));
        assert!(manager.is_connection_healthy(&pool).await);

        assert!(manager.close_connection(&mut connection, &pool).await.unwrap());
        assert!(!connection.is_active);
        assert!(!manager.is_connection_healthy(&pool).await);
        assert!(matches!(
            manager.execute_query(&pool, "SELECT 1").await,
            Err(PluginError::Transport(_))
        ));

        // A second close is harmless
        assert!(manager.close_connection(&mut connection, &pool).await.unwrap());
    }

    #[tokio::test]
    async fn test_deleted_file_is_unhealthy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.db");
        let manager = SqlitePoolManager::new();
        let pool = manager.create_connection(&config_for(&path)).await.unwrap().pool;

        std::fs::remove_file(&path).unwrap();

        assert!(!manager.is_connection_healthy(&pool).await);
    }

    #[tokio::test]
    async fn test_rejects_non_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "this is definitely not a sqlite database file at all").unwrap();

        let result = SqlitePoolManager::new().create_connection(&config_for(&path)).await;
        assert!(matches!(result, Err(PluginError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_in_memory_database() {
        let manager = SqlitePoolManager::new();
        let config = ConnectionConfig::new(EngineId::Sqlite, "scratch", MEMORY_PATH);
        let pool = manager.create_connection(&config).await.unwrap().pool;

        assert!(manager.is_connection_healthy(&pool).await);
        let result = manager.execute_query(&pool, "SELECT 1 + 1 AS two").await.unwrap();
        assert_eq!(result.result.unwrap().rows[0]["two"], 2);
    }
}
