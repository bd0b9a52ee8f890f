// PostgreSQL pool manager
// One bb8 pool per logical connection, built from the user's connection config

use crate::config::PoolSettings;
use crate::db::plugin::{NewConnection, PoolManager};
use crate::db::traits::{
    hex_bytes, Connection, ConnectionConfig, FieldInfo, PluginError, PluginResult, QueryOutput,
    QueryResult, Row,
};
use bb8::{ManageConnection, Pool, PooledConnection};
use bb8_postgres::PostgresConnectionManager as Bb8PostgresManager;
use serde_json::Value;
use std::error::Error as StdError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::NoTls;

type Bb8Pool = Pool<Bb8PostgresManager<NoTls>>;

/// Physical pool behind one PostgreSQL logical connection
#[derive(Debug)]
pub struct PostgresPool {
    pool: Bb8Pool,
    closed: AtomicBool,
}

impl PostgresPool {
    /// Check out a client, failing fast once the pool has been closed
    pub async fn client(
        &self,
    ) -> PluginResult<PooledConnection<'_, Bb8PostgresManager<NoTls>>> {
        if self.is_closed() {
            return Err(PluginError::Transport("Connection pool is closed".to_string()));
        }
        self.pool
            .get()
            .await
            .map_err(|e| PluginError::Transport(format_run_error(&e)))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn new(pool: Bb8Pool) -> Self {
        Self {
            pool,
            closed: AtomicBool::new(false),
        }
    }
}

/// Opens and drives PostgreSQL pools
pub struct PostgresPoolManager {
    settings: PoolSettings,
}

impl PostgresPoolManager {
    pub fn new(settings: PoolSettings) -> Self {
        Self { settings }
    }

    /// Translate a connection config into driver settings
    pub fn build_pg_config(&self, config: &ConnectionConfig) -> tokio_postgres::Config {
        let host = if config.host.trim().is_empty() {
            "localhost"
        } else {
            config.host.trim()
        };

        let mut pg = tokio_postgres::Config::new();
        pg.host(host)
            .port(config.effective_port())
            .dbname(&config.database)
            .application_name("querydock")
            .connect_timeout(self.settings.connect_timeout());
        if let Some(user) = &config.user {
            pg.user(user);
        }
        if let Some(password) = &config.password {
            pg.password(password);
        }
        pg
    }

    /// Pool builder with the configured limits. Failed connects are reported
    /// at once instead of being retried until the connect timeout.
    fn builder(&self) -> bb8::Builder<Bb8PostgresManager<NoTls>> {
        Pool::builder()
            .max_size(self.settings.max_size)
            .min_idle(self.settings.min_idle())
            .idle_timeout(Some(self.settings.idle_timeout()))
            .connection_timeout(self.settings.connect_timeout())
            .retry_connection(false)
    }

    async fn open_pool(&self, config: &ConnectionConfig) -> PluginResult<PostgresPool> {
        let manager = Bb8PostgresManager::new(self.build_pg_config(config), NoTls);

        // Connect once directly so bad credentials or an
        // unreachable host surface here with the driver's own message
        let direct = manager
            .connect()
            .await
            .map_err(|e| PluginError::ConnectionFailed(format_postgres_error(&e)))?;
        drop(direct);

        let pool = self
            .builder()
            .build(manager)
            .await
            .map_err(|e| PluginError::ConnectionFailed(format_postgres_error(&e)))?;

        pool.get()
            .await
            .map_err(|e| PluginError::ConnectionFailed(format_run_error(&e)))?;

        Ok(PostgresPool::new(pool))
    }
}

#[async_trait::async_trait]
impl PoolManager for PostgresPoolManager {
    type Pool = PostgresPool;

    async fn create_connection(
        &self,
        config: &ConnectionConfig,
    ) -> PluginResult<NewConnection<PostgresPool>> {
        if config.database.trim().is_empty() {
            return Err(PluginError::InvalidConfig("database name is required".to_string()));
        }

        let pool = self.open_pool(config).await?;
        let connection = Connection::new(config.clone());
        tracing::info!(
            connection_id = %connection.connection_id,
            host = %config.host,
            database = %config.database,
            "opened postgresql pool"
        );

        Ok(NewConnection { connection, pool })
    }

    async fn get_server_version(&self, pool: &PostgresPool) -> PluginResult<String> {
        let client = pool.client().await?;
        let row = client
            .query_one("SELECT version()", &[])
            .await
            .map_err(|e| PluginError::Transport(format_postgres_error(&e)))?;
        row.try_get::<_, String>(0)
            .map_err(|e| PluginError::Transport(format_postgres_error(&e)))
    }

    async fn execute_query(&self, pool: &PostgresPool, statement: &str) -> PluginResult<QueryResult> {
        let start = Instant::now();
        let client = pool.client().await?;

        let prepared = match client.prepare(statement).await {
            Ok(prepared) => prepared,
            Err(e) => return classify_error(e),
        };

        let fields: Vec<FieldInfo> = prepared
            .columns()
            .iter()
            .map(|column| FieldInfo {
                name: column.name().to_string(),
                data_type: column.type_().name().to_uppercase(),
                data_type_id: Some(column.type_().oid()),
            })
            .collect();

        let (rows, row_count) = if fields.is_empty() {
            match client.execute(&prepared, &[]).await {
                Ok(affected) => (Vec::new(), affected),
                Err(e) => return classify_error(e),
            }
        } else {
            match client.query(&prepared, &[]).await {
                Ok(rows) => {
                    let converted: Vec<Row> = rows.iter().map(row_to_json).collect();
                    let count = converted.len() as u64;
                    (converted, count)
                }
                Err(e) => return classify_error(e),
            }
        };

        Ok(QueryResult::success(QueryOutput {
            rows,
            row_count: Some(row_count),
            fields,
            execution_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        }))
    }

    async fn close_connection(
        &self,
        connection: &mut Connection,
        pool: &PostgresPool,
    ) -> PluginResult<bool> {
        // bb8 has no explicit drain: the flag refuses new checkouts, and the
        // physical connections are dropped with the last clone of the pool.
        // The manager forgets its handle before closing, so only in-flight
        // queries can still hold one.
        pool.closed.store(true, Ordering::SeqCst);
        connection.mark_inactive();

        let state = pool.pool.state();
        tracing::debug!(
            connection_id = %connection.connection_id,
            connections = state.connections,
            idle = state.idle_connections,
            "closed postgresql pool"
        );
        Ok(true)
    }

    async fn is_connection_healthy(&self, pool: &PostgresPool) -> bool {
        match pool.client().await {
            Ok(client) => client.simple_query("SELECT 1").await.is_ok(),
            Err(_) => false,
        }
    }
}

/// Server-reported errors are query results; anything else is a transport failure.
fn classify_error(error: tokio_postgres::Error) -> PluginResult<QueryResult> {
    if error.as_db_error().is_some() {
        Ok(QueryResult::failure(format_postgres_error(&error)))
    } else {
        Err(PluginError::Transport(format_postgres_error(&error)))
    }
}

fn format_run_error(error: &bb8::RunError<tokio_postgres::Error>) -> String {
    match error {
        bb8::RunError::User(e) => format_postgres_error(e),
        bb8::RunError::TimedOut => "Timed out waiting for a pooled connection".to_string(),
    }
}

/// Driver error text. Server errors carry detail and hint; client-side errors
/// carry their cause chain, e.g. "error connecting to server: Connection refused".
pub(crate) fn format_postgres_error(error: &tokio_postgres::Error) -> String {
    let Some(db_error) = error.as_db_error() else {
        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            let cause_text = cause.to_string();
            if !message.contains(&cause_text) {
                message.push_str(": ");
                message.push_str(&cause_text);
            }
            source = cause.source();
        }
        return message;
    };

    let mut message = db_error.message().to_string();

    if let Some(detail) = db_error.detail() {
        if !detail.trim().is_empty() {
            message.push_str(&format!(" (detail: {})", detail));
        }
    }

    if let Some(hint) = db_error.hint() {
        if !hint.trim().is_empty() {
            message.push_str(&format!(" (hint: {})", hint));
        }
    }

    message
}

fn row_to_json(row: &tokio_postgres::Row) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| (column.name().to_string(), pg_value(row, idx, column.type_())))
        .collect()
}

fn get<'a, T: FromSql<'a>>(row: &'a tokio_postgres::Row, idx: usize) -> Option<T> {
    row.try_get::<_, Option<T>>(idx).ok().flatten()
}

fn float_value(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(v.to_string()))
}

fn pg_value(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> Value {
    let value = match ty.name() {
        "bool" => get::<bool>(row, idx).map(Value::Bool),
        "int2" => get::<i16>(row, idx).map(Value::from),
        "int4" => get::<i32>(row, idx).map(Value::from),
        "int8" => get::<i64>(row, idx).map(Value::from),
        "oid" => get::<u32>(row, idx).map(Value::from),
        "float4" => get::<f32>(row, idx).map(|v| float_value(v as f64)),
        "float8" => get::<f64>(row, idx).map(float_value),
        "numeric" => get::<PgNumeric>(row, idx).map(|n| Value::String(n.0)),
        "char" => get::<i8>(row, idx).map(|v| Value::String(((v as u8) as char).to_string())),
        "text" | "varchar" | "bpchar" | "name" | "citext" | "unknown" => {
            get::<String>(row, idx).map(Value::String)
        }
        "uuid" => get::<uuid::Uuid>(row, idx).map(|v| Value::String(v.to_string())),
        "json" | "jsonb" => get::<Value>(row, idx),
        "date" => get::<chrono::NaiveDate>(row, idx).map(|v| Value::String(v.to_string())),
        "time" => get::<chrono::NaiveTime>(row, idx).map(|v| Value::String(v.to_string())),
        "timestamp" => {
            get::<chrono::NaiveDateTime>(row, idx).map(|v| Value::String(v.to_string()))
        }
        "timestamptz" => get::<chrono::DateTime<chrono::Utc>>(row, idx)
            .map(|v| Value::String(v.to_rfc3339())),
        "bytea" => get::<Vec<u8>>(row, idx).map(|bytes| Value::String(hex_bytes(&bytes))),
        "_bool" => get::<Vec<Option<bool>>>(row, idx).map(Value::from),
        "_int2" => get::<Vec<Option<i16>>>(row, idx).map(Value::from),
        "_int4" => get::<Vec<Option<i32>>>(row, idx).map(Value::from),
        "_int8" => get::<Vec<Option<i64>>>(row, idx).map(Value::from),
        "_text" | "_varchar" | "_name" => get::<Vec<Option<String>>>(row, idx).map(Value::from),
        other => match row.try_get::<_, Option<String>>(idx) {
            Ok(v) => v.map(Value::String),
            Err(_) => Some(Value::String(format!("<{}>", other))),
        },
    };

    value.unwrap_or(Value::Null)
}

/// NUMERIC decoded to its exact decimal text
struct PgNumeric(String);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        decode_numeric(raw).map(PgNumeric)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Decode the binary NUMERIC wire format: ndigits, weight, sign, dscale,
/// then base-10000 digits, all big-endian 16-bit.
fn decode_numeric(raw: &[u8]) -> Result<String, Box<dyn StdError + Sync + Send>> {
    let read_u16 = |at: usize| -> Result<u16, Box<dyn StdError + Sync + Send>> {
        raw.get(at..at + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated numeric value".into())
    };

    let ndigits = read_u16(0)? as usize;
    let weight = read_u16(2)? as i16 as i32;
    let sign = read_u16(4)?;
    let dscale = read_u16(6)? as usize;

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|i| read_u16(8 + i * 2))
        .collect::<Result<Vec<u16>, _>>()?;
    let digit_at = |i: i32| -> u16 {
        if i < 0 {
            0
        } else {
            digits.get(i as usize).copied().unwrap_or(0)
        }
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG && digits.iter().any(|d| *d != 0) {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&digit_at(0).to_string());
        for i in 1..=weight {
            out.push_str(&format!("{:04}", digit_at(i)));
        }
    }

    if dscale > 0 {
        let mut fraction = String::new();
        let mut i = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit_at(i)));
            i += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::traits::EngineId;

    fn numeric(weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&(digits.len() as u16).to_be_bytes());
        raw.extend_from_slice(&weight.to_be_bytes());
        raw.extend_from_slice(&sign.to_be_bytes());
        raw.extend_from_slice(&dscale.to_be_bytes());
        for d in digits {
            raw.extend_from_slice(&d.to_be_bytes());
        }
        raw
    }

    #[test]
    fn test_decode_numeric() {
        assert_eq!(decode_numeric(&numeric(1, 0, 3, &[1, 2345, 6780])).unwrap(), "12345.678");
        assert_eq!(decode_numeric(&numeric(-1, 0, 2, &[500])).unwrap(), "0.05");
        assert_eq!(decode_numeric(&numeric(-2, 0, 5, &[1000])).unwrap(), "0.00001");
        assert_eq!(decode_numeric(&numeric(0, NUMERIC_NEG, 0, &[42])).unwrap(), "-42");
        assert_eq!(decode_numeric(&numeric(1, 0, 0, &[1])).unwrap(), "10000");
        assert_eq!(decode_numeric(&numeric(0, 0, 2, &[])).unwrap(), "0.00");
        assert_eq!(decode_numeric(&numeric(0, NUMERIC_NAN, 0, &[])).unwrap(), "NaN");
        assert!(decode_numeric(&[0, 1]).is_err());
    }

    #[test]
    fn test_build_pg_config() {
        let manager = PostgresPoolManager::new(PoolSettings::default());
        let mut config = ConnectionConfig::new(EngineId::Postgresql, "local", "app");
        config.port = 0;
        config.user = Some("admin".to_string());

        let pg = manager.build_pg_config(&config);

        assert_eq!(pg.get_dbname(), Some("app"));
        assert_eq!(pg.get_user(), Some("admin"));
        assert_eq!(pg.get_ports(), &[5432]);
        assert_eq!(
            pg.get_hosts(),
            &[tokio_postgres::config::Host::Tcp("localhost".to_string())]
        );
        assert_eq!(pg.get_connect_timeout(), Some(&std::time::Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_create_rejects_missing_database() {
        let manager = PostgresPoolManager::new(PoolSettings::default());
        let config = ConnectionConfig::new(EngineId::Postgresql, "local", "  ");

        let result = manager.create_connection(&config).await;
        assert!(matches!(result, Err(PluginError::InvalidConfig(_))));
    }

    fn refused_config() -> ConnectionConfig {
        let mut config = ConnectionConfig::new(EngineId::Postgresql, "nowhere", "app");
        config.host = "127.0.0.1".to_string();
        config.port = 1;
        config.user = Some("nobody".to_string());
        config
    }

    #[tokio::test]
    async fn test_refused_connect_fails_fast_with_cause() {
        for min_idle in [0, 1] {
            let settings = PoolSettings {
                min_idle,
                ..PoolSettings::default()
            };
            let manager = PostgresPoolManager::new(settings.clone());

            let started = Instant::now();
            let result = manager.create_connection(&refused_config()).await;
            let elapsed = started.elapsed();

            match result {
                Err(PluginError::ConnectionFailed(message)) => {
                    assert!(
                        message.to_lowercase().contains("refused"),
                        "min_idle={min_idle}: {message}"
                    );
                }
                other => panic!("min_idle={min_idle}: unexpected {other:?}"),
            }
            assert!(
                elapsed < settings.connect_timeout() / 2,
                "min_idle={min_idle}: took {elapsed:?}"
            );
        }
    }

    fn unconnected_pool() -> PostgresPool {
        let manager = PostgresPoolManager::new(PoolSettings {
            min_idle: 0,
            connect_timeout_ms: 500,
            ..PoolSettings::default()
        });
        let pg = manager.build_pg_config(&refused_config());
        let pool = manager
            .builder()
            .build_unchecked(Bb8PostgresManager::new(pg, NoTls));
        PostgresPool::new(pool)
    }

    #[tokio::test]
    async fn test_unreachable_pool_is_unhealthy() {
        let manager = PostgresPoolManager::new(PoolSettings::default());
        let pool = unconnected_pool();

        assert!(!manager.is_connection_healthy(&pool).await);
        match pool.client().await {
            Err(PluginError::Transport(message)) => assert!(!message.is_empty()),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        };
    }

    #[tokio::test]
    async fn test_closed_pool_refuses_checkouts() {
        let manager = PostgresPoolManager::new(PoolSettings::default());
        let pool = unconnected_pool();
        let mut connection = Connection::new(refused_config());

        assert!(manager.close_connection(&mut connection, &pool).await.unwrap());

        assert!(pool.is_closed());
        assert!(!connection.is_active);
        assert_eq!(pool.pool.state().connections, 0);
        assert!(!manager.is_connection_healthy(&pool).await);
        match pool.client().await {
            Err(PluginError::Transport(message)) => assert_eq!(message, "Connection pool is closed"),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        };
    }

    /// Requires a reachable server, e.g.
    /// QUERYDOCK_TEST_PG_URL="host=localhost user=postgres password=postgres dbname=postgres"
    #[tokio::test]
    #[ignore]
    async fn test_live_query_roundtrip() {
        let url = std::env::var("QUERYDOCK_TEST_PG_URL").unwrap();
        let parsed: tokio_postgres::Config = url.parse().unwrap();
        let mut config = ConnectionConfig::new(
            EngineId::Postgresql,
            "live",
            parsed.get_dbname().unwrap_or("postgres"),
        );
        if let Some(tokio_postgres::config::Host::Tcp(host)) = parsed.get_hosts().first() {
            config.host = host.clone();
        }
        config.user = parsed.get_user().map(str::to_string);
        config.password = parsed
            .get_password()
            .map(|p| String::from_utf8_lossy(p).into_owned());

        let manager = PostgresPoolManager::new(PoolSettings::default());
        let NewConnection { mut connection, pool } = manager.create_connection(&config).await.unwrap();

        let result = manager
            .execute_query(&pool, "SELECT 1::int4 AS one, 12.50::numeric AS price, 'x' AS label")
            .await
            .unwrap();
        assert!(result.success);
        let output = result.result.unwrap();
        assert_eq!(output.rows[0]["one"], 1);
        assert_eq!(output.rows[0]["price"], "12.50");

        let failed = manager.execute_query(&pool, "SELEC 1").await.unwrap();
        assert!(!failed.success);

        assert!(manager.get_server_version(&pool).await.unwrap().starts_with("PostgreSQL"));
        assert!(manager.close_connection(&mut connection, &pool).await.unwrap());
        assert!(!manager.is_connection_healthy(&pool).await);
    }
}
