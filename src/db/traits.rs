// Core data model and error types shared by every database plugin

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported database engines
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum EngineId {
    Postgresql,
    Sqlite,
    Mysql,
    Mariadb,
    Sqlserver,
    Oracle,
}

impl EngineId {
    /// Stable wire name, identical to the serde representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineId::Postgresql => "postgresql",
            EngineId::Sqlite => "sqlite",
            EngineId::Mysql => "mysql",
            EngineId::Mariadb => "mariadb",
            EngineId::Sqlserver => "sqlserver",
            EngineId::Oracle => "oracle",
        }
    }

    /// Display name for UI
    pub fn display_name(&self) -> &'static str {
        match self {
            EngineId::Postgresql => "PostgreSQL",
            EngineId::Sqlite => "SQLite",
            EngineId::Mysql => "MySQL",
            EngineId::Mariadb => "MariaDB",
            EngineId::Sqlserver => "SQL Server",
            EngineId::Oracle => "Oracle",
        }
    }

    /// Default port for the engine
    pub fn default_port(&self) -> u16 {
        match self {
            EngineId::Postgresql => 5432,
            EngineId::Sqlite => 0, // File-based, no port
            EngineId::Mysql | EngineId::Mariadb => 3306,
            EngineId::Sqlserver => 1433,
            EngineId::Oracle => 1521,
        }
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineId {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgresql" => Ok(EngineId::Postgresql),
            "sqlite" => Ok(EngineId::Sqlite),
            "mysql" => Ok(EngineId::Mysql),
            "mariadb" => Ok(EngineId::Mariadb),
            "sqlserver" => Ok(EngineId::Sqlserver),
            "oracle" => Ok(EngineId::Oracle),
            other => Err(PluginError::InvalidConfig(format!("unknown engine: {other}"))),
        }
    }
}

/// Static description of a registered plugin
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabasePluginConfig {
    pub id: EngineId,
    pub name: String,
}

impl DatabasePluginConfig {
    pub fn for_engine(id: EngineId) -> Self {
        Self {
            id,
            name: id.display_name().to_string(),
        }
    }
}

/// User-supplied connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub plugin_id: EngineId,
    pub name: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    pub database: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ConnectionConfig {
    pub fn new(plugin_id: EngineId, name: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            plugin_id,
            name: name.into(),
            host: String::new(),
            port: plugin_id.default_port(),
            database: database.into(),
            user: None,
            password: None,
        }
    }

    /// Port to dial, falling back to the engine default when unset
    pub fn effective_port(&self) -> u16 {
        if self.port == 0 {
            self.plugin_id.default_port()
        } else {
            self.port
        }
    }
}

/// Logical connection: the durable record of a configured connection,
/// independent of whether a physical pool currently backs it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub connection_id: String,
    pub connection_config: ConnectionConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
}

impl Connection {
    /// Mint a new logical connection with a fresh id
    pub fn new(connection_config: ConnectionConfig) -> Self {
        let now = Utc::now();
        Self {
            connection_id: uuid::Uuid::new_v4().to_string(),
            connection_config,
            created_at: now,
            updated_at: now,
            is_active: true,
        }
    }

    /// Bump `updated_at`. Always moves forward, even when the clock has not ticked.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + chrono::Duration::microseconds(1)
        };
    }

    pub fn mark_active(&mut self) {
        self.is_active = true;
        self.touch();
    }

    pub fn mark_inactive(&mut self) {
        self.is_active = false;
        self.touch();
    }
}

/// Outcome of a create or test request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_time: Option<u64>,
}

impl ConnectionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            connection_time: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            connection_time: None,
        }
    }
}

/// One result row, keyed by column name
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Column metadata for a result set
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FieldInfo {
    pub name: String,
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type_id: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryOutput {
    pub rows: Vec<Row>,
    pub row_count: Option<u64>,
    pub fields: Vec<FieldInfo>,
    pub execution_time_ms: f64,
}

/// Result of executing one statement. SQL errors are reported here with
/// `success == false`; they are data, not control flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<QueryOutput>,
}

impl QueryResult {
    pub fn success(output: QueryOutput) -> Self {
        Self {
            success: true,
            message: "Query executed successfully".to_string(),
            result: Some(output),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            result: None,
        }
    }
}

/// Errors raised by a plugin's pool manager or metadata provider
#[derive(Debug, Clone, thiserror::Error)]
pub enum PluginError {
    /// Engine unreachable, bad credentials, or a failed connect check
    #[error("{0}")]
    ConnectionFailed(String),

    /// Driver-level failure while talking to an established pool
    #[error("{0}")]
    Transport(String),

    #[error("Failed to close connection: {0}")]
    Close(String),

    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    #[error("Pool handle does not belong to the {0} plugin")]
    InvalidPoolHandle(EngineId),

    #[error("{0} is not supported by this plugin")]
    Unsupported(String),

    #[error("Failed to get {0}")]
    Metadata(String),
}

/// Errors raised by the connection manager and plugin registry
#[derive(Debug, Clone, thiserror::Error)]
pub enum ManagerError {
    #[error("Plugin not found: {0}")]
    PluginNotFound(EngineId),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

pub type PluginResult<T> = Result<T, PluginError>;

/// Render binary column data the way PostgreSQL prints bytea (`\\x` + hex)
pub(crate) fn hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> ConnectionConfig {
        ConnectionConfig {
            plugin_id: EngineId::Postgresql,
            name: "local".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            database: "db".to_string(),
            user: Some("u".to_string()),
            password: Some("p".to_string()),
        }
    }

    #[test]
    fn test_engine_wire_names() {
        assert_eq!(serde_json::to_string(&EngineId::Postgresql).unwrap(), "\"postgresql\"");
        let parsed: EngineId = serde_json::from_str("\"sqlserver\"").unwrap();
        assert_eq!(parsed, EngineId::Sqlserver);
        assert_eq!(EngineId::Sqlite.to_string(), "sqlite");
        assert!(serde_json::from_str::<EngineId>("\"db2\"").is_err());
    }

    #[test]
    fn test_engine_from_str_matches_wire_names() {
        for engine in [EngineId::Postgresql, EngineId::Sqlite, EngineId::Sqlserver] {
            assert_eq!(engine.as_str().parse::<EngineId>().unwrap(), engine);
        }
        assert!("db2".parse::<EngineId>().is_err());
        assert!("SQLite".parse::<EngineId>().is_err());
    }

    #[test]
    fn test_connection_wire_format_is_camel_case() {
        let connection = Connection::new(sample_config());
        let value = serde_json::to_value(&connection).unwrap();

        assert!(value.get("connectionId").is_some());
        assert!(value.get("isActive").is_some());
        assert_eq!(value["connectionConfig"]["pluginId"], "postgresql");
        assert_eq!(value["connectionConfig"]["port"], 5432);
    }

    #[test]
    fn test_new_connection_ids_are_unique() {
        let a = Connection::new(sample_config());
        let b = Connection::new(sample_config());

        assert_ne!(a.connection_id, b.connection_id);
        assert_eq!(a.created_at, a.updated_at);
        assert!(a.is_active);
    }

    #[test]
    fn test_touch_strictly_increases() {
        let mut connection = Connection::new(sample_config());
        let mut previous = connection.updated_at;
        for _ in 0..100 {
            connection.touch();
            assert!(connection.updated_at > previous);
            previous = connection.updated_at;
        }
    }

    #[test]
    fn test_effective_port_defaults() {
        let mut config = sample_config();
        config.port = 0;
        assert_eq!(config.effective_port(), 5432);
    }

    #[test]
    fn test_hex_bytes() {
        assert_eq!(hex_bytes(&[0xde, 0xad, 0x01]), "\\xdead01");
        assert_eq!(hex_bytes(&[]), "\\x");
    }

    #[test]
    fn test_query_result_omits_missing_output() {
        let json = serde_json::to_value(QueryResult::failure("syntax error")).unwrap();
        assert_eq!(json["success"], false);
        assert!(json.get("result").is_none());
    }
}
