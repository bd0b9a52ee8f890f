// Schema introspection contract
//
// Providers are typed on their plugin's pool. The orchestrator reaches them
// through `MetadataRequest`, which names one provider call and its arguments.

use crate::db::traits::{PluginError, PluginResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub name: String,
    pub database_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TableType {
    #[serde(rename = "TABLE")]
    Table,
    #[serde(rename = "VIEW")]
    View,
    #[serde(rename = "MATERIALIZED VIEW")]
    MaterializedView,
    #[serde(rename = "SYSTEM TABLE")]
    SystemTable,
    #[serde(rename = "SYSTEM VIEW")]
    SystemView,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub name: String,
    pub database_name: String,
    pub schema_name: String,
    #[serde(rename = "type")]
    pub table_type: TableType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ddl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TableColumn {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub ordinal_position: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_maximum_length: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_precision: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_scale: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_primary_key: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_auto_increment: Option<bool>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IndexType {
    #[serde(rename = "PRIMARY KEY")]
    PrimaryKey,
    #[serde(rename = "UNIQUE")]
    Unique,
    #[serde(rename = "INDEX")]
    Index,
    #[serde(rename = "FOREIGN KEY")]
    ForeignKey,
    #[serde(rename = "CHECK")]
    Check,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TableIndexColumn {
    pub column_name: String,
    pub ordinal_position: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asc_or_desc: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TableIndex {
    pub name: String,
    pub database_name: String,
    pub schema_name: String,
    pub table_name: String,
    #[serde(rename = "type")]
    pub index_type: IndexType,
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub column_list: Vec<TableIndexColumn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_schema_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_table_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_column_name_list: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct View {
    pub name: String,
    pub database_name: String,
    pub schema_name: String,
    pub definition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseFunction {
    pub database_name: String,
    pub schema_name: String,
    pub function_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_body: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Procedure {
    pub database_name: String,
    pub schema_name: String,
    pub procedure_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procedure_body: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    pub database_name: String,
    pub schema_name: String,
    pub trigger_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_enabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Sequence {
    pub name: String,
    pub database_name: String,
    pub schema_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub increment_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseUser {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_login: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_superuser: Option<bool>,
}

/// Introspection surface of a plugin. Only the basic structure calls are
/// mandatory; the rest default to `Unsupported`.
#[async_trait::async_trait]
pub trait MetadataProvider: Send + Sync {
    type Pool: Send + Sync + 'static;

    async fn get_databases(&self, pool: &Self::Pool) -> PluginResult<Vec<Database>>;

    async fn get_schemas(&self, pool: &Self::Pool, database_name: &str)
        -> PluginResult<Vec<Schema>>;

    async fn get_tables(
        &self,
        pool: &Self::Pool,
        database_name: &str,
        schema_name: &str,
    ) -> PluginResult<Vec<Table>>;

    async fn get_columns(
        &self,
        pool: &Self::Pool,
        database_name: &str,
        schema_name: &str,
        table_name: &str,
    ) -> PluginResult<Vec<TableColumn>>;

    async fn get_indexes(
        &self,
        pool: &Self::Pool,
        database_name: &str,
        schema_name: &str,
        table_name: &str,
    ) -> PluginResult<Vec<TableIndex>>;

    async fn get_table_ddl(
        &self,
        _pool: &Self::Pool,
        _database_name: &str,
        _schema_name: &str,
        _table_name: &str,
    ) -> PluginResult<String> {
        Err(PluginError::Unsupported("Table DDL".to_string()))
    }

    async fn get_views(
        &self,
        _pool: &Self::Pool,
        _database_name: &str,
        _schema_name: &str,
    ) -> PluginResult<Vec<View>> {
        Err(PluginError::Unsupported("Views".to_string()))
    }

    async fn get_view(
        &self,
        _pool: &Self::Pool,
        _database_name: &str,
        _schema_name: &str,
        _view_name: &str,
    ) -> PluginResult<View> {
        Err(PluginError::Unsupported("Views".to_string()))
    }

    async fn get_functions(
        &self,
        _pool: &Self::Pool,
        _database_name: &str,
        _schema_name: &str,
    ) -> PluginResult<Vec<DatabaseFunction>> {
        Err(PluginError::Unsupported("Functions".to_string()))
    }

    async fn get_function(
        &self,
        _pool: &Self::Pool,
        _database_name: &str,
        _schema_name: &str,
        _function_name: &str,
    ) -> PluginResult<DatabaseFunction> {
        Err(PluginError::Unsupported("Functions".to_string()))
    }

    async fn get_procedures(
        &self,
        _pool: &Self::Pool,
        _database_name: &str,
        _schema_name: &str,
    ) -> PluginResult<Vec<Procedure>> {
        Err(PluginError::Unsupported("Procedures".to_string()))
    }

    async fn get_procedure(
        &self,
        _pool: &Self::Pool,
        _database_name: &str,
        _schema_name: &str,
        _procedure_name: &str,
    ) -> PluginResult<Procedure> {
        Err(PluginError::Unsupported("Procedures".to_string()))
    }

    async fn get_triggers(
        &self,
        _pool: &Self::Pool,
        _database_name: &str,
        _schema_name: &str,
    ) -> PluginResult<Vec<Trigger>> {
        Err(PluginError::Unsupported("Triggers".to_string()))
    }

    async fn get_trigger(
        &self,
        _pool: &Self::Pool,
        _database_name: &str,
        _schema_name: &str,
        _trigger_name: &str,
    ) -> PluginResult<Trigger> {
        Err(PluginError::Unsupported("Triggers".to_string()))
    }

    async fn get_sequences(
        &self,
        _pool: &Self::Pool,
        _database_name: &str,
        _schema_name: &str,
    ) -> PluginResult<Vec<Sequence>> {
        Err(PluginError::Unsupported("Sequences".to_string()))
    }

    async fn get_sequence(
        &self,
        _pool: &Self::Pool,
        _database_name: &str,
        _schema_name: &str,
        _sequence_name: &str,
    ) -> PluginResult<Sequence> {
        Err(PluginError::Unsupported("Sequences".to_string()))
    }

    async fn get_users(&self, _pool: &Self::Pool) -> PluginResult<Vec<DatabaseUser>> {
        Err(PluginError::Unsupported("Users".to_string()))
    }
}

/// One introspection call, as sent by the UI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(
    tag = "kind",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum MetadataRequest {
    Databases,
    Schemas {
        database_name: String,
    },
    Tables {
        database_name: String,
        schema_name: String,
    },
    Columns {
        database_name: String,
        schema_name: String,
        table_name: String,
    },
    Indexes {
        database_name: String,
        schema_name: String,
        table_name: String,
    },
    TableDdl {
        database_name: String,
        schema_name: String,
        table_name: String,
    },
    Views {
        database_name: String,
        schema_name: String,
    },
    View {
        database_name: String,
        schema_name: String,
        view_name: String,
    },
    Functions {
        database_name: String,
        schema_name: String,
    },
    Function {
        database_name: String,
        schema_name: String,
        function_name: String,
    },
    Procedures {
        database_name: String,
        schema_name: String,
    },
    Procedure {
        database_name: String,
        schema_name: String,
        procedure_name: String,
    },
    Triggers {
        database_name: String,
        schema_name: String,
    },
    Trigger {
        database_name: String,
        schema_name: String,
        trigger_name: String,
    },
    Sequences {
        database_name: String,
        schema_name: String,
    },
    Sequence {
        database_name: String,
        schema_name: String,
        sequence_name: String,
    },
    Users,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum MetadataResponse {
    Databases(Vec<Database>),
    Schemas(Vec<Schema>),
    Tables(Vec<Table>),
    Columns(Vec<TableColumn>),
    Indexes(Vec<TableIndex>),
    TableDdl(String),
    Views(Vec<View>),
    View(View),
    Functions(Vec<DatabaseFunction>),
    Function(DatabaseFunction),
    Procedures(Vec<Procedure>),
    Procedure(Procedure),
    Triggers(Vec<Trigger>),
    Trigger(Trigger),
    Sequences(Vec<Sequence>),
    Sequence(Sequence),
    Users(Vec<DatabaseUser>),
}

impl MetadataRequest {
    /// Route this request to the matching provider call.
    pub async fn dispatch<M>(self, provider: &M, pool: &M::Pool) -> PluginResult<MetadataResponse>
    where
        M: MetadataProvider + ?Sized,
    {
        use MetadataRequest as Req;
        use MetadataResponse as Res;

        let response = match self {
            Req::Databases => Res::Databases(provider.get_databases(pool).await?),
            Req::Schemas { database_name } => {
                Res::Schemas(provider.get_schemas(pool, &database_name).await?)
            }
            Req::Tables { database_name, schema_name } => {
                Res::Tables(provider.get_tables(pool, &database_name, &schema_name).await?)
            }
            Req::Columns { database_name, schema_name, table_name } => Res::Columns(
                provider
                    .get_columns(pool, &database_name, &schema_name, &table_name)
                    .await?,
            ),
            Req::Indexes { database_name, schema_name, table_name } => Res::Indexes(
                provider
                    .get_indexes(pool, &database_name, &schema_name, &table_name)
                    .await?,
            ),
            Req::TableDdl { database_name, schema_name, table_name } => Res::TableDdl(
                provider
                    .get_table_ddl(pool, &database_name, &schema_name, &table_name)
                    .await?,
            ),
            Req::Views { database_name, schema_name } => {
                Res::Views(provider.get_views(pool, &database_name, &schema_name).await?)
            }
            Req::View { database_name, schema_name, view_name } => Res::View(
                provider
                    .get_view(pool, &database_name, &schema_name, &view_name)
                    .await?,
            ),
            Req::Functions { database_name, schema_name } => {
                Res::Functions(provider.get_functions(pool, &database_name, &schema_name).await?)
            }
            Req::Function { database_name, schema_name, function_name } => Res::Function(
                provider
                    .get_function(pool, &database_name, &schema_name, &function_name)
                    .await?,
            ),
            Req::Procedures { database_name, schema_name } => Res::Procedures(
                provider.get_procedures(pool, &database_name, &schema_name).await?,
            ),
            Req::Procedure { database_name, schema_name, procedure_name } => Res::Procedure(
                provider
                    .get_procedure(pool, &database_name, &schema_name, &procedure_name)
                    .await?,
            ),
            Req::Triggers { database_name, schema_name } => {
                Res::Triggers(provider.get_triggers(pool, &database_name, &schema_name).await?)
            }
            Req::Trigger { database_name, schema_name, trigger_name } => Res::Trigger(
                provider
                    .get_trigger(pool, &database_name, &schema_name, &trigger_name)
                    .await?,
            ),
            Req::Sequences { database_name, schema_name } => {
                Res::Sequences(provider.get_sequences(pool, &database_name, &schema_name).await?)
            }
            Req::Sequence { database_name, schema_name, sequence_name } => Res::Sequence(
                provider
                    .get_sequence(pool, &database_name, &schema_name, &sequence_name)
                    .await?,
            ),
            Req::Users => Res::Users(provider.get_users(pool).await?),
        };

        Ok(response)
    }
}

/// Sort names alphabetically, pushing the given system names to the end.
pub(crate) fn system_last<T>(items: &mut [T], system: &[&str], name: impl Fn(&T) -> &str) {
    items.sort_by(|a, b| {
        let a_system = system.contains(&name(a));
        let b_system = system.contains(&name(b));
        a_system.cmp(&b_system).then_with(|| name(a).cmp(name(b)))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let request: MetadataRequest = serde_json::from_value(serde_json::json!({
            "kind": "columns",
            "databaseName": "app",
            "schemaName": "public",
            "tableName": "users",
        }))
        .unwrap();

        assert_eq!(
            request,
            MetadataRequest::Columns {
                database_name: "app".to_string(),
                schema_name: "public".to_string(),
                table_name: "users".to_string(),
            }
        );

        let request: MetadataRequest =
            serde_json::from_value(serde_json::json!({ "kind": "tableDdl", "databaseName": "a", "schemaName": "b", "tableName": "c" }))
                .unwrap();
        assert!(matches!(request, MetadataRequest::TableDdl { .. }));
    }

    #[test]
    fn test_system_last_ordering() {
        let mut names = vec!["pg_catalog", "zeta", "information_schema", "alpha"];
        system_last(&mut names, &["pg_catalog", "information_schema"], |n| n);

        assert_eq!(names, vec!["alpha", "zeta", "information_schema", "pg_catalog"]);
    }

    #[test]
    fn test_table_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&TableType::MaterializedView).unwrap(),
            "\"MATERIALIZED VIEW\""
        );
        assert_eq!(serde_json::to_string(&IndexType::PrimaryKey).unwrap(), "\"PRIMARY KEY\"");
    }
}
