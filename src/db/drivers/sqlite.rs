// SQLite plugin
// File-backed databases; introspection through sqlite_master and the table-valued pragmas

use crate::db::metadata::{
    Database, IndexType, MetadataProvider, Schema, Table, TableColumn, TableIndex,
    TableIndexColumn, TableType, Trigger, View,
};
use crate::db::plugin::DatabasePlugin;
use crate::db::sqlite_manager::{SqlitePool, SqlitePoolManager};
use crate::db::traits::{DatabasePluginConfig, EngineId, PluginError, PluginResult};
use rusqlite::params_from_iter;

/// SQLite plugin implementation
#[derive(Default)]
pub struct SqlitePlugin {
    manager: SqlitePoolManager,
    metadata: SqliteMetadataProvider,
}

impl SqlitePlugin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DatabasePlugin for SqlitePlugin {
    type Pool = SqlitePool;
    type Manager = SqlitePoolManager;
    type Metadata = SqliteMetadataProvider;

    fn config(&self) -> DatabasePluginConfig {
        DatabasePluginConfig::for_engine(EngineId::Sqlite)
    }

    fn connection_manager(&self) -> &SqlitePoolManager {
        &self.manager
    }

    fn metadata(&self) -> &SqliteMetadataProvider {
        &self.metadata
    }
}

#[derive(Default)]
pub struct SqliteMetadataProvider;

/// Quote a schema name for use as a qualifier
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn metadata_error(what: &'static str) -> impl Fn(rusqlite::Error) -> PluginError + Copy {
    move |e| PluginError::Metadata(format!("{}: {}", what, e))
}

async fn query_rows<T, F>(
    pool: &SqlitePool,
    what: &'static str,
    sql: String,
    params: Vec<String>,
    map: F,
) -> PluginResult<Vec<T>>
where
    F: Fn(&rusqlite::Row<'_>) -> rusqlite::Result<T> + Send + 'static,
    T: Send + 'static,
{
    pool.run(move |conn| {
        let fail = metadata_error(what);
        let mut stmt = conn.prepare(&sql).map_err(fail)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| map(row))
            .map_err(fail)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(fail)
    })
    .await
}

fn table_type(kind: &str) -> TableType {
    match kind {
        "view" => TableType::View,
        _ => TableType::Table,
    }
}

#[async_trait::async_trait]
impl MetadataProvider for SqliteMetadataProvider {
    type Pool = SqlitePool;

    async fn get_databases(&self, pool: &SqlitePool) -> PluginResult<Vec<Database>> {
        query_rows(
            pool,
            "databases",
            "SELECT name FROM pragma_database_list ORDER BY seq".to_string(),
            Vec::new(),
            |row| {
                Ok(Database {
                    name: row.get(0)?,
                    comment: None,
                })
            },
        )
        .await
    }

    async fn get_schemas(&self, pool: &SqlitePool, database_name: &str) -> PluginResult<Vec<Schema>> {
        // Every attached database is also its own (only) schema
        let database_name = database_name.to_string();
        query_rows(
            pool,
            "schemas",
            "SELECT name FROM pragma_database_list WHERE name = ?1".to_string(),
            vec![database_name.clone()],
            move |row| {
                Ok(Schema {
                    name: row.get(0)?,
                    database_name: database_name.clone(),
                    comment: None,
                })
            },
        )
        .await
    }

    async fn get_tables(
        &self,
        pool: &SqlitePool,
        database_name: &str,
        schema_name: &str,
    ) -> PluginResult<Vec<Table>> {
        let (database, schema) = (database_name.to_string(), schema_name.to_string());
        query_rows(
            pool,
            "tables",
            "SELECT name, type FROM pragma_table_list \
             WHERE schema = ?1 AND type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
             ORDER BY name"
                .to_string(),
            vec![schema_name.to_string()],
            move |row| {
                let kind: String = row.get(1)?;
                Ok(Table {
                    name: row.get(0)?,
                    database_name: database.clone(),
                    schema_name: schema.clone(),
                    table_type: table_type(&kind),
                    comment: None,
                    ddl: None,
                    row_count: None,
                    size: None,
                })
            },
        )
        .await
    }

    async fn get_columns(
        &self,
        pool: &SqlitePool,
        _database_name: &str,
        schema_name: &str,
        table_name: &str,
    ) -> PluginResult<Vec<TableColumn>> {
        query_rows(
            pool,
            "columns",
            "SELECT cid, name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1, ?2) ORDER BY cid"
                .to_string(),
            vec![table_name.to_string(), schema_name.to_string()],
            |row| {
                let cid: i32 = row.get(0)?;
                let data_type: String = row.get(2)?;
                let not_null: bool = row.get(3)?;
                let pk: i32 = row.get(5)?;
                let is_primary_key = pk > 0;
                Ok(TableColumn {
                    name: row.get(1)?,
                    is_nullable: !not_null && !is_primary_key,
                    column_default: row.get(4)?,
                    ordinal_position: cid + 1,
                    is_primary_key: Some(is_primary_key),
                    // INTEGER PRIMARY KEY aliases the rowid
                    is_auto_increment: Some(is_primary_key && data_type.eq_ignore_ascii_case("INTEGER")),
                    data_type: data_type.to_uppercase(),
                    ..TableColumn::default()
                })
            },
        )
        .await
    }

    async fn get_indexes(
        &self,
        pool: &SqlitePool,
        database_name: &str,
        schema_name: &str,
        table_name: &str,
    ) -> PluginResult<Vec<TableIndex>> {
        let (database, schema, table) = (
            database_name.to_string(),
            schema_name.to_string(),
            table_name.to_string(),
        );

        pool.run(move |conn| {
            let fail = metadata_error("indexes");
            let base = TableIndex {
                name: String::new(),
                database_name: database,
                schema_name: schema.clone(),
                table_name: table.clone(),
                index_type: IndexType::Index,
                unique: false,
                method: None,
                comment: None,
                column_list: Vec::new(),
                foreign_schema_name: None,
                foreign_table_name: None,
                foreign_column_name_list: Vec::new(),
            };
            let mut indexes = Vec::new();

            let mut list = conn
                .prepare("SELECT name, \"unique\", origin FROM pragma_index_list(?1, ?2) ORDER BY name")
                .map_err(fail)?;
            let entries = list
                .query_map([&table, &schema], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?, row.get::<_, String>(2)?))
                })
                .map_err(fail)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(fail)?;

            let mut info = conn
                .prepare(
                    "SELECT seqno, name, \"desc\", coll FROM pragma_index_xinfo(?1, ?2) \
                     WHERE key = 1 ORDER BY seqno",
                )
                .map_err(fail)?;
            for (name, unique, origin) in entries {
                let column_list = info
                    .query_map([&name, &schema], |row| {
                        let descending: bool = row.get(2)?;
                        let order = if descending { "D" } else { "A" };
                        Ok(TableIndexColumn {
                            ordinal_position: row.get::<_, i32>(0)? + 1,
                            column_name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                            collation: row.get(3)?,
                            asc_or_desc: Some(order.to_string()),
                        })
                    })
                    .map_err(fail)?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(fail)?;

                indexes.push(TableIndex {
                    name,
                    index_type: match origin.as_str() {
                        "pk" => IndexType::PrimaryKey,
                        "u" => IndexType::Unique,
                        _ => IndexType::Index,
                    },
                    unique,
                    method: Some("btree".to_string()),
                    column_list,
                    ..base.clone()
                });
            }

            let mut fks = conn
                .prepare(
                    "SELECT id, seq, \"table\", \"from\", \"to\" FROM pragma_foreign_key_list(?1, ?2) \
                     ORDER BY id, seq",
                )
                .map_err(fail)?;
            let rows = fks
                .query_map([&table, &schema], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i32>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                })
                .map_err(fail)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(fail)?;

            let mut current: Option<(i64, TableIndex)> = None;
            for (id, seq, foreign_table, from, to) in rows {
                if current.as_ref().map(|(cur, _)| *cur) != Some(id) {
                    if let Some((_, done)) = current.take() {
                        indexes.push(done);
                    }
                    current = Some((
                        id,
                        TableIndex {
                            name: format!("fk_{}_{}", table, id),
                            index_type: IndexType::ForeignKey,
                            foreign_schema_name: Some(schema.clone()),
                            foreign_table_name: Some(foreign_table),
                            ..base.clone()
                        },
                    ));
                }
                if let Some((_, fk)) = current.as_mut() {
                    fk.column_list.push(TableIndexColumn {
                        column_name: from,
                        ordinal_position: seq + 1,
                        collation: None,
                        asc_or_desc: None,
                    });
                    if let Some(to) = to {
                        fk.foreign_column_name_list.push(to);
                    }
                }
            }
            if let Some((_, done)) = current {
                indexes.push(done);
            }

            Ok(indexes)
        })
        .await
    }

    async fn get_table_ddl(
        &self,
        pool: &SqlitePool,
        _database_name: &str,
        schema_name: &str,
        table_name: &str,
    ) -> PluginResult<String> {
        let sql = format!(
            "SELECT sql FROM {}.sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
            quote_ident(schema_name)
        );
        let rows = query_rows(pool, "table DDL", sql, vec![table_name.to_string()], |row| {
            row.get::<_, Option<String>>(0)
        })
        .await?;

        rows.into_iter()
            .next()
            .flatten()
            .ok_or_else(|| PluginError::Metadata(format!("table DDL: {} does not exist", table_name)))
    }

    async fn get_views(
        &self,
        pool: &SqlitePool,
        database_name: &str,
        schema_name: &str,
    ) -> PluginResult<Vec<View>> {
        let sql = format!(
            "SELECT name, sql FROM {}.sqlite_master WHERE type = 'view' ORDER BY name",
            quote_ident(schema_name)
        );
        let (database, schema) = (database_name.to_string(), schema_name.to_string());
        query_rows(pool, "views", sql, Vec::new(), move |row| {
            Ok(View {
                name: row.get(0)?,
                database_name: database.clone(),
                schema_name: schema.clone(),
                definition: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                comment: None,
            })
        })
        .await
    }

    async fn get_view(
        &self,
        pool: &SqlitePool,
        database_name: &str,
        schema_name: &str,
        view_name: &str,
    ) -> PluginResult<View> {
        let sql = format!(
            "SELECT sql FROM {}.sqlite_master WHERE type = 'view' AND name = ?1",
            quote_ident(schema_name)
        );
        let rows = query_rows(pool, "view", sql, vec![view_name.to_string()], |row| {
            row.get::<_, Option<String>>(0)
        })
        .await?;

        Ok(View {
            name: view_name.to_string(),
            database_name: database_name.to_string(),
            schema_name: schema_name.to_string(),
            definition: rows.into_iter().next().flatten().unwrap_or_default(),
            comment: None,
        })
    }

    async fn get_triggers(
        &self,
        pool: &SqlitePool,
        database_name: &str,
        schema_name: &str,
    ) -> PluginResult<Vec<Trigger>> {
        let sql = format!(
            "SELECT name, tbl_name FROM {}.sqlite_master WHERE type = 'trigger' ORDER BY name",
            quote_ident(schema_name)
        );
        let (database, schema) = (database_name.to_string(), schema_name.to_string());
        query_rows(pool, "triggers", sql, Vec::new(), move |row| {
            Ok(Trigger {
                database_name: database.clone(),
                schema_name: schema.clone(),
                trigger_name: row.get(0)?,
                table_name: row.get(1)?,
                trigger_body: None,
                is_enabled: Some(true),
            })
        })
        .await
    }

    async fn get_trigger(
        &self,
        pool: &SqlitePool,
        database_name: &str,
        schema_name: &str,
        trigger_name: &str,
    ) -> PluginResult<Trigger> {
        let sql = format!(
            "SELECT tbl_name, sql FROM {}.sqlite_master WHERE type = 'trigger' AND name = ?1",
            quote_ident(schema_name)
        );
        let rows = query_rows(pool, "trigger", sql, vec![trigger_name.to_string()], |row| {
            Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?))
        })
        .await?;
        let (table_name, trigger_body) = rows.into_iter().next().unwrap_or((None, None));

        Ok(Trigger {
            database_name: database_name.to_string(),
            schema_name: schema_name.to_string(),
            trigger_name: trigger_name.to_string(),
            is_enabled: table_name.as_ref().map(|_| true),
            table_name,
            trigger_body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::metadata::{MetadataRequest, MetadataResponse};
    use crate::db::plugin::PoolManager;
    use crate::db::traits::ConnectionConfig;

    const SCHEMA: &str = r#"
        CREATE TABLE users (
            id INTEGER PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT DEFAULT 'anon'
        );
        CREATE TABLE orders (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL REFERENCES users(id),
            total REAL
        );
        CREATE INDEX orders_user_idx ON orders (user_id DESC);
        CREATE VIEW big_orders AS SELECT * FROM orders WHERE total > 100;
        CREATE TRIGGER orders_audit AFTER INSERT ON orders BEGIN SELECT 1; END;
    "#;

    async fn setup() -> (SqlitePlugin, SqlitePool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let plugin = SqlitePlugin::new();
        let config = ConnectionConfig::new(
            EngineId::Sqlite,
            "meta",
            dir.path().join("meta.db").to_string_lossy(),
        );
        let pool = plugin
            .connection_manager()
            .create_connection(&config)
            .await
            .unwrap()
            .pool;
        pool.run(|conn| {
            conn.execute_batch(SCHEMA)
                .map_err(|e| PluginError::Transport(e.to_string()))
        })
        .await
        .unwrap();
        (plugin, pool, dir)
    }

    fn to_json(response: MetadataResponse) -> serde_json::Value {
        serde_json::to_value(response).unwrap()
    }

    #[tokio::test]
    async fn test_structure_listing() {
        let (plugin, pool, _dir) = setup().await;

        let databases = to_json(
            MetadataRequest::Databases
                .dispatch(plugin.metadata(), &pool)
                .await
                .unwrap(),
        );
        assert_eq!(databases[0]["name"], "main");

        let request = MetadataRequest::Tables {
            database_name: "main".to_string(),
            schema_name: "main".to_string(),
        };
        let tables = to_json(request.dispatch(plugin.metadata(), &pool).await.unwrap());
        let names: Vec<&str> = tables
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["big_orders", "orders", "users"]);
        assert_eq!(tables[0]["type"], "VIEW");
        assert_eq!(tables[1]["type"], "TABLE");
    }

    #[tokio::test]
    async fn test_columns() {
        let (plugin, pool, _dir) = setup().await;
        let columns = plugin
            .metadata()
            .get_columns(&pool, "main", "main", "users")
            .await
            .unwrap();

        assert_eq!(columns.len(), 3);
        assert_eq!(columns[0].name, "id");
        assert_eq!(columns[0].is_primary_key, Some(true));
        assert_eq!(columns[0].is_auto_increment, Some(true));
        assert!(!columns[1].is_nullable);
        assert_eq!(columns[2].column_default.as_deref(), Some("'anon'"));
        assert_eq!(columns[2].ordinal_position, 3);
    }

    #[tokio::test]
    async fn test_indexes() {
        let (plugin, pool, _dir) = setup().await;
        let meta = plugin.metadata();

        let user_indexes = meta.get_indexes(&pool, "main", "main", "users").await.unwrap();
        assert_eq!(user_indexes.len(), 1);
        assert_eq!(user_indexes[0].index_type, IndexType::Unique);
        assert_eq!(user_indexes[0].column_list[0].column_name, "email");

        let order_indexes = meta.get_indexes(&pool, "main", "main", "orders").await.unwrap();
        let plain = order_indexes.iter().find(|i| i.name == "orders_user_idx").unwrap();
        assert_eq!(plain.index_type, IndexType::Index);
        assert_eq!(plain.column_list[0].asc_or_desc.as_deref(), Some("D"));

        let fk = order_indexes
            .iter()
            .find(|i| i.index_type == IndexType::ForeignKey)
            .unwrap();
        assert_eq!(fk.foreign_table_name.as_deref(), Some("users"));
        assert_eq!(fk.column_list[0].column_name, "user_id");
        assert_eq!(fk.foreign_column_name_list, vec!["id"]);
    }

    #[tokio::test]
    async fn test_views_triggers_and_ddl() {
        let (plugin, pool, _dir) = setup().await;
        let meta = plugin.metadata();

        let views = meta.get_views(&pool, "main", "main").await.unwrap();
        assert_eq!(views.len(), 1);
        assert!(views[0].definition.contains("total > 100"));

        let triggers = meta.get_triggers(&pool, "main", "main").await.unwrap();
        assert_eq!(triggers.len(), 1);

        let trigger = meta.get_trigger(&pool, "main", "main", "orders_audit").await.unwrap();
        assert_eq!(trigger.table_name.as_deref(), Some("orders"));
        assert!(trigger.trigger_body.unwrap().contains("AFTER INSERT"));

        let ddl = meta.get_table_ddl(&pool, "main", "main", "users").await.unwrap();
        assert!(ddl.starts_with("CREATE TABLE users"));

        assert!(matches!(
            meta.get_table_ddl(&pool, "main", "main", "nope").await,
            Err(PluginError::Metadata(_))
        ));
    }

    #[tokio::test]
    async fn test_unsupported_calls() {
        let (plugin, pool, _dir) = setup().await;

        let err = MetadataRequest::Users
            .dispatch(plugin.metadata(), &pool)
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Unsupported(_)));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("main"), "\"main\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
