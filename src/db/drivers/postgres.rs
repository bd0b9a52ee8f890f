// PostgreSQL plugin
// Pool lifecycle lives in postgres_manager; this file wires it up and adds introspection.

use crate::config::PoolSettings;
use crate::db::metadata::{
    system_last, Database, DatabaseFunction, DatabaseUser, IndexType, MetadataProvider, Procedure,
    Schema, Sequence, Table, TableColumn, TableIndex, TableIndexColumn, TableType, Trigger, View,
};
use crate::db::plugin::DatabasePlugin;
use crate::db::postgres_manager::{format_postgres_error, PostgresPool, PostgresPoolManager};
use crate::db::traits::{DatabasePluginConfig, EngineId, PluginError, PluginResult};
use std::collections::HashMap;
use tokio_postgres::types::{FromSql, ToSql};
use tokio_postgres::Row;

const SYSTEM_DATABASES: &[&str] = &["postgres"];
const SYSTEM_SCHEMAS: &[&str] = &[
    "pg_toast",
    "pg_temp_1",
    "pg_toast_temp_1",
    "pg_catalog",
    "information_schema",
];
const TEMPLATE_DATABASES: &[&str] = &["template0", "template1"];

const DATABASES_SQL: &str = "SELECT datname::text FROM pg_catalog.pg_database";

const SCHEMAS_SQL: &str =
    "SELECT catalog_name::text, schema_name::text FROM information_schema.schemata";

const TABLES_SQL: &str = "SELECT table_name::text, table_type::text \
     FROM information_schema.tables WHERE table_schema = $1::text ORDER BY table_name";

const COLUMNS_SQL: &str = r#"
    SELECT
        c.column_name::text AS column_name,
        c.data_type::text AS data_type,
        (c.is_nullable::text = 'YES') AS is_nullable,
        c.column_default::text AS column_default,
        c.ordinal_position::int4 AS ordinal_position,
        c.character_maximum_length::int4 AS character_maximum_length,
        c.numeric_precision::int4 AS numeric_precision,
        c.numeric_scale::int4 AS numeric_scale,
        pg_catalog.col_description(
            format('%I.%I', c.table_schema, c.table_name)::regclass,
            c.ordinal_position::int4
        ) AS comment,
        EXISTS (
            SELECT 1
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON kcu.constraint_name = tc.constraint_name
             AND kcu.table_schema = tc.table_schema
             AND kcu.table_name = tc.table_name
            WHERE tc.constraint_type = 'PRIMARY KEY'
              AND tc.table_schema = c.table_schema
              AND tc.table_name = c.table_name
              AND kcu.column_name = c.column_name
        ) AS is_primary_key,
        COALESCE(c.column_default::text LIKE 'nextval(%', false)
            OR c.is_identity::text = 'YES' AS is_auto_increment
    FROM information_schema.columns c
    WHERE c.table_schema = $1::text AND c.table_name = $2::text
    ORDER BY c.ordinal_position
"#;

const CONSTRAINTS_SQL: &str = r#"
    SELECT
        tc.constraint_name::text AS key_name,
        tc.constraint_type::text AS constraint_type,
        kcu.column_name::text AS column_name,
        ccu.table_schema::text AS foreign_schema_name,
        ccu.table_name::text AS foreign_table_name,
        ccu.column_name::text AS foreign_column_name
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
      ON kcu.constraint_name = tc.constraint_name
     AND kcu.table_schema = tc.table_schema
    JOIN information_schema.constraint_column_usage ccu
      ON ccu.constraint_name = tc.constraint_name
     AND ccu.constraint_schema = tc.constraint_schema
    WHERE tc.table_schema = $1::text AND tc.table_name = $2::text
    ORDER BY tc.constraint_name, kcu.ordinal_position
"#;

const INDEXES_SQL: &str = r#"
    SELECT
        ci.relname::text AS key_name,
        i.indisprimary AS is_primary,
        i.indisunique AS is_unique,
        am.amname::text AS method,
        d.description AS comment,
        k.ord::int4 AS ordinal_position,
        trim(both '"' from pg_catalog.pg_get_indexdef(i.indexrelid, k.ord::int4, false)) AS column_name,
        CASE am.amname
            WHEN 'btree' THEN CASE i.indoption[k.ord - 1] & 1 WHEN 1 THEN 'D' ELSE 'A' END
        END AS collation
    FROM pg_catalog.pg_index i
    JOIN pg_catalog.pg_class ct ON ct.oid = i.indrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = ct.relnamespace
    JOIN pg_catalog.pg_class ci ON ci.oid = i.indexrelid
    JOIN pg_catalog.pg_am am ON am.oid = ci.relam
    LEFT JOIN pg_catalog.pg_description d ON d.objoid = i.indexrelid
    CROSS JOIN LATERAL generate_series(1, i.indnatts::int4) AS k(ord)
    WHERE n.nspname = $1::text AND ct.relname = $2::text
    ORDER BY ci.relname, k.ord
"#;

const VIEWS_SQL: &str = "SELECT viewname::text, definition FROM pg_catalog.pg_views \
     WHERE schemaname = $1::text ORDER BY viewname";

const VIEW_SQL: &str = "SELECT viewname::text, definition FROM pg_catalog.pg_views \
     WHERE schemaname = $1::text AND viewname = $2::text";

const ROUTINES_SQL: &str = r#"
    SELECT p.proname::text, pg_catalog.pg_get_function_result(p.oid), l.lanname::text
    FROM pg_catalog.pg_proc p
    JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
    JOIN pg_catalog.pg_language l ON l.oid = p.prolang
    WHERE n.nspname = $1::text AND p.prokind::text = $2::text
    ORDER BY p.proname
"#;

const ROUTINE_SQL: &str = r#"
    SELECT p.proname::text, pg_catalog.pg_get_function_result(p.oid), l.lanname::text,
           pg_catalog.pg_get_functiondef(p.oid)
    FROM pg_catalog.pg_proc p
    JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
    JOIN pg_catalog.pg_language l ON l.oid = p.prolang
    WHERE n.nspname = $1::text AND p.prokind::text = $2::text AND p.proname = $3::text
    LIMIT 1
"#;

const TRIGGERS_SQL: &str = r#"
    SELECT t.tgname::text, c.relname::text, t.tgenabled::text, pg_catalog.pg_get_triggerdef(t.oid)
    FROM pg_catalog.pg_trigger t
    JOIN pg_catalog.pg_class c ON c.oid = t.tgrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = $1::text AND NOT t.tgisinternal
    ORDER BY t.tgname
"#;

const TRIGGER_SQL: &str = r#"
    SELECT t.tgname::text, c.relname::text, t.tgenabled::text, pg_catalog.pg_get_triggerdef(t.oid)
    FROM pg_catalog.pg_trigger t
    JOIN pg_catalog.pg_class c ON c.oid = t.tgrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = $1::text AND t.tgname = $2::text
    LIMIT 1
"#;

const SEQUENCES_SQL: &str = r#"
    SELECT c.relname::text, pg_catalog.format_type(s.seqtypid, NULL), s.seqstart::text,
           s.seqincrement::text, pg_catalog.obj_description(c.oid, 'pg_class')
    FROM pg_catalog.pg_class c
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    JOIN pg_catalog.pg_sequence s ON s.seqrelid = c.oid
    WHERE c.relkind = 'S' AND n.nspname = $1::text
    ORDER BY c.relname
"#;

const SEQUENCE_SQL: &str = r#"
    SELECT c.relname::text, pg_catalog.format_type(s.seqtypid, NULL), s.seqstart::text,
           s.seqincrement::text, pg_catalog.obj_description(c.oid, 'pg_class')
    FROM pg_catalog.pg_class c
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    JOIN pg_catalog.pg_sequence s ON s.seqrelid = c.oid
    WHERE c.relkind = 'S' AND n.nspname = $1::text AND c.relname = $2::text
"#;

const USERS_SQL: &str =
    "SELECT usename::text, usesuper FROM pg_catalog.pg_user ORDER BY usename";

/// PostgreSQL plugin: bb8 pools plus catalog introspection
pub struct PostgresPlugin {
    manager: PostgresPoolManager,
    metadata: PostgresMetadataProvider,
}

impl PostgresPlugin {
    pub fn new(settings: PoolSettings) -> Self {
        Self {
            manager: PostgresPoolManager::new(settings),
            metadata: PostgresMetadataProvider,
        }
    }
}

impl DatabasePlugin for PostgresPlugin {
    type Pool = PostgresPool;
    type Manager = PostgresPoolManager;
    type Metadata = PostgresMetadataProvider;

    fn config(&self) -> DatabasePluginConfig {
        DatabasePluginConfig::for_engine(EngineId::Postgresql)
    }

    fn connection_manager(&self) -> &PostgresPoolManager {
        &self.manager
    }

    fn metadata(&self) -> &PostgresMetadataProvider {
        &self.metadata
    }
}

pub struct PostgresMetadataProvider;

async fn fetch(
    pool: &PostgresPool,
    what: &str,
    sql: &str,
    params: &[&(dyn ToSql + Sync)],
) -> PluginResult<Vec<Row>> {
    let client = pool
        .client()
        .await
        .map_err(|e| PluginError::Metadata(format!("{}: {}", what, e)))?;
    client.query(sql, params).await.map_err(|e| {
        tracing::error!(error = %e, "failed to get {}", what);
        PluginError::Metadata(format!("{}: {}", what, format_postgres_error(&e)))
    })
}

fn col<'a, T: FromSql<'a>>(row: &'a Row, idx: usize, what: &str) -> PluginResult<T> {
    row.try_get(idx)
        .map_err(|e| PluginError::Metadata(format!("{}: {}", what, e)))
}

/// Information schema spells blank-padded char as BPCHAR in some paths
fn normalize_column_type(data_type: &str) -> String {
    let upper = data_type.to_uppercase();
    if upper == "BPCHAR" {
        "CHAR".to_string()
    } else {
        upper
    }
}

/// One row of the key-constraint query
#[derive(Debug, Clone)]
struct ConstraintRow {
    key_name: String,
    constraint_type: String,
    column_name: Option<String>,
    foreign_schema_name: Option<String>,
    foreign_table_name: Option<String>,
    foreign_column_name: Option<String>,
}

/// One row of the pg_index query: one indexed column
#[derive(Debug, Clone)]
struct IndexRow {
    key_name: String,
    is_primary: bool,
    is_unique: bool,
    method: Option<String>,
    comment: Option<String>,
    ordinal_position: i32,
    column_name: String,
    collation: Option<String>,
}

/// Combine foreign keys from the constraint rows with physical indexes,
/// classifying primary and unique indexes by their backing constraint.
fn merge_indexes(
    database_name: &str,
    schema_name: &str,
    table_name: &str,
    constraints: Vec<ConstraintRow>,
    index_rows: Vec<IndexRow>,
) -> Vec<TableIndex> {
    let mut constraint_types: HashMap<String, String> = HashMap::new();
    let mut indexes: Vec<TableIndex> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for row in constraints {
        constraint_types.insert(row.key_name.clone(), row.constraint_type.clone());
        if !row.constraint_type.eq_ignore_ascii_case("FOREIGN KEY") {
            continue;
        }

        let pos = *positions.entry(row.key_name.clone()).or_insert_with(|| {
            indexes.push(TableIndex {
                name: row.key_name.clone(),
                database_name: database_name.to_string(),
                schema_name: schema_name.to_string(),
                table_name: table_name.to_string(),
                index_type: IndexType::ForeignKey,
                unique: false,
                method: None,
                comment: None,
                column_list: Vec::new(),
                foreign_schema_name: row.foreign_schema_name.clone(),
                foreign_table_name: row.foreign_table_name.clone(),
                foreign_column_name_list: Vec::new(),
            });
            indexes.len() - 1
        });

        let index = &mut indexes[pos];
        if let Some(column) = row.column_name {
            if !index.column_list.iter().any(|c| c.column_name == column) {
                let ordinal = index.column_list.len() as i32 + 1;
                index.column_list.push(TableIndexColumn {
                    column_name: column,
                    ordinal_position: ordinal,
                    collation: None,
                    asc_or_desc: None,
                });
            }
        }
        if let Some(foreign) = row.foreign_column_name {
            if !index.foreign_column_name_list.contains(&foreign) {
                index.foreign_column_name_list.push(foreign);
            }
        }
    }

    for row in index_rows {
        let column = TableIndexColumn {
            column_name: row.column_name,
            ordinal_position: row.ordinal_position,
            collation: row.collation.clone(),
            asc_or_desc: row.collation,
        };

        if let Some(&pos) = positions.get(&row.key_name) {
            let index = &mut indexes[pos];
            index.column_list.push(column);
            index.column_list.sort_by_key(|c| c.ordinal_position);
            continue;
        }

        let index_type = if row.is_primary {
            IndexType::PrimaryKey
        } else if constraint_types
            .get(&row.key_name)
            .is_some_and(|t| t.eq_ignore_ascii_case("UNIQUE"))
        {
            IndexType::Unique
        } else {
            IndexType::Index
        };

        positions.insert(row.key_name.clone(), indexes.len());
        indexes.push(TableIndex {
            name: row.key_name,
            database_name: database_name.to_string(),
            schema_name: schema_name.to_string(),
            table_name: table_name.to_string(),
            index_type,
            unique: row.is_unique,
            method: row.method,
            comment: row.comment,
            column_list: vec![column],
            foreign_schema_name: None,
            foreign_table_name: None,
            foreign_column_name_list: Vec::new(),
        });
    }

    indexes
}

fn routine_kind(procedure: bool) -> &'static str {
    if procedure {
        "p"
    } else {
        "f"
    }
}

#[async_trait::async_trait]
impl MetadataProvider for PostgresMetadataProvider {
    type Pool = PostgresPool;

    async fn get_databases(&self, pool: &PostgresPool) -> PluginResult<Vec<Database>> {
        let what = "databases";
        let rows = fetch(pool, what, DATABASES_SQL, &[]).await?;

        let mut databases = Vec::new();
        for row in &rows {
            let name: String = col(row, 0, what)?;
            if TEMPLATE_DATABASES.contains(&name.as_str()) {
                continue;
            }
            databases.push(Database { name, comment: None });
        }

        system_last(&mut databases, SYSTEM_DATABASES, |d| d.name.as_str());
        Ok(databases)
    }

    async fn get_schemas(&self, pool: &PostgresPool, _database_name: &str) -> PluginResult<Vec<Schema>> {
        let what = "schemas";
        let rows = fetch(pool, what, SCHEMAS_SQL, &[]).await?;

        let mut schemas = rows
            .iter()
            .map(|row| {
                Ok(Schema {
                    database_name: col(row, 0, what)?,
                    name: col(row, 1, what)?,
                    comment: None,
                })
            })
            .collect::<PluginResult<Vec<_>>>()?;

        system_last(&mut schemas, SYSTEM_SCHEMAS, |s| s.name.as_str());
        Ok(schemas)
    }

    async fn get_tables(
        &self,
        pool: &PostgresPool,
        database_name: &str,
        schema_name: &str,
    ) -> PluginResult<Vec<Table>> {
        let what = "tables";
        let rows = fetch(pool, what, TABLES_SQL, &[&schema_name]).await?;

        rows.iter()
            .map(|row| {
                let table_type: String = col(row, 1, what)?;
                Ok(Table {
                    name: col(row, 0, what)?,
                    database_name: database_name.to_string(),
                    schema_name: schema_name.to_string(),
                    table_type: if table_type == "VIEW" {
                        TableType::View
                    } else {
                        TableType::Table
                    },
                    comment: None,
                    ddl: None,
                    row_count: None,
                    size: None,
                })
            })
            .collect()
    }

    async fn get_columns(
        &self,
        pool: &PostgresPool,
        _database_name: &str,
        schema_name: &str,
        table_name: &str,
    ) -> PluginResult<Vec<TableColumn>> {
        let what = "columns";
        let rows = fetch(pool, what, COLUMNS_SQL, &[&schema_name, &table_name]).await?;

        rows.iter()
            .map(|row| {
                let data_type: String = col(row, 1, what)?;
                Ok(TableColumn {
                    name: col(row, 0, what)?,
                    data_type: normalize_column_type(&data_type),
                    is_nullable: col(row, 2, what)?,
                    column_default: col(row, 3, what)?,
                    ordinal_position: col(row, 4, what)?,
                    character_maximum_length: col(row, 5, what)?,
                    numeric_precision: col(row, 6, what)?,
                    numeric_scale: col(row, 7, what)?,
                    comment: col(row, 8, what)?,
                    is_primary_key: col(row, 9, what)?,
                    is_auto_increment: col(row, 10, what)?,
                })
            })
            .collect()
    }

    async fn get_indexes(
        &self,
        pool: &PostgresPool,
        database_name: &str,
        schema_name: &str,
        table_name: &str,
    ) -> PluginResult<Vec<TableIndex>> {
        let what = "indexes";

        let constraints = fetch(pool, what, CONSTRAINTS_SQL, &[&schema_name, &table_name])
            .await?
            .iter()
            .map(|row| {
                Ok(ConstraintRow {
                    key_name: col(row, 0, what)?,
                    constraint_type: col(row, 1, what)?,
                    column_name: col(row, 2, what)?,
                    foreign_schema_name: col(row, 3, what)?,
                    foreign_table_name: col(row, 4, what)?,
                    foreign_column_name: col(row, 5, what)?,
                })
            })
            .collect::<PluginResult<Vec<_>>>()?;

        let index_rows = fetch(pool, what, INDEXES_SQL, &[&schema_name, &table_name])
            .await?
            .iter()
            .map(|row| {
                Ok(IndexRow {
                    key_name: col(row, 0, what)?,
                    is_primary: col(row, 1, what)?,
                    is_unique: col(row, 2, what)?,
                    method: col(row, 3, what)?,
                    comment: col(row, 4, what)?,
                    ordinal_position: col(row, 5, what)?,
                    column_name: col(row, 6, what)?,
                    collation: col(row, 7, what)?,
                })
            })
            .collect::<PluginResult<Vec<_>>>()?;

        Ok(merge_indexes(
            database_name,
            schema_name,
            table_name,
            constraints,
            index_rows,
        ))
    }

    async fn get_views(
        &self,
        pool: &PostgresPool,
        database_name: &str,
        schema_name: &str,
    ) -> PluginResult<Vec<View>> {
        let what = "views";
        let rows = fetch(pool, what, VIEWS_SQL, &[&schema_name]).await?;

        rows.iter()
            .map(|row| {
                Ok(View {
                    name: col(row, 0, what)?,
                    database_name: database_name.to_string(),
                    schema_name: schema_name.to_string(),
                    definition: col::<Option<String>>(row, 1, what)?.unwrap_or_default(),
                    comment: None,
                })
            })
            .collect()
    }

    async fn get_view(
        &self,
        pool: &PostgresPool,
        database_name: &str,
        schema_name: &str,
        view_name: &str,
    ) -> PluginResult<View> {
        let what = "view";
        let rows = fetch(pool, what, VIEW_SQL, &[&schema_name, &view_name]).await?;

        let definition = match rows.first() {
            Some(row) => col::<Option<String>>(row, 1, what)?.unwrap_or_default(),
            None => String::new(),
        };

        Ok(View {
            name: view_name.to_string(),
            database_name: database_name.to_string(),
            schema_name: schema_name.to_string(),
            definition,
            comment: None,
        })
    }

    async fn get_functions(
        &self,
        pool: &PostgresPool,
        database_name: &str,
        schema_name: &str,
    ) -> PluginResult<Vec<DatabaseFunction>> {
        let what = "functions";
        let kind = routine_kind(false);
        let rows = fetch(pool, what, ROUTINES_SQL, &[&schema_name, &kind]).await?;

        rows.iter()
            .map(|row| {
                Ok(DatabaseFunction {
                    database_name: database_name.to_string(),
                    schema_name: schema_name.to_string(),
                    function_name: col(row, 0, what)?,
                    return_type: col(row, 1, what)?,
                    language: col(row, 2, what)?,
                    function_body: None,
                })
            })
            .collect()
    }

    async fn get_function(
        &self,
        pool: &PostgresPool,
        database_name: &str,
        schema_name: &str,
        function_name: &str,
    ) -> PluginResult<DatabaseFunction> {
        let what = "function";
        let kind = routine_kind(false);
        let rows = fetch(pool, what, ROUTINE_SQL, &[&schema_name, &kind, &function_name]).await?;

        let mut function = DatabaseFunction {
            database_name: database_name.to_string(),
            schema_name: schema_name.to_string(),
            function_name: function_name.to_string(),
            return_type: None,
            language: None,
            function_body: None,
        };
        if let Some(row) = rows.first() {
            function.return_type = col(row, 1, what)?;
            function.language = col(row, 2, what)?;
            function.function_body = col(row, 3, what)?;
        }
        Ok(function)
    }

    async fn get_procedures(
        &self,
        pool: &PostgresPool,
        database_name: &str,
        schema_name: &str,
    ) -> PluginResult<Vec<Procedure>> {
        let what = "procedures";
        let kind = routine_kind(true);
        let rows = fetch(pool, what, ROUTINES_SQL, &[&schema_name, &kind]).await?;

        rows.iter()
            .map(|row| {
                Ok(Procedure {
                    database_name: database_name.to_string(),
                    schema_name: schema_name.to_string(),
                    procedure_name: col(row, 0, what)?,
                    language: col(row, 2, what)?,
                    procedure_body: None,
                })
            })
            .collect()
    }

    async fn get_procedure(
        &self,
        pool: &PostgresPool,
        database_name: &str,
        schema_name: &str,
        procedure_name: &str,
    ) -> PluginResult<Procedure> {
        let what = "procedure";
        let kind = routine_kind(true);
        let rows = fetch(pool, what, ROUTINE_SQL, &[&schema_name, &kind, &procedure_name]).await?;

        let mut procedure = Procedure {
            database_name: database_name.to_string(),
            schema_name: schema_name.to_string(),
            procedure_name: procedure_name.to_string(),
            language: None,
            procedure_body: None,
        };
        if let Some(row) = rows.first() {
            procedure.language = col(row, 2, what)?;
            procedure.procedure_body = col(row, 3, what)?;
        }
        Ok(procedure)
    }

    async fn get_triggers(
        &self,
        pool: &PostgresPool,
        database_name: &str,
        schema_name: &str,
    ) -> PluginResult<Vec<Trigger>> {
        let what = "triggers";
        let rows = fetch(pool, what, TRIGGERS_SQL, &[&schema_name]).await?;

        rows.iter()
            .map(|row| trigger_from_row(row, what, database_name, schema_name, false))
            .collect()
    }

    async fn get_trigger(
        &self,
        pool: &PostgresPool,
        database_name: &str,
        schema_name: &str,
        trigger_name: &str,
    ) -> PluginResult<Trigger> {
        let what = "trigger";
        let rows = fetch(pool, what, TRIGGER_SQL, &[&schema_name, &trigger_name]).await?;

        match rows.first() {
            Some(row) => trigger_from_row(row, what, database_name, schema_name, true),
            None => Ok(Trigger {
                database_name: database_name.to_string(),
                schema_name: schema_name.to_string(),
                trigger_name: trigger_name.to_string(),
                table_name: None,
                trigger_body: None,
                is_enabled: None,
            }),
        }
    }

    async fn get_sequences(
        &self,
        pool: &PostgresPool,
        database_name: &str,
        schema_name: &str,
    ) -> PluginResult<Vec<Sequence>> {
        let what = "sequences";
        let rows = fetch(pool, what, SEQUENCES_SQL, &[&schema_name]).await?;

        rows.iter()
            .map(|row| sequence_from_row(row, what, database_name, schema_name))
            .collect()
    }

    async fn get_sequence(
        &self,
        pool: &PostgresPool,
        database_name: &str,
        schema_name: &str,
        sequence_name: &str,
    ) -> PluginResult<Sequence> {
        let what = "sequence";
        let rows = fetch(pool, what, SEQUENCE_SQL, &[&schema_name, &sequence_name]).await?;

        match rows.first() {
            Some(row) => sequence_from_row(row, what, database_name, schema_name),
            None => Err(PluginError::Metadata(format!(
                "{}: {}.{} does not exist",
                what, schema_name, sequence_name
            ))),
        }
    }

    async fn get_users(&self, pool: &PostgresPool) -> PluginResult<Vec<DatabaseUser>> {
        let what = "users";
        let rows = fetch(pool, what, USERS_SQL, &[]).await?;

        rows.iter()
            .map(|row| {
                Ok(DatabaseUser {
                    name: col(row, 0, what)?,
                    can_login: Some(true),
                    is_superuser: col(row, 1, what)?,
                })
            })
            .collect()
    }
}

fn trigger_from_row(
    row: &Row,
    what: &str,
    database_name: &str,
    schema_name: &str,
    with_body: bool,
) -> PluginResult<Trigger> {
    let enabled: Option<String> = col(row, 2, what)?;
    Ok(Trigger {
        database_name: database_name.to_string(),
        schema_name: schema_name.to_string(),
        trigger_name: col(row, 0, what)?,
        table_name: col(row, 1, what)?,
        trigger_body: if with_body { col(row, 3, what)? } else { None },
        // tgenabled: 'D' means disabled, every other mode fires
        is_enabled: enabled.map(|e| e != "D"),
    })
}

fn sequence_from_row(
    row: &Row,
    what: &str,
    database_name: &str,
    schema_name: &str,
) -> PluginResult<Sequence> {
    Ok(Sequence {
        name: col(row, 0, what)?,
        database_name: database_name.to_string(),
        schema_name: schema_name.to_string(),
        data_type: col(row, 1, what)?,
        start_value: col(row, 2, what)?,
        increment_by: col(row, 3, what)?,
        comment: col(row, 4, what)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraint(key: &str, kind: &str, column: &str, foreign: Option<(&str, &str)>) -> ConstraintRow {
        ConstraintRow {
            key_name: key.to_string(),
            constraint_type: kind.to_string(),
            column_name: Some(column.to_string()),
            foreign_schema_name: foreign.map(|_| "public".to_string()),
            foreign_table_name: foreign.map(|(t, _)| t.to_string()),
            foreign_column_name: Some(foreign.map(|(_, c)| c).unwrap_or(column).to_string()),
        }
    }

    fn index_row(key: &str, primary: bool, unique: bool, pos: i32, column: &str) -> IndexRow {
        IndexRow {
            key_name: key.to_string(),
            is_primary: primary,
            is_unique: unique,
            method: Some("btree".to_string()),
            comment: None,
            ordinal_position: pos,
            column_name: column.to_string(),
            collation: Some("A".to_string()),
        }
    }

    #[test]
    fn test_merge_indexes_classifies_by_constraint() {
        let constraints = vec![
            constraint("orders_pkey", "PRIMARY KEY", "id", None),
            constraint("orders_ref_key", "UNIQUE", "ref", None),
            constraint("orders_user_fk", "FOREIGN KEY", "user_id", Some(("users", "id"))),
        ];
        let index_rows = vec![
            index_row("orders_pkey", true, true, 1, "id"),
            index_row("orders_ref_key", false, true, 1, "ref"),
            index_row("orders_created_idx", false, false, 2, "id"),
            index_row("orders_created_idx", false, false, 1, "created_at"),
        ];

        let indexes = merge_indexes("app", "public", "orders", constraints, index_rows);

        assert_eq!(indexes.len(), 4);

        let fk = &indexes[0];
        assert_eq!(fk.index_type, IndexType::ForeignKey);
        assert_eq!(fk.foreign_table_name.as_deref(), Some("users"));
        assert_eq!(fk.foreign_column_name_list, vec!["id"]);
        assert_eq!(fk.column_list[0].column_name, "user_id");

        assert_eq!(indexes[1].index_type, IndexType::PrimaryKey);
        assert_eq!(indexes[2].index_type, IndexType::Unique);
        assert!(indexes[2].unique);

        let plain = &indexes[3];
        assert_eq!(plain.index_type, IndexType::Index);
        assert!(!plain.unique);
        assert_eq!(plain.column_list.len(), 2);
        assert_eq!(plain.column_list[0].column_name, "created_at");
        assert_eq!(plain.column_list[1].column_name, "id");
    }

    #[test]
    fn test_merge_indexes_sorts_columns_of_shared_names() {
        let constraints = vec![constraint("shared", "FOREIGN KEY", "a", Some(("t", "x")))];
        let index_rows = vec![
            index_row("shared", false, false, 3, "c"),
            index_row("shared", false, false, 0, "z"),
        ];

        let indexes = merge_indexes("app", "public", "t2", constraints, index_rows);

        assert_eq!(indexes.len(), 1);
        let positions: Vec<i32> = indexes[0].column_list.iter().map(|c| c.ordinal_position).collect();
        assert_eq!(positions, vec![0, 1, 3]);
    }

    #[test]
    fn test_normalize_column_type() {
        assert_eq!(normalize_column_type("bpchar"), "CHAR");
        assert_eq!(normalize_column_type("character varying"), "CHARACTER VARYING");
    }

    #[test]
    fn test_plugin_config() {
        let plugin = PostgresPlugin::new(PoolSettings::default());
        let config = DatabasePlugin::config(&plugin);
        assert_eq!(config.id, EngineId::Postgresql);
        assert_eq!(config.name, "PostgreSQL");
    }
}
