use std::collections::BTreeMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgConnection, PgPool, Postgres, Row as _, TypeInfo};

use crate::layout::{
    self, ColumnLayout, ColumnType, SchemaChange, TableLayout, normalize_default, table_name,
};
use crate::value::ID_FIELD;
use crate::{Criteria, MetadataId, MetadataStoreError, Result, Row, Scalar, Schema, Storage};

/// Longest identifier PostgreSQL keeps without truncation.
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// PostgreSQL-backed metadata storage implementation.
///
/// Structures are plain tables in the connection's current schema. Layout
/// changes run inside a single transaction, which PostgreSQL supports for
/// DDL, so a failing `create_schema` or `alter_schema` leaves no partial
/// changes behind.
#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Creates a new PostgreSQL storage.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Reads the current layout of the named tables from `information_schema`.
    ///
    /// Tables that do not exist are absent from the result.
    pub async fn current_layouts(&self, tables: &[String]) -> Result<BTreeMap<String, TableLayout>> {
        let mut conn = self.pool.acquire().await?;
        Self::load_layouts(&mut conn, tables).await
    }

    async fn load_layouts(
        conn: &mut PgConnection,
        tables: &[String],
    ) -> Result<BTreeMap<String, TableLayout>> {
        let rows = sqlx::query(
            r#"
            SELECT
                table_name::text AS table_name,
                column_name::text AS column_name,
                data_type::text AS data_type,
                character_maximum_length::int4 AS max_length,
                numeric_precision::int4 AS precision,
                numeric_scale::int4 AS scale,
                is_nullable::text = 'YES' AS nullable,
                column_default::text AS column_default
            FROM information_schema.columns
            WHERE table_schema = current_schema() AND table_name::text = ANY($1)
            ORDER BY table_name, ordinal_position
            "#,
        )
        .bind(tables)
        .fetch_all(&mut *conn)
        .await?;

        let mut layouts: BTreeMap<String, TableLayout> = BTreeMap::new();
        for row in rows {
            let table: String = row.try_get("table_name")?;
            let data_type: String = row.try_get("data_type")?;
            let max_length: Option<i32> = row.try_get("max_length")?;
            let precision: Option<i32> = row.try_get("precision")?;
            let scale: Option<i32> = row.try_get("scale")?;
            let default: Option<String> = row.try_get("column_default")?;

            let column = ColumnLayout {
                name: row.try_get("column_name")?,
                column_type: column_type_from_catalog(&data_type, max_length, precision, scale),
                nullable: row.try_get("nullable")?,
                default: default.as_deref().map(normalize_default),
            };

            layouts
                .entry(table.clone())
                .or_insert_with(|| TableLayout {
                    name: table,
                    columns: Vec::new(),
                })
                .columns
                .push(column);
        }

        Ok(layouts)
    }

    fn target_layouts(schema: &Schema) -> Result<Vec<TableLayout>> {
        let targets = TableLayout::for_schema(schema);
        if let Some(long) = targets
            .iter()
            .find(|t| t.name.len() > MAX_IDENTIFIER_LENGTH)
        {
            return Err(MetadataStoreError::InvalidArgument(format!(
                "structure name \"{}\" exceeds {MAX_IDENTIFIER_LENGTH} bytes",
                long.name
            )));
        }
        Ok(targets)
    }

    async fn execute_changes(conn: &mut PgConnection, changes: &[SchemaChange]) -> Result<()> {
        for change in changes {
            let sql = change_sql(change);
            tracing::debug!(%sql, "executing schema change");
            sqlx::query(&sql)
                .execute(&mut *conn)
                .await
                .map_err(|e| map_db_error(e, change.table()))?;
        }
        Ok(())
    }

    fn record(operation: &'static str) {
        metrics::counter!("metadata_storage_operations_total", "backend" => "postgres", "operation" => operation)
            .increment(1);
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    #[tracing::instrument(skip(self, schema), fields(schema = %schema.name()))]
    async fn create_schema(&self, schema: &Schema) -> Result<()> {
        let targets = Self::target_layouts(schema)?;
        let names: Vec<String> = targets.iter().map(|t| t.name.clone()).collect();

        let mut tx = self.pool.begin().await?;
        let current = Self::load_layouts(&mut tx, &names).await?;

        if let Some(existing) = targets.iter().find(|t| current.contains_key(&t.name)) {
            return Err(MetadataStoreError::AlreadyExists {
                structure: existing.name.clone(),
            });
        }

        let changes: Vec<SchemaChange> = targets.into_iter().map(SchemaChange::CreateTable).collect();
        Self::execute_changes(&mut tx, &changes).await?;
        tx.commit().await?;

        tracing::info!(structures = changes.len(), "schema created");
        Self::record("create");
        Ok(())
    }

    #[tracing::instrument(skip(self, schema), fields(schema = %schema.name()))]
    async fn alter_schema(&self, schema: &Schema) -> Result<Vec<SchemaChange>> {
        let targets = Self::target_layouts(schema)?;
        let names: Vec<String> = targets.iter().map(|t| t.name.clone()).collect();

        let mut tx = self.pool.begin().await?;
        let current = Self::load_layouts(&mut tx, &names).await?;
        let changes = layout::diff(&current, &targets);

        if !changes.is_empty() {
            Self::execute_changes(&mut tx, &changes).await?;
            tx.commit().await?;
            tracing::info!(changes = changes.len(), "schema altered");
        }

        metrics::counter!("metadata_schema_changes_total", "backend" => "postgres")
            .increment(changes.len() as u64);
        Self::record("alter");
        Ok(changes)
    }

    #[tracing::instrument(skip(self, schema), fields(schema = %schema.name()))]
    async fn drop_schema(&self, schema: &Schema) -> Result<()> {
        let targets = Self::target_layouts(schema)?;
        let names: Vec<String> = targets.iter().map(|t| t.name.clone()).collect();

        let mut tx = self.pool.begin().await?;
        let current = Self::load_layouts(&mut tx, &names).await?;
        let changes = layout::drop_changes(&current, &targets);
        Self::execute_changes(&mut tx, &changes).await?;
        tx.commit().await?;

        Self::record("drop");
        Ok(())
    }

    #[tracing::instrument(skip(self, criteria), fields(criteria = %criteria))]
    async fn find_by(
        &self,
        schema: &str,
        type_name: &str,
        criteria: &Criteria,
    ) -> Result<Vec<Row>> {
        let structure = table_name(schema, type_name);

        let mut sql = format!("SELECT * FROM {}", quote_ident(&structure));
        let mut conditions = Vec::with_capacity(criteria.len());
        let mut params = Vec::with_capacity(criteria.len());
        for (column, value) in criteria.iter() {
            if value.is_null() {
                conditions.push(format!("{} IS NULL", quote_ident(column)));
            } else {
                params.push(value);
                conditions.push(format!("{} = ${}", quote_ident(column), params.len()));
            }
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(&format!(" ORDER BY {}", quote_ident(ID_FIELD)));

        let mut query = sqlx::query(&sql);
        for value in params {
            query = bind_scalar(query, value);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_error(e, &structure))?;

        Self::record("find_by");
        rows.iter().map(decode_row).collect()
    }

    #[tracing::instrument(skip(self), fields(id = %id))]
    async fn has(&self, schema: &str, type_name: &str, id: &MetadataId) -> Result<bool> {
        let structure = table_name(schema, type_name);
        let sql = format!(
            "SELECT 1 FROM {} WHERE {} = $1",
            quote_ident(&structure),
            quote_ident(ID_FIELD)
        );

        let found: Option<PgRow> = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_error(e, &structure))?;

        Self::record("has");
        Ok(found.is_some())
    }

    #[tracing::instrument(skip(self, row), fields(id = %id))]
    async fn save(&self, schema: &str, type_name: &str, id: &MetadataId, row: Row) -> Result<()> {
        let structure = table_name(schema, type_name);
        let values: Vec<(String, Scalar)> = row
            .into_iter()
            .filter(|(column, _)| column != ID_FIELD)
            .collect();

        let sql = upsert_sql(&structure, &values);
        let mut query = sqlx::query(&sql).bind(id.as_str());
        for (_, value) in values.iter().filter(|(_, v)| !v.is_null()) {
            query = bind_scalar(query, value);
        }

        query
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error(e, &structure))?;

        Self::record("save");
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(id = %id))]
    async fn delete(&self, schema: &str, type_name: &str, id: &MetadataId) -> Result<()> {
        let structure = table_name(schema, type_name);
        let sql = format!(
            "DELETE FROM {} WHERE {} = $1",
            quote_ident(&structure),
            quote_ident(ID_FIELD)
        );

        sqlx::query(&sql)
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error(e, &structure))?;

        Self::record("delete");
        Ok(())
    }
}

/// Builds the single-statement upsert used by `save`.
///
/// NULL values are written as literals so the column type alone decides how
/// they are stored; every other value is a positional parameter after `id`.
fn upsert_sql(structure: &str, values: &[(String, Scalar)]) -> String {
    let id = quote_ident(ID_FIELD);
    let mut columns = vec![id.clone()];
    let mut placeholders = vec!["$1".to_string()];
    let mut param = 1;

    for (column, value) in values {
        columns.push(quote_ident(column));
        if value.is_null() {
            placeholders.push("NULL".to_string());
        } else {
            param += 1;
            placeholders.push(format!("${param}"));
        }
    }

    let conflict = if values.is_empty() {
        "DO NOTHING".to_string()
    } else {
        let assignments: Vec<String> = values
            .iter()
            .map(|(column, _)| {
                let column = quote_ident(column);
                format!("{column} = EXCLUDED.{column}")
            })
            .collect();
        format!("DO UPDATE SET {}", assignments.join(", "))
    };

    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({id}) {conflict}",
        quote_ident(structure),
        columns.join(", "),
        placeholders.join(", "),
    )
}

/// Renders one structural change as a PostgreSQL statement.
pub fn change_sql(change: &SchemaChange) -> String {
    match change {
        SchemaChange::CreateTable(table) => {
            let columns: Vec<String> = table.columns.iter().map(column_definition).collect();
            format!(
                "CREATE TABLE {} ({}, PRIMARY KEY ({}))",
                quote_ident(&table.name),
                columns.join(", "),
                quote_ident(ID_FIELD)
            )
        }
        SchemaChange::AddColumn { table, column } => format!(
            "ALTER TABLE {} ADD COLUMN {}",
            quote_ident(table),
            column_definition(column)
        ),
        SchemaChange::AlterColumn { table, from, to } => {
            let name = quote_ident(&to.name);
            let mut actions = Vec::new();

            if from.column_type != to.column_type {
                let ty = to.column_type.sql();
                actions.push(format!("ALTER COLUMN {name} TYPE {ty} USING {name}::{ty}"));
            }
            if from.default != to.default || from.column_type != to.column_type {
                match &to.default {
                    Some(default) => actions.push(format!(
                        "ALTER COLUMN {name} SET DEFAULT {}",
                        default_literal(&to.column_type, default)
                    )),
                    None => actions.push(format!("ALTER COLUMN {name} DROP DEFAULT")),
                }
            }
            if from.nullable != to.nullable {
                let action = if to.nullable { "DROP NOT NULL" } else { "SET NOT NULL" };
                actions.push(format!("ALTER COLUMN {name} {action}"));
            }

            format!("ALTER TABLE {} {}", quote_ident(table), actions.join(", "))
        }
        SchemaChange::DropColumn { table, column } => format!(
            "ALTER TABLE {} DROP COLUMN {}",
            quote_ident(table),
            quote_ident(column)
        ),
        SchemaChange::DropTable { table } => format!("DROP TABLE IF EXISTS {}", quote_ident(table)),
    }
}

fn column_definition(column: &ColumnLayout) -> String {
    let mut definition = format!("{} {}", quote_ident(&column.name), column.column_type.sql());
    if let Some(default) = &column.default {
        definition.push_str(" DEFAULT ");
        definition.push_str(&default_literal(&column.column_type, default));
    }
    if !column.nullable {
        definition.push_str(" NOT NULL");
    }
    definition
}

fn default_literal(column_type: &ColumnType, default: &str) -> String {
    if column_type.is_textual() {
        quote_literal(default)
    } else {
        default.to_string()
    }
}

fn column_type_from_catalog(
    data_type: &str,
    max_length: Option<i32>,
    precision: Option<i32>,
    scale: Option<i32>,
) -> ColumnType {
    let to_u32 = |v: Option<i32>| v.and_then(|v| u32::try_from(v).ok());

    match (data_type, to_u32(max_length)) {
        ("character varying", Some(length)) => ColumnType::Varchar(length),
        ("text", _) => ColumnType::Text,
        ("bigint", _) => ColumnType::BigInt,
        ("boolean", _) => ColumnType::Boolean,
        ("numeric", _) => ColumnType::Numeric {
            precision: to_u32(precision),
            scale: to_u32(precision).and(to_u32(scale)),
        },
        (other, _) => ColumnType::Other(other.to_string()),
    }
}

fn bind_scalar<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q Scalar,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Scalar::Null => query.bind(Option::<String>::None),
        Scalar::Text(text) => query.bind(text.as_str()),
        Scalar::Integer(i) => query.bind(*i),
        Scalar::Decimal(d) => query.bind(*d),
        Scalar::Boolean(b) => query.bind(*b),
    }
}

fn decode_row(row: &PgRow) -> Result<Row> {
    let mut decoded = Row::new();

    for column in row.columns() {
        let index = column.ordinal();
        let value = match column.type_info().name() {
            "VARCHAR" | "TEXT" | "BPCHAR" | "NAME" => {
                row.try_get::<Option<String>, _>(index)?.map(Scalar::Text)
            }
            "INT8" => row.try_get::<Option<i64>, _>(index)?.map(Scalar::Integer),
            "INT4" => row
                .try_get::<Option<i32>, _>(index)?
                .map(|i| Scalar::Integer(i64::from(i))),
            "INT2" => row
                .try_get::<Option<i16>, _>(index)?
                .map(|i| Scalar::Integer(i64::from(i))),
            "NUMERIC" => row.try_get::<Option<Decimal>, _>(index)?.map(Scalar::Decimal),
            "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(Scalar::Boolean),
            other => {
                return Err(MetadataStoreError::InvalidArgument(format!(
                    "column \"{}\" has unsupported type {other}",
                    column.name()
                )));
            }
        };

        decoded.insert(column.name().to_string(), value.unwrap_or(Scalar::Null));
    }

    Ok(decoded)
}

/// Translates PostgreSQL error codes into the storage error taxonomy.
fn map_db_error(err: sqlx::Error, structure: &str) -> MetadataStoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        match db_err.code().as_deref() {
            // undefined_table
            Some("42P01") => {
                return MetadataStoreError::StructureNotFound {
                    structure: structure.to_string(),
                };
            }
            // undefined_column
            Some("42703") => {
                return MetadataStoreError::ColumnNotFound {
                    structure: structure.to_string(),
                    column: first_quoted(db_err.message()).unwrap_or_default(),
                };
            }
            // duplicate_table, unique_violation
            Some("42P07") | Some("23505") => {
                return MetadataStoreError::AlreadyExists {
                    structure: structure.to_string(),
                };
            }
            // not_null_violation, string_data_right_truncation, numeric_value_out_of_range,
            // invalid_text_representation, datatype_mismatch, undefined_function
            Some("23502" | "22001" | "22003" | "22P02" | "42804" | "42883") => {
                return MetadataStoreError::InvalidValue {
                    structure: structure.to_string(),
                    reason: db_err.message().to_string(),
                };
            }
            _ => {}
        }
    }
    MetadataStoreError::Database(err)
}

fn first_quoted(message: &str) -> Option<String> {
    let start = message.find('"')? + 1;
    let end = message[start..].find('"')? + start;
    Some(message[start..end].to_string())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
