use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::RoundingStrategy;
use tokio::sync::RwLock;

use crate::layout::{self, ColumnLayout, ColumnType, SchemaChange, TableLayout, table_name};
use crate::value::{ID_FIELD, fit_numeric};
use crate::{Criteria, MetadataId, MetadataStoreError, Result, Row, Scalar, Schema, Storage};

/// A structure held in memory: its layout and its rows keyed by id.
#[derive(Debug, Clone)]
struct Table {
    layout: TableLayout,
    rows: BTreeMap<MetadataId, Row>,
}

impl Table {
    fn new(layout: TableLayout) -> Self {
        Self {
            layout,
            rows: BTreeMap::new(),
        }
    }

    fn column(&self, column: &str) -> Result<&ColumnLayout> {
        self.layout
            .column(column)
            .ok_or_else(|| MetadataStoreError::ColumnNotFound {
                structure: self.layout.name.clone(),
                column: column.to_string(),
            })
    }

    /// Converts `value` to what `column` stores.
    fn convert(&self, column: &str, value: Scalar) -> Result<Scalar> {
        let layout = self.column(column)?;
        convert(layout, value).map_err(|reason| invalid_value(&self.layout.name, column, reason))
    }

    fn check_comparable(&self, column: &str, value: &Scalar) -> Result<()> {
        let layout = self.column(column)?;
        if comparable(&layout.column_type, value) {
            Ok(())
        } else {
            Err(invalid_value(
                &self.layout.name,
                column,
                format!(
                    "of type {} cannot be compared with {} value {value}",
                    layout.column_type,
                    value.type_name()
                ),
            ))
        }
    }

    fn check_not_null(&self, row: &Row) -> Result<()> {
        match self
            .layout
            .columns
            .iter()
            .find(|c| !c.nullable && row.get(&c.name).is_none_or(Scalar::is_null))
        {
            Some(column) => Err(invalid_value(
                &self.layout.name,
                &column.name,
                "does not accept null",
            )),
            None => Ok(()),
        }
    }
}

fn invalid_value(structure: &str, column: &str, reason: impl std::fmt::Display) -> MetadataStoreError {
    MetadataStoreError::InvalidValue {
        structure: structure.to_string(),
        reason: format!("column \"{column}\" {reason}"),
    }
}

/// Assignment conversion of a scalar into a column, as an insert performs it.
fn convert(column: &ColumnLayout, value: Scalar) -> std::result::Result<Scalar, String> {
    let converted = match (&column.column_type, value) {
        (_, Scalar::Null) if column.nullable => Scalar::Null,
        (_, Scalar::Null) => return Err("does not accept null".to_string()),
        (ColumnType::Other(_), value) => value,
        (ColumnType::Varchar(length), Scalar::Text(text)) => {
            if text.chars().count() > *length as usize {
                return Err(format!("holds at most {length} characters"));
            }
            Scalar::Text(text)
        }
        (ColumnType::Text, value @ Scalar::Text(_)) => value,
        (ColumnType::BigInt, value @ Scalar::Integer(_)) => value,
        (ColumnType::BigInt, Scalar::Decimal(d)) => {
            let rounded = d.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
            match i64::try_from(rounded) {
                Ok(i) => Scalar::Integer(i),
                Err(_) => return Err(format!("cannot hold {d} as BIGINT")),
            }
        }
        (ColumnType::Numeric { precision, scale }, value @ (Scalar::Integer(_) | Scalar::Decimal(_))) => {
            let decimal = value.as_decimal().unwrap_or_default();
            match fit_numeric(decimal, *precision, *scale) {
                Some(fitted) => Scalar::Decimal(fitted),
                None => return Err(format!("cannot hold {value} as {}", column.column_type)),
            }
        }
        (ColumnType::Boolean, value @ Scalar::Boolean(_)) => value,
        (column_type, value) => {
            return Err(format!(
                "of type {column_type} cannot hold {} value {value}",
                value.type_name()
            ));
        }
    };
    Ok(converted)
}

/// True when an equality criterion on a column of `column_type` is well typed.
fn comparable(column_type: &ColumnType, value: &Scalar) -> bool {
    match (column_type, value) {
        (_, Scalar::Null) | (ColumnType::Other(_), _) => true,
        (ColumnType::Varchar(_) | ColumnType::Text, Scalar::Text(_)) => true,
        (ColumnType::BigInt | ColumnType::Numeric { .. }, Scalar::Integer(_) | Scalar::Decimal(_)) => {
            true
        }
        (ColumnType::Boolean, Scalar::Boolean(_)) => true,
        _ => false,
    }
}

/// In-memory storage implementation for testing.
///
/// This implementation keeps every structure in memory behind a single lock
/// and provides the same interface and observable behaviour as the
/// PostgreSQL implementation. Layouts are diffed the same way and omitted
/// columns receive their defaults. Saved values are converted to their
/// column type and checked against its size and nullability, criteria must be
/// comparable with their column, and a schema change that existing rows
/// cannot satisfy leaves every structure untouched.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    tables: Arc<RwLock<HashMap<String, Table>>>,
}

impl InMemoryStorage {
    /// Creates a new empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of structures currently held.
    pub async fn structure_count(&self) -> usize {
        self.tables.read().await.len()
    }

    /// Returns the layout of a structure, if it exists.
    pub async fn layout(&self, structure: &str) -> Option<TableLayout> {
        self.tables
            .read()
            .await
            .get(structure)
            .map(|table| table.layout.clone())
    }

    /// Removes every structure and row.
    pub async fn clear(&self) {
        self.tables.write().await.clear();
    }

    fn current_layouts(tables: &HashMap<String, Table>) -> BTreeMap<String, TableLayout> {
        tables
            .iter()
            .map(|(name, table)| (name.clone(), table.layout.clone()))
            .collect()
    }

    fn apply(tables: &mut HashMap<String, Table>, change: &SchemaChange) -> Result<()> {
        match change {
            SchemaChange::CreateTable(layout) => {
                tables.insert(layout.name.clone(), Table::new(layout.clone()));
            }
            SchemaChange::AddColumn { table, column } => {
                if let Some(table) = tables.get_mut(table) {
                    let default = column.default_scalar();
                    if default.is_null() && !column.nullable && !table.rows.is_empty() {
                        return Err(invalid_value(
                            &table.layout.name,
                            &column.name,
                            "does not accept null and has no default for existing rows",
                        ));
                    }
                    for row in table.rows.values_mut() {
                        row.insert(column.name.clone(), default.clone());
                    }
                    table.layout.columns.push(column.clone());
                }
            }
            SchemaChange::AlterColumn { table, to, .. } => {
                if let Some(table) = tables.get_mut(table) {
                    for row in table.rows.values_mut() {
                        let value = row.remove(&to.name).unwrap_or(Scalar::Null);
                        let value = convert(to, value)
                            .map_err(|reason| invalid_value(&table.layout.name, &to.name, reason))?;
                        row.insert(to.name.clone(), value);
                    }
                    if let Some(existing) = table
                        .layout
                        .columns
                        .iter_mut()
                        .find(|c| c.name == to.name)
                    {
                        *existing = to.clone();
                    }
                }
            }
            SchemaChange::DropColumn { table, column } => {
                if let Some(table) = tables.get_mut(table) {
                    table.layout.columns.retain(|c| &c.name != column);
                    for row in table.rows.values_mut() {
                        row.remove(column);
                    }
                }
            }
            SchemaChange::DropTable { table } => {
                tables.remove(table);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    #[tracing::instrument(skip(self, schema), fields(schema = %schema.name()))]
    async fn create_schema(&self, schema: &Schema) -> Result<()> {
        let targets = TableLayout::for_schema(schema);
        let mut tables = self.tables.write().await;

        if let Some(existing) = targets.iter().find(|t| tables.contains_key(&t.name)) {
            return Err(MetadataStoreError::AlreadyExists {
                structure: existing.name.clone(),
            });
        }

        for layout in targets {
            tracing::debug!(structure = %layout.name, "creating structure");
            tables.insert(layout.name.clone(), Table::new(layout));
        }

        metrics::counter!("metadata_storage_operations_total", "backend" => "memory", "operation" => "create")
            .increment(1);
        Ok(())
    }

    #[tracing::instrument(skip(self, schema), fields(schema = %schema.name()))]
    async fn alter_schema(&self, schema: &Schema) -> Result<Vec<SchemaChange>> {
        let targets = TableLayout::for_schema(schema);
        let mut tables = self.tables.write().await;

        let changes = layout::diff(&Self::current_layouts(&tables), &targets);
        // staged on a copy so a failing change leaves every structure as it was
        let mut migrated = (*tables).clone();
        for change in &changes {
            tracing::debug!(%change, "applying schema change");
            Self::apply(&mut migrated, change)?;
        }
        *tables = migrated;

        if !changes.is_empty() {
            tracing::info!(changes = changes.len(), "schema altered");
        }
        metrics::counter!("metadata_schema_changes_total", "backend" => "memory")
            .increment(changes.len() as u64);
        metrics::counter!("metadata_storage_operations_total", "backend" => "memory", "operation" => "alter")
            .increment(1);

        Ok(changes)
    }

    #[tracing::instrument(skip(self, schema), fields(schema = %schema.name()))]
    async fn drop_schema(&self, schema: &Schema) -> Result<()> {
        let targets = TableLayout::for_schema(schema);
        let mut tables = self.tables.write().await;

        for change in layout::drop_changes(&Self::current_layouts(&tables), &targets) {
            tracing::debug!(%change, "applying schema change");
            Self::apply(&mut tables, &change)?;
        }

        metrics::counter!("metadata_storage_operations_total", "backend" => "memory", "operation" => "drop")
            .increment(1);
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
        let tables = self.tables.read().await;
        let table = tables
            .get(&structure)
            .ok_or(MetadataStoreError::StructureNotFound { structure })?;

        for (column, value) in criteria.iter() {
            table.check_comparable(column, value)?;
        }

        metrics::counter!("metadata_storage_operations_total", "backend" => "memory", "operation" => "find_by")
            .increment(1);

        // BTreeMap keeps rows ordered by id
        Ok(table
            .rows
            .values()
            .filter(|row| criteria.matches(row))
            .cloned()
            .collect())
    }

    #[tracing::instrument(skip(self), fields(id = %id))]
    async fn has(&self, schema: &str, type_name: &str, id: &MetadataId) -> Result<bool> {
        let structure = table_name(schema, type_name);
        let tables = self.tables.read().await;
        let table = tables
            .get(&structure)
            .ok_or(MetadataStoreError::StructureNotFound { structure })?;

        Ok(table.rows.contains_key(id))
    }

    #[tracing::instrument(skip(self, row), fields(id = %id))]
    async fn save(&self, schema: &str, type_name: &str, id: &MetadataId, row: Row) -> Result<()> {
        let structure = table_name(schema, type_name);
        let mut tables = self.tables.write().await;
        let table = tables
            .get_mut(&structure)
            .ok_or(MetadataStoreError::StructureNotFound { structure })?;

        let mut stored = match table.rows.get(id) {
            Some(existing) => existing.clone(),
            // Insert: start from column defaults, as a database would
            None => table
                .layout
                .columns
                .iter()
                .map(|column| (column.name.clone(), column.default_scalar()))
                .collect(),
        };
        for (column, value) in row {
            if column != ID_FIELD {
                let value = table.convert(&column, value)?;
                stored.insert(column, value);
            }
        }
        stored.insert(ID_FIELD.to_string(), table.convert(ID_FIELD, Scalar::from(id))?);
        table.check_not_null(&stored)?;

        table.rows.insert(id.clone(), stored);

        metrics::counter!("metadata_storage_operations_total", "backend" => "memory", "operation" => "save")
            .increment(1);
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(id = %id))]
    async fn delete(&self, schema: &str, type_name: &str, id: &MetadataId) -> Result<()> {
        let structure = table_name(schema, type_name);
        let mut tables = self.tables.write().await;
        let table = tables
            .get_mut(&structure)
            .ok_or(MetadataStoreError::StructureNotFound { structure })?;

        table.rows.remove(id);

        metrics::counter!("metadata_storage_operations_total", "backend" => "memory", "operation" => "delete")
            .increment(1);
        Ok(())
    }
}
