//! Physical layouts and the diff between them.
//!
//! Both the layout a backend currently has and the layout a [`Schema`] asks
//! for are plain values, so [`diff`] is a pure function that can be tested
//! without a database. Backends introspect their current layout, call
//! [`diff`] and apply the resulting [`SchemaChange`]s.

use std::collections::BTreeMap;

use rust_decimal::{Decimal, RoundingStrategy};

use crate::schema::{FieldDefinition, FieldKind, Schema, TypeSchema};
use crate::value::{ID_FIELD, Scalar};

/// Prefix of every structure created for a schema.
pub const TABLE_PREFIX: &str = "metadata";

/// Length of the `id` column and of association columns.
pub const ID_LENGTH: u32 = 255;

/// Length of text columns that do not declare one.
pub const DEFAULT_TEXT_LENGTH: u32 = 255;

/// Returns the backing structure name for `type_name` in `schema`.
///
/// Validated schema names never contain `_`, so distinct schema and type
/// pairs never share a structure.
pub fn table_name(schema: &str, type_name: &str) -> String {
    format!("{TABLE_PREFIX}_{schema}_{type_name}")
}

/// Physical column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Varchar(u32),
    Text,
    BigInt,
    Numeric {
        precision: Option<u32>,
        scale: Option<u32>,
    },
    Boolean,
    /// A type found in the backend that no field kind maps to.
    Other(String),
}

impl ColumnType {
    /// Maps a field definition to the column type that stores it.
    pub fn for_field(definition: &FieldDefinition) -> Self {
        match definition.kind() {
            FieldKind::Text => {
                ColumnType::Varchar(definition.length().unwrap_or(DEFAULT_TEXT_LENGTH))
            }
            FieldKind::Integer => ColumnType::BigInt,
            FieldKind::Decimal => match definition.precision() {
                // NUMERIC(p) means NUMERIC(p, 0), spell it out so introspection compares equal
                Some(precision) => ColumnType::Numeric {
                    precision: Some(precision),
                    scale: Some(definition.scale().unwrap_or(0)),
                },
                None => ColumnType::Numeric {
                    precision: None,
                    scale: None,
                },
            },
            FieldKind::Boolean => ColumnType::Boolean,
            FieldKind::Association { .. } => ColumnType::Varchar(ID_LENGTH),
        }
    }

    /// SQL spelling of the type.
    pub fn sql(&self) -> String {
        match self {
            ColumnType::Varchar(length) => format!("VARCHAR({length})"),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Numeric {
                precision: Some(precision),
                scale,
            } => format!("NUMERIC({precision}, {})", scale.unwrap_or(0)),
            ColumnType::Numeric {
                precision: None, ..
            } => "NUMERIC".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Other(name) => name.to_uppercase(),
        }
    }

    /// True for types whose defaults are written as quoted string literals.
    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            ColumnType::Varchar(_) | ColumnType::Text | ColumnType::Other(_)
        )
    }

    /// Converts a normalized default back into a scalar of this type.
    fn parse_default(&self, normalized: &str) -> Scalar {
        let parsed = match self {
            ColumnType::BigInt => normalized.parse::<i64>().ok().map(Scalar::Integer),
            ColumnType::Numeric { .. } => normalized.parse::<Decimal>().ok().map(Scalar::Decimal),
            ColumnType::Boolean => match normalized {
                "true" => Some(Scalar::Boolean(true)),
                "false" => Some(Scalar::Boolean(false)),
                _ => None,
            },
            ColumnType::Varchar(_) | ColumnType::Text | ColumnType::Other(_) => None,
        };
        parsed.unwrap_or_else(|| Scalar::Text(normalized.to_string()))
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.sql())
    }
}

/// One physical column.
///
/// `default` holds the default in normalized form: the bare value without
/// quotes or casts (`0.00`, `Dumplie`, `true`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLayout {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub default: Option<String>,
}

impl ColumnLayout {
    /// The primary-key identifier column.
    pub fn id() -> Self {
        Self {
            name: ID_FIELD.to_string(),
            column_type: ColumnType::Varchar(ID_LENGTH),
            nullable: false,
            default: None,
        }
    }

    /// The column storing field `name`.
    pub fn for_field(name: &str, definition: &FieldDefinition) -> Self {
        let column_type = ColumnType::for_field(definition);
        let default = definition
            .default_value()
            .map(|value| render_default(value, definition.scale()));

        Self {
            name: name.to_string(),
            column_type,
            nullable: !definition.is_required(),
            default,
        }
    }

    /// The value a row receives when an insert omits this column.
    pub fn default_scalar(&self) -> Scalar {
        match &self.default {
            Some(default) => self.column_type.parse_default(default),
            None => Scalar::Null,
        }
    }
}

/// One physical structure: the `id` column followed by one column per field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    pub name: String,
    pub columns: Vec<ColumnLayout>,
}

impl TableLayout {
    /// The layout storing `type_schema` as part of schema `schema_name`.
    pub fn for_type(schema_name: &str, type_schema: &TypeSchema) -> Self {
        let mut columns = vec![ColumnLayout::id()];
        columns.extend(
            type_schema
                .get_definitions(&[ID_FIELD])
                .into_iter()
                .map(|(name, definition)| ColumnLayout::for_field(name, definition)),
        );

        Self {
            name: table_name(schema_name, type_schema.name()),
            columns,
        }
    }

    /// Layouts for every type of `schema`, in declaration order.
    pub fn for_schema(schema: &Schema) -> Vec<Self> {
        schema
            .types()
            .iter()
            .map(|ty| Self::for_type(schema.name(), ty))
            .collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnLayout> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// A single structural operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    CreateTable(TableLayout),
    AddColumn {
        table: String,
        column: ColumnLayout,
    },
    AlterColumn {
        table: String,
        from: ColumnLayout,
        to: ColumnLayout,
    },
    DropColumn {
        table: String,
        column: String,
    },
    DropTable {
        table: String,
    },
}

impl SchemaChange {
    /// Name of the structure this change touches.
    pub fn table(&self) -> &str {
        match self {
            SchemaChange::CreateTable(layout) => &layout.name,
            SchemaChange::AddColumn { table, .. }
            | SchemaChange::AlterColumn { table, .. }
            | SchemaChange::DropColumn { table, .. }
            | SchemaChange::DropTable { table } => table,
        }
    }
}

impl std::fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaChange::CreateTable(layout) => write!(f, "create table {}", layout.name),
            SchemaChange::AddColumn { table, column } => {
                write!(f, "add column {table}.{} {}", column.name, column.column_type)
            }
            SchemaChange::AlterColumn { table, to, .. } => {
                write!(f, "alter column {table}.{} {}", to.name, to.column_type)
            }
            SchemaChange::DropColumn { table, column } => {
                write!(f, "drop column {table}.{column}")
            }
            SchemaChange::DropTable { table } => write!(f, "drop table {table}"),
        }
    }
}

/// Computes the changes that move `current` to `target`.
///
/// Only tables named in `target` are considered: unrelated structures in
/// `current` are left alone. For each target table, in order, the result holds
/// either one `CreateTable` or the column additions and alterations in target
/// column order followed by drops of columns the target no longer declares.
pub fn diff(current: &BTreeMap<String, TableLayout>, target: &[TableLayout]) -> Vec<SchemaChange> {
    let mut changes = Vec::new();

    for table in target {
        let Some(existing) = current.get(&table.name) else {
            changes.push(SchemaChange::CreateTable(table.clone()));
            continue;
        };

        for column in &table.columns {
            match existing.column(&column.name) {
                None => changes.push(SchemaChange::AddColumn {
                    table: table.name.clone(),
                    column: column.clone(),
                }),
                Some(found) if found != column => changes.push(SchemaChange::AlterColumn {
                    table: table.name.clone(),
                    from: found.clone(),
                    to: column.clone(),
                }),
                Some(_) => {}
            }
        }

        for column in &existing.columns {
            if table.column(&column.name).is_none() {
                changes.push(SchemaChange::DropColumn {
                    table: table.name.clone(),
                    column: column.name.clone(),
                });
            }
        }
    }

    changes
}

/// Changes that remove every `target` table present in `current`.
pub fn drop_changes(
    current: &BTreeMap<String, TableLayout>,
    target: &[TableLayout],
) -> Vec<SchemaChange> {
    target
        .iter()
        .filter(|table| current.contains_key(&table.name))
        .map(|table| SchemaChange::DropTable {
            table: table.name.clone(),
        })
        .collect()
}

/// Renders a field default in normalized form.
///
/// Decimals are rounded and padded to `scale` so the value reads back from
/// the backend exactly as written.
pub fn render_default(value: &Scalar, scale: Option<u32>) -> String {
    match value {
        Scalar::Null => "null".to_string(),
        Scalar::Text(text) => text.clone(),
        Scalar::Integer(i) => i.to_string(),
        Scalar::Decimal(d) => match scale {
            Some(scale) => {
                let mut rounded = d.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
                rounded.rescale(scale);
                rounded.to_string()
            }
            None => d.to_string(),
        },
        Scalar::Boolean(b) => b.to_string(),
    }
}

/// Normalizes a default expression as reported by the backend.
///
/// Strips wrapping parentheses, trailing casts and string quoting, so
/// `'Dumplie'::character varying` becomes `Dumplie` and `('-5'::integer)`
/// becomes `-5`.
pub fn normalize_default(raw: &str) -> String {
    let mut current = raw.trim().to_string();

    loop {
        let mut next = current.as_str();

        if next.starts_with('(') && next.ends_with(')') && next.len() >= 2 {
            next = next[1..next.len() - 1].trim();
        }

        if let Some(pos) = next.rfind("::")
            && !next[pos..].contains('\'')
        {
            next = next[..pos].trim();
        }

        if next == current {
            break;
        }
        current = next.to_string();
    }

    if current.len() >= 2 && current.starts_with('\'') && current.ends_with('\'') {
        current[1..current.len() - 1].replace("''", "'")
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product_schema() -> Schema {
        let product = TypeSchema::new(
            "product",
            [
                ("sku", FieldDefinition::text().required().build().unwrap()),
                (
                    "price",
                    FieldDefinition::decimal()
                        .with_default(Decimal::new(0, 1))
                        .with_precision(10, 2)
                        .build()
                        .unwrap(),
                ),
            ],
        )
        .unwrap();
        Schema::builder("catalog").add_type(product).build().unwrap()
    }

    fn current_of(layouts: Vec<TableLayout>) -> BTreeMap<String, TableLayout> {
        layouts.into_iter().map(|l| (l.name.clone(), l)).collect()
    }

    #[test]
    fn table_name_uses_prefix_schema_and_type() {
        assert_eq!(table_name("catalog", "product"), "metadata_catalog_product");
    }

    #[test]
    fn layout_has_id_primary_column_first() {
        let layouts = TableLayout::for_schema(&product_schema());
        assert_eq!(layouts.len(), 1);

        let layout = &layouts[0];
        assert_eq!(layout.name, "metadata_catalog_product");
        assert_eq!(layout.columns[0], ColumnLayout::id());
        assert_eq!(layout.columns.len(), 3);
    }

    #[test]
    fn field_kinds_map_to_column_types() {
        let text = FieldDefinition::text().build().unwrap();
        let short = FieldDefinition::text().with_length(12).build().unwrap();
        let int = FieldDefinition::integer().build().unwrap();
        let dec = FieldDefinition::decimal().build().unwrap();
        let money = FieldDefinition::decimal().with_precision(6, 3).build().unwrap();
        let digits = FieldDefinition::decimal().with_option("precision", 5i64).build().unwrap();
        let flag = FieldDefinition::boolean().build().unwrap();
        let link = FieldDefinition::association("category").build().unwrap();

        assert_eq!(ColumnType::for_field(&text), ColumnType::Varchar(255));
        assert_eq!(ColumnType::for_field(&short), ColumnType::Varchar(12));
        assert_eq!(ColumnType::for_field(&int), ColumnType::BigInt);
        assert_eq!(
            ColumnType::for_field(&dec),
            ColumnType::Numeric { precision: None, scale: None }
        );
        assert_eq!(ColumnType::for_field(&money).sql(), "NUMERIC(6, 3)");
        assert_eq!(ColumnType::for_field(&digits).sql(), "NUMERIC(5, 0)");
        assert_eq!(ColumnType::for_field(&flag), ColumnType::Boolean);
        assert_eq!(ColumnType::for_field(&link), ColumnType::Varchar(ID_LENGTH));
    }

    #[test]
    fn required_fields_are_not_nullable() {
        let layout = &TableLayout::for_schema(&product_schema())[0];
        assert!(!layout.column("sku").unwrap().nullable);
        assert!(layout.column("price").unwrap().nullable);
    }

    #[test]
    fn decimal_default_is_rendered_at_declared_scale() {
        let layout = &TableLayout::for_schema(&product_schema())[0];
        let price = layout.column("price").unwrap();
        assert_eq!(price.default.as_deref(), Some("0.00"));
        assert_eq!(price.default_scalar(), Scalar::Decimal(Decimal::new(0, 2)));
    }

    #[test]
    fn diff_against_empty_creates_tables() {
        let target = TableLayout::for_schema(&product_schema());
        let changes = diff(&BTreeMap::new(), &target);
        assert_eq!(changes, vec![SchemaChange::CreateTable(target[0].clone())]);
    }

    #[test]
    fn diff_of_identical_layouts_is_empty() {
        let target = TableLayout::for_schema(&product_schema());
        let current = current_of(target.clone());
        assert!(diff(&current, &target).is_empty());
    }

    #[test]
    fn diff_adds_alters_and_drops_columns() {
        let mut current = TableLayout::for_schema(&product_schema()).remove(0);
        current.columns.push(ColumnLayout {
            name: "legacy".into(),
            column_type: ColumnType::Text,
            nullable: true,
            default: None,
        });
        current.columns[1].column_type = ColumnType::Varchar(64);

        let mut target = TableLayout::for_schema(&product_schema()).remove(0);
        let stock = FieldDefinition::integer().with_default(0i64).build().unwrap();
        target.columns.push(ColumnLayout::for_field("stock", &stock));

        let changes = diff(&current_of(vec![current.clone()]), &[target.clone()]);

        assert_eq!(changes.len(), 3);
        assert!(matches!(
            &changes[0],
            SchemaChange::AlterColumn { from, to, .. }
                if from.column_type == ColumnType::Varchar(64) && to.column_type == ColumnType::Varchar(255)
        ));
        assert!(matches!(
            &changes[1],
            SchemaChange::AddColumn { column, .. } if column.name == "stock"
        ));
        assert_eq!(
            changes[2],
            SchemaChange::DropColumn {
                table: target.name.clone(),
                column: "legacy".into()
            }
        );
    }

    #[test]
    fn diff_ignores_unrelated_tables() {
        let other = TableLayout {
            name: "metadata_other_thing".into(),
            columns: vec![ColumnLayout::id()],
        };
        let target = TableLayout::for_schema(&product_schema());
        let mut current = current_of(target.clone());
        current.insert(other.name.clone(), other);

        assert!(diff(&current, &target).is_empty());
    }

    #[test]
    fn drop_changes_skip_missing_tables() {
        let target = TableLayout::for_schema(&product_schema());
        assert!(drop_changes(&BTreeMap::new(), &target).is_empty());

        let current = current_of(target.clone());
        assert_eq!(
            drop_changes(&current, &target),
            vec![SchemaChange::DropTable {
                table: "metadata_catalog_product".into()
            }]
        );
    }

    #[test]
    fn normalizes_backend_defaults() {
        assert_eq!(normalize_default("0.00"), "0.00");
        assert_eq!(normalize_default("'Dumplie'::character varying"), "Dumplie");
        assert_eq!(normalize_default("'O''Reilly'::character varying"), "O'Reilly");
        assert_eq!(normalize_default("('-5'::integer)::bigint"), "-5");
        assert_eq!(normalize_default("'a::b'::text"), "a::b");
        assert_eq!(normalize_default("true"), "true");
    }

    #[test]
    fn text_default_parses_back_as_text() {
        let field = FieldDefinition::text().with_default("Dumplie").build().unwrap();
        let column = ColumnLayout::for_field("brand", &field);
        assert_eq!(column.default_scalar(), Scalar::from("Dumplie"));
    }
}
