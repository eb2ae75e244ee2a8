//! Conversion between raw storage rows and typed records.

use metadata_store::{
    FieldDefinition, FieldKind, ID_FIELD, MetadataId, Row, Scalar, TypeSchema, fit_numeric,
};
use rust_decimal::Decimal;

use crate::error::{MetadataError, Result};
use crate::record::{Metadata, Value};

/// Maps rows to records and back for one type schema at a time.
///
/// All implementations must be thread-safe (Send + Sync).
pub trait Hydrator: Send + Sync {
    /// Builds a record from a raw row.
    ///
    /// Fails without producing a partial record if the row has no id or a
    /// declared field cannot be represented.
    fn hydrate(&self, type_schema: &TypeSchema, row: Row) -> Result<Metadata>;

    /// Flattens a record into a row holding `id` and one scalar per declared
    /// field.
    fn dehydrate(&self, type_schema: &TypeSchema, record: &Metadata) -> Result<Row>;
}

/// The standard hydrator.
///
/// Reading, an absent column takes the field default (or null) and a present
/// value is coerced to the declared kind. Decimals are rounded to the declared
/// scale and must fit the declared precision. Columns the type does not
/// declare are ignored.
///
/// Writing, an unset optional field becomes its default (or null). Unset
/// required fields, fields the type does not declare and values of the wrong
/// kind are rejected. Each kind accepts exactly the `Value` variant it reads
/// back, so `Integer` is no decimal and `Text` is no association.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHydrator;

impl DefaultHydrator {
    pub fn new() -> Self {
        Self
    }
}

impl Hydrator for DefaultHydrator {
    fn hydrate(&self, type_schema: &TypeSchema, mut row: Row) -> Result<Metadata> {
        let id = match row.remove(ID_FIELD) {
            Some(Scalar::Text(id)) if !id.is_empty() => MetadataId::new(id),
            Some(Scalar::Integer(id)) => MetadataId::new(id.to_string()),
            Some(Scalar::Null) | None => {
                return Err(failure(type_schema, ID_FIELD, "row has no identifier"));
            }
            Some(other) => {
                return Err(failure(
                    type_schema,
                    ID_FIELD,
                    format!("identifier {other} is not text"),
                ));
            }
        };

        let mut record = Metadata::new(type_schema.name(), id);
        for (field, definition) in type_schema.definitions() {
            let value = match row.remove(field) {
                Some(Scalar::Null) | None if definition.is_required() => {
                    return Err(failure(type_schema, field, "required value is missing"));
                }
                None => match definition.default_value() {
                    Some(default) => read_scalar(type_schema, field, definition, default.clone())?,
                    None => Value::Null,
                },
                Some(Scalar::Null) => Value::Null,
                Some(scalar) => read_scalar(type_schema, field, definition, scalar)?,
            };
            record.set(field, value);
        }

        Ok(record)
    }

    fn dehydrate(&self, type_schema: &TypeSchema, record: &Metadata) -> Result<Row> {
        if record.type_name() != type_schema.name() {
            return Err(failure(
                type_schema,
                ID_FIELD,
                format!("record {} is of type \"{}\"", record.id(), record.type_name()),
            ));
        }

        if let Some((field, _)) = record
            .fields()
            .find(|(field, _)| !type_schema.has_field(field))
        {
            return Err(failure(type_schema, field, "field is not declared"));
        }

        let mut row = Row::new();
        row.insert(ID_FIELD.to_string(), Scalar::from(record.id()));

        for (field, definition) in type_schema.definitions() {
            let scalar = match record.get(field) {
                None | Some(Value::Null) if definition.is_required() => {
                    return Err(failure(type_schema, field, "required value is not set"));
                }
                None => match definition.default_value() {
                    Some(default) => normalize_default(type_schema, field, definition, default)?,
                    None => Scalar::Null,
                },
                Some(Value::Null) => Scalar::Null,
                Some(value) => write_value(type_schema, field, definition, value)?,
            };
            row.insert(field.to_string(), scalar);
        }

        Ok(row)
    }
}

fn failure(type_schema: &TypeSchema, field: &str, reason: impl Into<String>) -> MetadataError {
    let reason = reason.into();
    tracing::debug!(type_name = type_schema.name(), field, %reason, "hydration failed");
    metrics::counter!("metadata_hydration_failures_total").increment(1);

    MetadataError::Hydration {
        type_name: type_schema.name().to_string(),
        field: field.to_string(),
        reason,
    }
}

fn read_scalar(
    type_schema: &TypeSchema,
    field: &str,
    definition: &FieldDefinition,
    scalar: Scalar,
) -> Result<Value> {
    let mismatch = |scalar: &Scalar| {
        failure(
            type_schema,
            field,
            format!("cannot read {scalar} as {}", definition.kind()),
        )
    };

    let value = match (definition.kind(), scalar) {
        (FieldKind::Text, Scalar::Text(text)) => Value::Text(text),
        (FieldKind::Integer, Scalar::Integer(i)) => Value::Integer(i),
        (FieldKind::Integer, Scalar::Decimal(d)) if d.fract().is_zero() => {
            let i = i64::try_from(d).map_err(|_| mismatch(&Scalar::Decimal(d)))?;
            Value::Integer(i)
        }
        (FieldKind::Integer, Scalar::Text(text)) => match text.trim().parse::<i64>() {
            Ok(i) => Value::Integer(i),
            Err(_) => return Err(mismatch(&Scalar::Text(text))),
        },
        (FieldKind::Decimal, scalar) => {
            let parsed = match &scalar {
                Scalar::Decimal(d) => Some(*d),
                Scalar::Integer(i) => Some(Decimal::from(*i)),
                Scalar::Text(text) => text.trim().parse::<Decimal>().ok(),
                Scalar::Null | Scalar::Boolean(_) => None,
            };
            let Some(decimal) = parsed else {
                return Err(mismatch(&scalar));
            };
            Value::Decimal(fit_decimal(type_schema, field, definition, decimal)?)
        }
        (FieldKind::Boolean, Scalar::Boolean(b)) => Value::Boolean(b),
        (FieldKind::Boolean, Scalar::Integer(i @ (0 | 1))) => Value::Boolean(i == 1),
        (FieldKind::Boolean, Scalar::Text(text)) => {
            match text.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Value::Boolean(true),
                "false" | "f" | "0" => Value::Boolean(false),
                _ => return Err(mismatch(&Scalar::Text(text))),
            }
        }
        (FieldKind::Association { .. }, Scalar::Text(id)) if !id.is_empty() => {
            Value::Association(MetadataId::new(id))
        }
        (_, scalar) => return Err(mismatch(&scalar)),
    };

    Ok(value)
}

fn write_value(
    type_schema: &TypeSchema,
    field: &str,
    definition: &FieldDefinition,
    value: &Value,
) -> Result<Scalar> {
    let scalar = match (definition.kind(), value) {
        (FieldKind::Text, Value::Text(text)) => {
            if let Some(length) = definition.length()
                && text.chars().count() > length as usize
            {
                return Err(failure(
                    type_schema,
                    field,
                    format!("text is longer than {length} characters"),
                ));
            }
            Scalar::Text(text.clone())
        }
        (FieldKind::Integer, Value::Integer(i)) => Scalar::Integer(*i),
        (FieldKind::Decimal, Value::Decimal(d)) => {
            Scalar::Decimal(fit_decimal(type_schema, field, definition, *d)?)
        }
        (FieldKind::Boolean, Value::Boolean(b)) => Scalar::Boolean(*b),
        (FieldKind::Association { .. }, Value::Association(id)) => Scalar::from(id),
        (kind, value) => {
            return Err(failure(
                type_schema,
                field,
                format!("cannot write {} value {value} as {kind}", value.type_name()),
            ));
        }
    };

    Ok(scalar)
}

fn normalize_default(
    type_schema: &TypeSchema,
    field: &str,
    definition: &FieldDefinition,
    default: &Scalar,
) -> Result<Scalar> {
    match default {
        Scalar::Decimal(d) => Ok(Scalar::Decimal(fit_decimal(
            type_schema,
            field,
            definition,
            *d,
        )?)),
        other => Ok(other.clone()),
    }
}

/// Rounds half away from zero to the declared scale and checks the declared
/// precision.
fn fit_decimal(
    type_schema: &TypeSchema,
    field: &str,
    definition: &FieldDefinition,
    value: Decimal,
) -> Result<Decimal> {
    fit_numeric(value, definition.precision(), definition.scale()).ok_or_else(|| {
        failure(
            type_schema,
            field,
            format!(
                "{value} does not fit NUMERIC({}, {})",
                definition.precision().unwrap_or_default(),
                definition.scale().unwrap_or_default()
            ),
        )
    })
}
