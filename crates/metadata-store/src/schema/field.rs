use std::collections::BTreeMap;

use crate::error::{MetadataStoreError, Result};
use crate::value::{Scalar, fit_numeric};

/// Option key for the total number of significant digits of a decimal.
pub const OPTION_PRECISION: &str = "precision";
/// Option key for the number of digits after the decimal point.
pub const OPTION_SCALE: &str = "scale";
/// Option key for the maximum length of a text field.
pub const OPTION_LENGTH: &str = "length";

/// Largest decimal precision a record value can carry.
pub const MAX_PRECISION: u32 = 28;
/// Largest declared text length.
pub const MAX_LENGTH: u32 = 10_485_760;

/// The kind of value a field holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Decimal,
    Boolean,
    /// Identifier of a record of another type in the same schema.
    Association { target: String },
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Integer => "integer",
            FieldKind::Decimal => "decimal",
            FieldKind::Boolean => "boolean",
            FieldKind::Association { .. } => "association",
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldKind::Association { target } => write!(f, "association({target})"),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Describes one typed, named attribute of a record.
///
/// A definition is either required (no default, never null) or optional with
/// an optional default. Backend mapping hints live in `options`:
/// `precision`/`scale` for decimals and `length` for text.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDefinition {
    kind: FieldKind,
    default: Option<Scalar>,
    required: bool,
    options: BTreeMap<String, Scalar>,
}

impl FieldDefinition {
    /// Creates a definition, validating the combination of arguments.
    pub fn new(
        kind: FieldKind,
        default: Option<Scalar>,
        required: bool,
        options: BTreeMap<String, Scalar>,
    ) -> Result<Self> {
        let default = default.filter(|d| !d.is_null());

        if required && default.is_some() {
            return Err(MetadataStoreError::invalid(format!(
                "{kind} field cannot be required and have a default value"
            )));
        }

        for key in [OPTION_PRECISION, OPTION_SCALE, OPTION_LENGTH] {
            if let Some(value) = options.get(key) {
                match value {
                    Scalar::Integer(i) if *i >= 0 && *i <= i64::from(u32::MAX) => {}
                    other => {
                        return Err(MetadataStoreError::invalid(format!(
                            "option \"{key}\" must be a non-negative integer, got {other}"
                        )));
                    }
                }
            }
        }

        let definition = Self {
            kind,
            default: None,
            required,
            options,
        };

        definition.check_bounds()?;

        let default = default
            .map(|value| definition.coerce_default(value))
            .transpose()?;

        Ok(Self {
            default,
            ..definition
        })
    }

    /// Starts a text field definition.
    pub fn text() -> FieldDefinitionBuilder {
        FieldDefinitionBuilder::new(FieldKind::Text)
    }

    /// Starts an integer field definition.
    pub fn integer() -> FieldDefinitionBuilder {
        FieldDefinitionBuilder::new(FieldKind::Integer)
    }

    /// Starts a decimal field definition.
    pub fn decimal() -> FieldDefinitionBuilder {
        FieldDefinitionBuilder::new(FieldKind::Decimal)
    }

    /// Starts a boolean field definition.
    pub fn boolean() -> FieldDefinitionBuilder {
        FieldDefinitionBuilder::new(FieldKind::Boolean)
    }

    /// Starts an association to records of `target` type.
    pub fn association(target: impl Into<String>) -> FieldDefinitionBuilder {
        FieldDefinitionBuilder::new(FieldKind::Association {
            target: target.into(),
        })
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn default_value(&self) -> Option<&Scalar> {
        self.default.as_ref()
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn options(&self) -> &BTreeMap<String, Scalar> {
        &self.options
    }

    pub fn option(&self, key: &str) -> Option<&Scalar> {
        self.options.get(key)
    }

    /// Declared decimal precision, if any.
    pub fn precision(&self) -> Option<u32> {
        self.u32_option(OPTION_PRECISION)
    }

    /// Declared decimal scale, if any.
    pub fn scale(&self) -> Option<u32> {
        self.u32_option(OPTION_SCALE)
    }

    /// Declared text length, if any.
    pub fn length(&self) -> Option<u32> {
        self.u32_option(OPTION_LENGTH)
    }

    fn u32_option(&self, key: &str) -> Option<u32> {
        match self.options.get(key) {
            Some(Scalar::Integer(i)) => u32::try_from(*i).ok(),
            _ => None,
        }
    }

    fn check_bounds(&self) -> Result<()> {
        match (self.precision(), self.scale()) {
            (None, Some(scale)) => {
                return Err(MetadataStoreError::invalid(format!(
                    "decimal scale {scale} requires a precision"
                )));
            }
            (Some(precision), _) if !(1..=MAX_PRECISION).contains(&precision) => {
                return Err(MetadataStoreError::invalid(format!(
                    "decimal precision must be between 1 and {MAX_PRECISION}, got {precision}"
                )));
            }
            (Some(precision), Some(scale)) if scale > precision => {
                return Err(MetadataStoreError::invalid(format!(
                    "decimal scale {scale} exceeds precision {precision}"
                )));
            }
            _ => {}
        }

        if let Some(length) = self.length()
            && !(1..=MAX_LENGTH).contains(&length)
        {
            return Err(MetadataStoreError::invalid(format!(
                "text length must be between 1 and {MAX_LENGTH}, got {length}"
            )));
        }

        Ok(())
    }

    fn coerce_default(&self, value: Scalar) -> Result<Scalar> {
        let coerced = match (&self.kind, value) {
            (FieldKind::Text, v @ Scalar::Text(_)) => v,
            (FieldKind::Integer, v @ Scalar::Integer(_)) => v,
            (FieldKind::Decimal, v @ (Scalar::Integer(_) | Scalar::Decimal(_))) => {
                let decimal = v.as_decimal().unwrap_or_default();
                match fit_numeric(decimal, self.precision(), self.scale()) {
                    Some(fitted) => Scalar::Decimal(fitted),
                    None => {
                        return Err(MetadataStoreError::invalid(format!(
                            "default {v} does not fit precision {} and scale {}",
                            self.precision().unwrap_or_default(),
                            self.scale().unwrap_or_default()
                        )));
                    }
                }
            }
            (FieldKind::Boolean, v @ Scalar::Boolean(_)) => v,
            (FieldKind::Association { .. }, Scalar::Text(id)) if !id.is_empty() => {
                Scalar::Text(id)
            }
            (kind, other) => {
                return Err(MetadataStoreError::invalid(format!(
                    "default {other} ({}) does not match {kind} field",
                    other.type_name()
                )));
            }
        };

        if let (FieldKind::Text, Some(length), Scalar::Text(text)) =
            (&self.kind, self.length(), &coerced)
            && text.chars().count() > length as usize
        {
            return Err(MetadataStoreError::invalid(format!(
                "default {coerced} is longer than the declared length {length}"
            )));
        }

        Ok(coerced)
    }
}

/// Fluent construction of [`FieldDefinition`]s.
///
/// ```
/// use metadata_store::FieldDefinition;
/// use rust_decimal::Decimal;
///
/// let price = FieldDefinition::decimal()
///     .with_default(Decimal::ZERO)
///     .with_precision(10, 2)
///     .build()
///     .unwrap();
/// assert_eq!(price.scale(), Some(2));
/// ```
#[derive(Debug, Clone)]
pub struct FieldDefinitionBuilder {
    kind: FieldKind,
    default: Option<Scalar>,
    required: bool,
    options: BTreeMap<String, Scalar>,
}

impl FieldDefinitionBuilder {
    fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            default: None,
            required: false,
            options: BTreeMap::new(),
        }
    }

    /// Marks the field as required: it must always carry a non-null value.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Sets the value used when a record does not provide one.
    pub fn with_default(mut self, value: impl Into<Scalar>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_precision(self, precision: u32, scale: u32) -> Self {
        self.with_option(OPTION_PRECISION, i64::from(precision))
            .with_option(OPTION_SCALE, i64::from(scale))
    }

    pub fn with_length(self, length: u32) -> Self {
        self.with_option(OPTION_LENGTH, i64::from(length))
    }

    pub fn build(self) -> Result<FieldDefinition> {
        FieldDefinition::new(self.kind, self.default, self.required, self.options)
    }
}
