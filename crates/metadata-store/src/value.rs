use std::collections::BTreeMap;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::MetadataId;

/// Name of the implicit identifier column every structure carries.
pub const ID_FIELD: &str = "id";

/// A raw value as exchanged between storage backends and the hydrator.
///
/// Scalars are untyped with respect to a schema: a `Decimal` field may be
/// handed back as `Text` or `Integer` by one backend and as `Decimal` by
/// another. Coercion to the declared kind happens during hydration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    Boolean(bool),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Returns the text content, if this is a `Text` scalar.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the numeric value of `Integer` and `Decimal` scalars.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Scalar::Integer(i) => Some(Decimal::from(*i)),
            Scalar::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    /// Equality as a storage backend compares column values.
    ///
    /// Numbers compare by value regardless of representation (`1 == 1.00`),
    /// and `Null` only matches `Null`.
    pub fn matches(&self, other: &Scalar) -> bool {
        match (self, other) {
            (Scalar::Null, Scalar::Null) => true,
            (Scalar::Text(a), Scalar::Text(b)) => a == b,
            (Scalar::Boolean(a), Scalar::Boolean(b)) => a == b,
            _ => match (self.as_decimal(), other.as_decimal()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Scalar::Null => "null",
            Scalar::Text(_) => "text",
            Scalar::Integer(_) => "integer",
            Scalar::Decimal(_) => "decimal",
            Scalar::Boolean(_) => "boolean",
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Text(s) => write!(f, "{s:?}"),
            Scalar::Integer(i) => write!(f, "{i}"),
            Scalar::Decimal(d) => write!(f, "{d}"),
            Scalar::Boolean(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Integer(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Integer(i64::from(value))
    }
}

impl From<Decimal> for Scalar {
    fn from(value: Decimal) -> Self {
        Scalar::Decimal(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Boolean(value)
    }
}

impl From<MetadataId> for Scalar {
    fn from(value: MetadataId) -> Self {
        Scalar::Text(value.into_inner())
    }
}

impl From<&MetadataId> for Scalar {
    fn from(value: &MetadataId) -> Self {
        Scalar::Text(value.as_str().to_string())
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(value: Option<T>) -> Self {
        value.map_or(Scalar::Null, Into::into)
    }
}

/// Rounds `value` half away from zero to `scale` digits and checks that it
/// fits `NUMERIC(precision, scale)`.
///
/// Returns `None` when the integer part needs more than `precision - scale`
/// digits. Without a precision the value is returned unchanged, as an
/// unconstrained `NUMERIC` column keeps it.
pub fn fit_numeric(value: Decimal, precision: Option<u32>, scale: Option<u32>) -> Option<Decimal> {
    let Some(precision) = precision else {
        return Some(value);
    };
    let scale = scale.unwrap_or(0);

    let mut rounded = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    let integer_digits = rounded
        .trunc()
        .abs()
        .to_string()
        .trim_start_matches('0')
        .len() as u32;
    if integer_digits > precision.saturating_sub(scale) {
        return None;
    }

    rounded.rescale(scale);
    Some(rounded)
}

/// A raw record as stored by a backend: column name to scalar value.
///
/// Rows returned by storage always contain [`ID_FIELD`].
pub type Row = BTreeMap<String, Scalar>;
