use std::collections::BTreeMap;

use serde::Serialize;

use crate::value::{ID_FIELD, Scalar};
use crate::MetadataId;

/// Builder for equality-filtered lookups.
///
/// Every criterion must hold for a row to match (a conjunction of
/// `column = value` tests). A `Null` value matches rows where the column is
/// NULL. Empty criteria match every row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Criteria {
    fields: BTreeMap<String, Scalar>,
}

impl Criteria {
    /// Creates empty criteria, matching every row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates criteria selecting a single record by id.
    pub fn by_id(id: impl Into<MetadataId>) -> Self {
        let id: MetadataId = id.into();
        Self::new().equals(ID_FIELD, id)
    }

    /// Requires `field` to equal `value`.
    pub fn equals(mut self, field: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Iterates the criteria in column-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Scalar)> {
        self.fields.iter()
    }

    /// Returns true if `row` satisfies every criterion.
    ///
    /// A column missing from the row is treated as NULL.
    pub fn matches(&self, row: &BTreeMap<String, Scalar>) -> bool {
        self.fields.iter().all(|(field, expected)| {
            row.get(field)
                .unwrap_or(&Scalar::Null)
                .matches(expected)
        })
    }
}

impl std::fmt::Display for Criteria {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| std::fmt::Error)?;
        write!(f, "{json}")
    }
}

impl<K: Into<String>, V: Into<Scalar>> FromIterator<(K, V)> for Criteria {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Criteria::new(), |criteria, (k, v)| criteria.equals(k, v))
    }
}
