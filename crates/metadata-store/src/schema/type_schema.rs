use crate::error::{MetadataStoreError, Result};
use crate::value::ID_FIELD;

use super::field::FieldDefinition;
use super::validate_identifier;

/// The shape of one record kind: an ordered set of uniquely named fields.
///
/// Field names are unique under case-insensitive comparison. Every type
/// implicitly owns an `id` field, which must not be declared explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeSchema {
    name: String,
    fields: Vec<(String, FieldDefinition)>,
}

impl TypeSchema {
    /// Creates a type schema from `(field name, definition)` pairs.
    ///
    /// Declaration order is preserved and becomes the column order of the
    /// backing structure.
    pub fn new<I, K>(name: impl Into<String>, fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, FieldDefinition)>,
        K: Into<String>,
    {
        let name = name.into();
        validate_identifier("type", &name)?;

        let mut declared: Vec<(String, FieldDefinition)> = Vec::new();
        for (field, definition) in fields {
            let field = field.into();
            validate_identifier("field", &field)?;

            if field.eq_ignore_ascii_case(ID_FIELD) {
                return Err(MetadataStoreError::invalid(format!(
                    "type \"{name}\" cannot redeclare the implicit \"{ID_FIELD}\" field"
                )));
            }

            if let Some((existing, _)) = declared
                .iter()
                .find(|(existing, _)| existing.eq_ignore_ascii_case(&field))
            {
                return Err(MetadataStoreError::invalid(format!(
                    "type \"{name}\" declares field \"{field}\" twice (conflicts with \"{existing}\")"
                )));
            }

            declared.push((field, definition));
        }

        Ok(Self {
            name,
            fields: declared,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns every declared field except those named in `excluding`.
    ///
    /// Exclusion is case-insensitive, matching field-name uniqueness.
    pub fn get_definitions(&self, excluding: &[&str]) -> Vec<(&str, &FieldDefinition)> {
        self.fields
            .iter()
            .filter(|(name, _)| !excluding.iter().any(|ex| ex.eq_ignore_ascii_case(name)))
            .map(|(name, definition)| (name.as_str(), definition))
            .collect()
    }

    /// Iterates all declared fields in declaration order.
    pub fn definitions(&self) -> impl Iterator<Item = (&str, &FieldDefinition)> {
        self.fields
            .iter()
            .map(|(name, definition)| (name.as_str(), definition))
    }

    /// Looks up a field by its exact name.
    pub fn definition(&self, field: &str) -> Option<&FieldDefinition> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, definition)| definition)
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.definition(field).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
