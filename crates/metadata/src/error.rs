//! Errors raised by typed record access.

use metadata_store::MetadataStoreError;
use thiserror::Error;

/// Errors that can occur while hydrating, storing or looking up records.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// An error occurred in the underlying storage.
    #[error("Storage error: {0}")]
    Storage(#[from] MetadataStoreError),

    /// A row could not become a record, or a record could not become a row.
    #[error("Cannot map field \"{field}\" of type \"{type_name}\": {reason}")]
    Hydration {
        type_name: String,
        field: String,
        reason: String,
    },

    /// The schema does not declare the requested type.
    #[error("Type \"{type_name}\" not found in schema \"{schema}\"")]
    TypeNotFound { schema: String, type_name: String },

    /// No record matched a lookup that requires one.
    #[error("No \"{type_name}\" record matches {criteria}")]
    RecordNotFound { type_name: String, criteria: String },
}

impl MetadataError {
    /// Returns true when the error means something was absent rather than broken.
    pub fn is_not_found(&self) -> bool {
        match self {
            MetadataError::Storage(err) => err.is_not_found(),
            MetadataError::TypeNotFound { .. } | MetadataError::RecordNotFound { .. } => true,
            MetadataError::Hydration { .. } => false,
        }
    }
}

/// Result type for record operations.
pub type Result<T> = std::result::Result<T, MetadataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_type_and_field() {
        let err = MetadataError::Hydration {
            type_name: "product".into(),
            field: "sku".into(),
            reason: "required value is missing".into(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot map field \"sku\" of type \"product\": required value is missing"
        );
        assert!(!err.is_not_found());
    }

    #[test]
    fn not_found_variants() {
        let missing = MetadataError::RecordNotFound {
            type_name: "product".into(),
            criteria: "{\"id\":\"p1\"}".into(),
        };
        assert!(missing.is_not_found());

        let storage = MetadataError::from(MetadataStoreError::StructureNotFound {
            structure: "metadata_catalog_product".into(),
        });
        assert!(storage.is_not_found());
    }
}
