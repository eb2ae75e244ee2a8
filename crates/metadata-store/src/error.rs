use thiserror::Error;

/// Errors that can occur when declaring schemas or talking to a storage backend.
#[derive(Debug, Error)]
pub enum MetadataStoreError {
    /// A schema, type or field declaration is invalid.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A structure that `create` would produce already exists in the backend.
    #[error("Structure \"{structure}\" already exists")]
    AlreadyExists { structure: String },

    /// The backing structure for a type does not exist.
    #[error("Structure \"{structure}\" not found")]
    StructureNotFound { structure: String },

    /// A criterion or row references a column the structure does not have.
    #[error("Column \"{column}\" not found in structure \"{structure}\"")]
    ColumnNotFound { structure: String, column: String },

    /// A saved value or criterion does not satisfy a column constraint.
    #[error("Invalid value for structure \"{structure}\": {reason}")]
    InvalidValue { structure: String, reason: String },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl MetadataStoreError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        MetadataStoreError::InvalidArgument(message.into())
    }

    /// Returns true for the structure and column not-found variants.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            MetadataStoreError::StructureNotFound { .. } | MetadataStoreError::ColumnNotFound { .. }
        )
    }
}

/// Result type for schema and storage operations.
pub type Result<T> = std::result::Result<T, MetadataStoreError>;
