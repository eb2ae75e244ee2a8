use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a single metadata record.
///
/// Identifiers are opaque strings. Callers may supply their own (`"p1"`) or
/// generate a random one with [`MetadataId::generate`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataId(String);

impl MetadataId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a new random identifier (a UUID v4 in hyphenated form).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the identifier, returning the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for MetadataId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MetadataId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for MetadataId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<Uuid> for MetadataId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }
}

impl From<MetadataId> for String {
    fn from(id: MetadataId) -> Self {
        id.0
    }
}

impl AsRef<str> for MetadataId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
