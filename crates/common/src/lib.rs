//! Shared types for the metadata storage layer.

mod types;

pub use types::MetadataId;
