pub mod config;
pub mod criteria;
pub mod error;
pub mod layout;
pub mod memory;
pub mod postgres;
pub mod schema;
pub mod store;
pub mod value;

pub use common::MetadataId;
pub use config::PostgresConfig;
pub use criteria::Criteria;
pub use error::{MetadataStoreError, Result};
pub use layout::{ColumnLayout, ColumnType, SchemaChange, TABLE_PREFIX, TableLayout, table_name};
pub use memory::InMemoryStorage;
pub use postgres::PostgresStorage;
pub use schema::{
    FieldDefinition, FieldDefinitionBuilder, FieldKind, Schema, SchemaBuilder, TypeSchema,
};
pub use store::{Storage, StorageExt};
pub use value::{ID_FIELD, Row, Scalar, fit_numeric};
