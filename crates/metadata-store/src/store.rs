use async_trait::async_trait;

use crate::layout::SchemaChange;
use crate::{Criteria, MetadataId, Result, Row, Schema};

/// Core trait for metadata storage backends.
///
/// A storage owns the durable representation of records: one structure per
/// type of a [`Schema`], holding raw [`Row`]s. Structural operations
/// (`create_schema`, `alter_schema`, `drop_schema`) are meant to run at
/// bootstrap or deploy time, not under concurrent record traffic.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Storage: Send + Sync {
    /// Creates the backing structure of every type in `schema`.
    ///
    /// Fails with `AlreadyExists` if any of them exists. Every structure is
    /// checked before the first one is created, so a failed call creates
    /// nothing.
    async fn create_schema(&self, schema: &Schema) -> Result<()>;

    /// Moves the backing structures to the layout `schema` declares.
    ///
    /// Missing structures are created, and columns are added, altered or
    /// dropped as needed. Returns the changes that were applied; calling this
    /// again with the same schema returns an empty list.
    async fn alter_schema(&self, schema: &Schema) -> Result<Vec<SchemaChange>>;

    /// Removes the backing structure of every type in `schema`.
    ///
    /// Types without a structure are skipped.
    async fn drop_schema(&self, schema: &Schema) -> Result<()>;

    /// Returns all rows of a type matching every criterion, ordered by id.
    ///
    /// Empty criteria return every row. Fails with `StructureNotFound` if the
    /// type has no structure and `ColumnNotFound` for unknown criteria columns.
    async fn find_by(&self, schema: &str, type_name: &str, criteria: &Criteria)
    -> Result<Vec<Row>>;

    /// Checks whether a row with `id` exists.
    async fn has(&self, schema: &str, type_name: &str, id: &MetadataId) -> Result<bool>;

    /// Inserts the row, or updates the given columns if `id` already exists.
    ///
    /// Columns omitted on insert receive their default (or NULL). An `id`
    /// entry in `row` is ignored in favour of the `id` argument.
    async fn save(&self, schema: &str, type_name: &str, id: &MetadataId, row: Row) -> Result<()>;

    /// Deletes the row with `id`. Deleting an absent row is a no-op.
    async fn delete(&self, schema: &str, type_name: &str, id: &MetadataId) -> Result<()>;
}

/// Extension trait providing convenience methods for storages.
#[async_trait]
pub trait StorageExt: Storage {
    /// Returns every row of a type.
    async fn find_all(&self, schema: &str, type_name: &str) -> Result<Vec<Row>> {
        self.find_by(schema, type_name, &Criteria::new()).await
    }

    /// Returns the first matching row (lowest id), if any.
    async fn find_first(
        &self,
        schema: &str,
        type_name: &str,
        criteria: &Criteria,
    ) -> Result<Option<Row>> {
        Ok(self
            .find_by(schema, type_name, criteria)
            .await?
            .into_iter()
            .next())
    }
}

// Blanket implementation for all Storage implementations
impl<T: Storage + ?Sized> StorageExt for T {}

#[async_trait]
impl<T: Storage + ?Sized> Storage for std::sync::Arc<T> {
    async fn create_schema(&self, schema: &Schema) -> Result<()> {
        (**self).create_schema(schema).await
    }

    async fn alter_schema(&self, schema: &Schema) -> Result<Vec<SchemaChange>> {
        (**self).alter_schema(schema).await
    }

    async fn drop_schema(&self, schema: &Schema) -> Result<()> {
        (**self).drop_schema(schema).await
    }

    async fn find_by(
        &self,
        schema: &str,
        type_name: &str,
        criteria: &Criteria,
    ) -> Result<Vec<Row>> {
        (**self).find_by(schema, type_name, criteria).await
    }

    async fn has(&self, schema: &str, type_name: &str, id: &MetadataId) -> Result<bool> {
        (**self).has(schema, type_name, id).await
    }

    async fn save(&self, schema: &str, type_name: &str, id: &MetadataId, row: Row) -> Result<()> {
        (**self).save(schema, type_name, id, row).await
    }

    async fn delete(&self, schema: &str, type_name: &str, id: &MetadataId) -> Result<()> {
        (**self).delete(schema, type_name, id).await
    }
}
