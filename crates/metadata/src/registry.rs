//! Registry handing out one access object per type of a schema.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use metadata_store::{Criteria, FieldKind, Schema, SchemaChange, Storage, StorageExt};

use crate::access::MetadataAccessObject;
use crate::error::{MetadataError, Result};
use crate::hydrator::{DefaultHydrator, Hydrator};
use crate::record::{Metadata, Value};

/// Entry point for typed access to the records of one schema.
///
/// Access objects are built lazily and cached per type name for the lifetime
/// of the registry.
pub struct MetadataAccessRegistry<S: Storage, H: Hydrator = DefaultHydrator> {
    storage: Arc<S>,
    hydrator: Arc<H>,
    schema: Schema,
    cache: Mutex<HashMap<String, Arc<MetadataAccessObject<S, H>>>>,
}

impl<S: Storage> MetadataAccessRegistry<S> {
    /// Creates a registry using the [`DefaultHydrator`].
    pub fn with_default_hydrator(storage: S, schema: Schema) -> Self {
        Self::new(storage, schema, DefaultHydrator)
    }
}

impl<S: Storage, H: Hydrator> MetadataAccessRegistry<S, H> {
    pub fn new(storage: S, schema: Schema, hydrator: H) -> Self {
        Self {
            storage: Arc::new(storage),
            hydrator: Arc::new(hydrator),
            schema,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Creates the backing structures of the registry's schema.
    pub async fn create_schema(&self) -> Result<()> {
        Ok(self.storage.create_schema(&self.schema).await?)
    }

    /// Brings the backing structures in line with the registry's schema.
    pub async fn alter_schema(&self) -> Result<Vec<SchemaChange>> {
        Ok(self.storage.alter_schema(&self.schema).await?)
    }

    /// Removes the backing structures of the registry's schema.
    pub async fn drop_schema(&self) -> Result<()> {
        Ok(self.storage.drop_schema(&self.schema).await?)
    }

    /// Returns the access object for `type_name`.
    ///
    /// Repeated calls for the same type return the same instance.
    pub fn get_mao(&self, type_name: &str) -> Result<Arc<MetadataAccessObject<S, H>>> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(mao) = cache.get(type_name) {
            return Ok(Arc::clone(mao));
        }

        let type_schema = self
            .schema
            .get_type(type_name)
            .ok_or_else(|| MetadataError::TypeNotFound {
                schema: self.schema.name().to_string(),
                type_name: type_name.to_string(),
            })?;

        tracing::debug!(schema = self.schema.name(), type_name, "creating access object");
        let mao = Arc::new(MetadataAccessObject::new(
            Arc::clone(&self.storage),
            Arc::clone(&self.hydrator),
            self.schema.name(),
            type_schema.clone(),
        ));
        cache.insert(type_name.to_string(), Arc::clone(&mao));
        Ok(mao)
    }

    /// Follows the association `field` of `record` to the record it references.
    ///
    /// Returns `None` when the field is null or the referenced record no longer
    /// exists. Fails with `Hydration` if `field` is not an association.
    #[tracing::instrument(skip(self, record), fields(type_name = %record.type_name(), id = %record.id()))]
    pub async fn resolve(&self, record: &Metadata, field: &str) -> Result<Option<Metadata>> {
        let type_schema = self.get_mao(record.type_name())?.type_schema().clone();

        let target = match type_schema.definition(field).map(|d| d.kind()) {
            Some(FieldKind::Association { target }) => target.clone(),
            Some(kind) => {
                return Err(MetadataError::Hydration {
                    type_name: type_schema.name().to_string(),
                    field: field.to_string(),
                    reason: format!("{kind} field is not an association"),
                });
            }
            None => {
                return Err(MetadataError::Hydration {
                    type_name: type_schema.name().to_string(),
                    field: field.to_string(),
                    reason: "field is not declared".to_string(),
                });
            }
        };

        let id = match record.get(field) {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Association(id)) => id.clone(),
            Some(other) => {
                return Err(MetadataError::Hydration {
                    type_name: type_schema.name().to_string(),
                    field: field.to_string(),
                    reason: format!("{} value {other} is not a reference", other.type_name()),
                });
            }
        };

        let mao = self.get_mao(&target)?;
        let row = self
            .storage
            .find_first(self.schema.name(), &target, &Criteria::by_id(id))
            .await?;

        row.map(|row| self.hydrator.hydrate(mao.type_schema(), row))
            .transpose()
    }
}
