//! Typed record access for one type of a schema.

use std::sync::Arc;

use metadata_store::{Criteria, MetadataId, Storage, StorageExt, TypeSchema};

use crate::error::{MetadataError, Result};
use crate::hydrator::{DefaultHydrator, Hydrator};
use crate::record::Metadata;

/// Reads and writes records of a single type.
///
/// Obtained from [`MetadataAccessRegistry::get_mao`](crate::MetadataAccessRegistry::get_mao);
/// every access object of a registry shares its storage and hydrator.
pub struct MetadataAccessObject<S: Storage, H: Hydrator = DefaultHydrator> {
    storage: Arc<S>,
    hydrator: Arc<H>,
    schema_name: String,
    type_schema: TypeSchema,
}

impl<S: Storage, H: Hydrator> MetadataAccessObject<S, H> {
    /// Creates an access object for `type_schema` within schema `schema_name`.
    pub fn new(
        storage: Arc<S>,
        hydrator: Arc<H>,
        schema_name: impl Into<String>,
        type_schema: TypeSchema,
    ) -> Self {
        Self {
            storage,
            hydrator,
            schema_name: schema_name.into(),
            type_schema,
        }
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn type_schema(&self) -> &TypeSchema {
        &self.type_schema
    }

    fn type_name(&self) -> &str {
        self.type_schema.name()
    }

    /// Inserts the record, or updates it if its id is already stored.
    #[tracing::instrument(skip(self, record), fields(type_name = %self.type_name(), id = %record.id()))]
    pub async fn save(&self, record: &Metadata) -> Result<()> {
        let row = self.hydrator.dehydrate(&self.type_schema, record)?;
        self.storage
            .save(&self.schema_name, self.type_name(), record.id(), row)
            .await?;
        Ok(())
    }

    /// Returns the first record (lowest id) matching `criteria`.
    ///
    /// Fails with `RecordNotFound` when nothing matches.
    #[tracing::instrument(skip(self), fields(type_name = %self.type_name()))]
    pub async fn get_by(&self, criteria: &Criteria) -> Result<Metadata> {
        let row = self
            .storage
            .find_first(&self.schema_name, self.type_name(), criteria)
            .await?
            .ok_or_else(|| MetadataError::RecordNotFound {
                type_name: self.type_name().to_string(),
                criteria: criteria.to_string(),
            })?;

        self.hydrator.hydrate(&self.type_schema, row)
    }

    /// Returns the record with `id`.
    pub async fn get(&self, id: &MetadataId) -> Result<Metadata> {
        self.get_by(&Criteria::by_id(id.clone())).await
    }

    /// Returns every record matching `criteria`, ordered by id.
    #[tracing::instrument(skip(self), fields(type_name = %self.type_name()))]
    pub async fn find_by(&self, criteria: &Criteria) -> Result<Vec<Metadata>> {
        self.storage
            .find_by(&self.schema_name, self.type_name(), criteria)
            .await?
            .into_iter()
            .map(|row| self.hydrator.hydrate(&self.type_schema, row))
            .collect()
    }

    pub async fn has(&self, id: &MetadataId) -> Result<bool> {
        Ok(self
            .storage
            .has(&self.schema_name, self.type_name(), id)
            .await?)
    }

    /// Deletes the record with `id`. Deleting an absent record is a no-op.
    #[tracing::instrument(skip(self), fields(type_name = %self.type_name()))]
    pub async fn delete(&self, id: &MetadataId) -> Result<()> {
        self.storage
            .delete(&self.schema_name, self.type_name(), id)
            .await?;
        Ok(())
    }
}

impl<S: Storage, H: Hydrator> std::fmt::Debug for MetadataAccessObject<S, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataAccessObject")
            .field("schema_name", &self.schema_name)
            .field("type_name", &self.type_name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use metadata_store::{FieldDefinition, InMemoryStorage, Schema};
    use rust_decimal::Decimal;

    use super::*;
    use crate::Value;

    async fn product_mao() -> MetadataAccessObject<InMemoryStorage> {
        let product = TypeSchema::new(
            "product",
            [
                ("sku", FieldDefinition::text().required().build().unwrap()),
                (
                    "price",
                    FieldDefinition::decimal()
                        .with_default(Decimal::ZERO)
                        .with_precision(10, 2)
                        .build()
                        .unwrap(),
                ),
            ],
        )
        .unwrap();
        let schema = Schema::builder("catalog").add_type(product.clone()).build().unwrap();

        let storage = InMemoryStorage::new();
        storage.create_schema(&schema).await.unwrap();

        MetadataAccessObject::new(
            Arc::new(storage),
            Arc::new(DefaultHydrator),
            "catalog",
            product,
        )
    }

    #[tokio::test]
    async fn save_then_get_fills_defaults() {
        let mao = product_mao().await;
        mao.save(&Metadata::new("product", "p1").with("sku", "SKU1"))
            .await
            .unwrap();

        let record = mao.get_by(&Criteria::by_id("p1")).await.unwrap();
        assert_eq!(record.get("sku"), Some(&Value::from("SKU1")));
        assert_eq!(record.get("price"), Some(&Value::Decimal(Decimal::new(0, 2))));
    }

    #[tokio::test]
    async fn get_by_without_match_is_record_not_found() {
        let mao = product_mao().await;
        let err = mao.get(&MetadataId::new("nope")).await.unwrap_err();
        assert!(matches!(err, MetadataError::RecordNotFound { ref type_name, .. } if type_name == "product"));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn find_by_returns_matches_in_id_order() {
        let mao = product_mao().await;
        for id in ["b", "a", "c"] {
            let sku = if id == "c" { "OTHER" } else { "SKU1" };
            mao.save(&Metadata::new("product", id).with("sku", sku))
                .await
                .unwrap();
        }

        let found = mao
            .find_by(&Criteria::new().equals("sku", "SKU1"))
            .await
            .unwrap();
        let ids: Vec<&str> = found.iter().map(|r| r.id().as_str()).collect();
        assert_eq!(ids, ["a", "b"]);

        assert!(mao
            .find_by(&Criteria::new().equals("sku", "NONE"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn invalid_records_are_not_stored() {
        let mao = product_mao().await;
        let err = mao
            .save(&Metadata::new("product", "p1"))
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::Hydration { .. }));
        assert!(!mao.has(&MetadataId::new("p1")).await.unwrap());
    }

    #[tokio::test]
    async fn has_and_delete() {
        let mao = product_mao().await;
        let record = Metadata::generate("product").with("sku", "X");
        mao.save(&record).await.unwrap();
        assert!(mao.has(record.id()).await.unwrap());

        mao.delete(record.id()).await.unwrap();
        assert!(!mao.has(record.id()).await.unwrap());
        mao.delete(record.id()).await.unwrap();
    }
}
