//! Integration tests for typed record access.
//!
//! The same suite runs against the in-memory storage and against PostgreSQL.
//! The PostgreSQL variant needs Docker and is ignored by default:
//!
//! ```bash
//! cargo test -p metadata --test metadata_integration -- --include-ignored
//! ```

use std::sync::Arc;

use metadata::{Metadata, MetadataAccessRegistry, MetadataError, Value};
use metadata_store::{
    Criteria, FieldDefinition, InMemoryStorage, MetadataId, MetadataStoreError, PostgresConfig,
    PostgresStorage, Schema, SchemaChange, Storage, TypeSchema,
};
use rust_decimal::Decimal;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn memory_storage() -> InMemoryStorage {
    init_tracing();
    InMemoryStorage::new()
}

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn postgres_storage() -> PostgresStorage {
    init_tracing();

    let info = CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            Arc::new(ContainerInfo {
                container,
                connection_string: format!("postgres://postgres:postgres@{host}:{port}/postgres"),
            })
        })
        .await
        .clone();

    let config = PostgresConfig {
        database_url: info.connection_string.clone(),
        ..PostgresConfig::default()
    };
    PostgresStorage::new(config.connect().await.unwrap())
}

/// "catalog" schema with a single "product" type.
fn catalog() -> Schema {
    let product = TypeSchema::new(
        "product",
        [
            ("sku", FieldDefinition::text().required().build().unwrap()),
            (
                "price",
                FieldDefinition::decimal()
                    .with_default(Decimal::new(0, 1))
                    .with_precision(10, 2)
                    .build()
                    .unwrap(),
            ),
        ],
    )
    .unwrap();
    Schema::builder("catalog").add_type(product).build().unwrap()
}

/// "shop" schema exercising every field kind.
fn shop(extra_product_fields: Vec<(&str, FieldDefinition)>) -> Schema {
    let category = TypeSchema::new(
        "category",
        [("name", FieldDefinition::text().required().with_length(64).build().unwrap())],
    )
    .unwrap();

    let mut fields = vec![
        ("sku", FieldDefinition::text().required().build().unwrap()),
        (
            "price",
            FieldDefinition::decimal()
                .with_default(Decimal::ZERO)
                .with_precision(10, 2)
                .build()
                .unwrap(),
        ),
        ("stock", FieldDefinition::integer().build().unwrap()),
        ("active", FieldDefinition::boolean().with_default(true).build().unwrap()),
        ("category", FieldDefinition::association("category").build().unwrap()),
    ];
    fields.extend(extra_product_fields);
    let product = TypeSchema::new("product", fields).unwrap();

    Schema::builder("shop")
        .add_type(category)
        .add_type(product)
        .build()
        .unwrap()
}

/// Builds a registry over a clean copy of `schema`.
async fn fresh_registry<S: Storage>(storage: S, schema: Schema) -> MetadataAccessRegistry<S> {
    let registry = MetadataAccessRegistry::with_default_hydrator(storage, schema);
    registry.drop_schema().await.unwrap();
    registry.create_schema().await.unwrap();
    registry
}

macro_rules! metadata_suite {
    ($suite:ident, $storage:path $(, #[$attr:meta])*) => {
        mod $suite {
            use super::*;

            #[tokio::test]
            $(#[$attr])*
            async fn create_twice_fails_with_already_exists() {
                let registry = fresh_registry($storage().await, catalog()).await;

                let err = registry.create_schema().await.unwrap_err();
                assert!(matches!(
                    err,
                    MetadataError::Storage(MetadataStoreError::AlreadyExists { ref structure })
                        if structure == "metadata_catalog_product"
                ));
            }

            #[tokio::test]
            $(#[$attr])*
            async fn saved_record_reads_back_with_defaults() {
                let registry = fresh_registry($storage().await, catalog()).await;
                let products = registry.get_mao("product").unwrap();

                products
                    .save(&Metadata::new("product", "p1").with("sku", "SKU1"))
                    .await
                    .unwrap();

                let record = products.get_by(&Criteria::by_id("p1")).await.unwrap();
                assert_eq!(record.id().as_str(), "p1");
                assert_eq!(record.get("sku"), Some(&Value::from("SKU1")));
                assert_eq!(record.get("price"), Some(&Value::Decimal(Decimal::new(0, 1))));
                assert_eq!(record.len(), 2);
            }

            #[tokio::test]
            $(#[$attr])*
            async fn find_by_returns_every_match() {
                let registry = fresh_registry($storage().await, catalog()).await;
                let products = registry.get_mao("product").unwrap();

                for id in ["p1", "p2"] {
                    products
                        .save(&Metadata::new("product", id).with("sku", "SKU1"))
                        .await
                        .unwrap();
                }
                products
                    .save(&Metadata::new("product", "p3").with("sku", "SKU2"))
                    .await
                    .unwrap();

                let found = products
                    .find_by(&Criteria::new().equals("sku", "SKU1"))
                    .await
                    .unwrap();
                let ids: Vec<&str> = found.iter().map(|r| r.id().as_str()).collect();
                assert_eq!(ids, ["p1", "p2"]);
            }

            #[tokio::test]
            $(#[$attr])*
            async fn alter_twice_applies_nothing_the_second_time() {
                let registry = fresh_registry($storage().await, catalog()).await;
                assert!(registry.alter_schema().await.unwrap().is_empty());

                let extended = MetadataAccessRegistry::with_default_hydrator(
                    registry.storage().clone(),
                    shop(vec![]),
                );
                extended.drop_schema().await.unwrap();

                let first = extended.alter_schema().await.unwrap();
                assert_eq!(first.len(), 2);
                assert!(first.iter().all(|c| matches!(c, SchemaChange::CreateTable(_))));
                assert!(extended.alter_schema().await.unwrap().is_empty());
            }

            #[tokio::test]
            $(#[$attr])*
            async fn alter_adds_columns_existing_records_read_defaults() {
                let registry = fresh_registry($storage().await, shop(vec![])).await;
                registry
                    .get_mao("product")
                    .unwrap()
                    .save(&Metadata::new("product", "p1").with("sku", "SKU1"))
                    .await
                    .unwrap();

                let evolved = MetadataAccessRegistry::with_default_hydrator(
                    registry.storage().clone(),
                    shop(vec![(
                        "brand",
                        FieldDefinition::text().with_default("generic").build().unwrap(),
                    )]),
                );
                let changes = evolved.alter_schema().await.unwrap();
                assert!(matches!(
                    &changes[..],
                    [SchemaChange::AddColumn { column, .. }] if column.name == "brand"
                ));

                let record = evolved
                    .get_mao("product")
                    .unwrap()
                    .get(&MetadataId::new("p1"))
                    .await
                    .unwrap();
                assert_eq!(record.get("brand"), Some(&Value::from("generic")));
            }

            #[tokio::test]
            $(#[$attr])*
            async fn full_record_round_trips() {
                let registry = fresh_registry($storage().await, shop(vec![])).await;
                registry
                    .get_mao("category")
                    .unwrap()
                    .save(&Metadata::new("category", "c1").with("name", "Tools"))
                    .await
                    .unwrap();

                let products = registry.get_mao("product").unwrap();
                let record = Metadata::new("product", MetadataId::generate())
                    .with("sku", "HAMMER")
                    .with("price", Decimal::new(1999, 2))
                    .with("stock", 7i64)
                    .with("active", false)
                    .with("category", MetadataId::new("c1"));
                products.save(&record).await.unwrap();

                let stored = products.get(record.id()).await.unwrap();
                assert_eq!(stored, record);

                let category = registry.resolve(&stored, "category").await.unwrap().unwrap();
                assert_eq!(category.get("name"), Some(&Value::from("Tools")));
            }

            #[tokio::test]
            $(#[$attr])*
            async fn save_updates_existing_record() {
                let registry = fresh_registry($storage().await, shop(vec![])).await;
                let products = registry.get_mao("product").unwrap();

                let mut record = Metadata::new("product", "p1")
                    .with("sku", "A")
                    .with("stock", 1i64);
                products.save(&record).await.unwrap();

                record.set("stock", 2i64);
                record.set("active", Value::Null);
                products.save(&record).await.unwrap();

                let all = products.find_by(&Criteria::new()).await.unwrap();
                assert_eq!(all.len(), 1);
                assert_eq!(all[0].get("stock"), Some(&Value::Integer(2)));
                assert_eq!(all[0].get("active"), Some(&Value::Null));
            }

            #[tokio::test]
            $(#[$attr])*
            async fn missing_records_and_types_are_reported() {
                let registry = fresh_registry($storage().await, shop(vec![])).await;

                let err = registry
                    .get_mao("product")
                    .unwrap()
                    .get(&MetadataId::new("nope"))
                    .await
                    .unwrap_err();
                assert!(matches!(err, MetadataError::RecordNotFound { .. }));

                let err = registry.get_mao("order").unwrap_err();
                assert!(matches!(err, MetadataError::TypeNotFound { .. }));
            }

            #[tokio::test]
            $(#[$attr])*
            async fn invalid_records_never_reach_storage() {
                let registry = fresh_registry($storage().await, shop(vec![])).await;
                let products = registry.get_mao("product").unwrap();

                let err = products
                    .save(&Metadata::new("product", "p1").with("price", Decimal::ONE))
                    .await
                    .unwrap_err();
                assert!(matches!(err, MetadataError::Hydration { ref field, .. } if field == "sku"));
                assert!(!products.has(&MetadataId::new("p1")).await.unwrap());
            }

            #[tokio::test]
            $(#[$attr])*
            async fn mistyped_criteria_are_rejected() {
                let registry = fresh_registry($storage().await, catalog()).await;
                let products = registry.get_mao("product").unwrap();
                products
                    .save(&Metadata::new("product", "p1").with("sku", "SKU1"))
                    .await
                    .unwrap();

                let err = products
                    .find_by(&Criteria::new().equals("price", "cheap"))
                    .await
                    .unwrap_err();
                assert!(matches!(
                    err,
                    MetadataError::Storage(MetadataStoreError::InvalidValue { ref structure, .. })
                        if structure == "metadata_catalog_product"
                ));
            }

            #[tokio::test]
            $(#[$attr])*
            async fn required_column_cannot_be_added_over_existing_records() {
                let registry = fresh_registry($storage().await, catalog()).await;
                registry
                    .get_mao("product")
                    .unwrap()
                    .save(&Metadata::new("product", "p1").with("sku", "SKU1"))
                    .await
                    .unwrap();

                let product = TypeSchema::new(
                    "product",
                    [
                        ("sku", FieldDefinition::text().required().build().unwrap()),
                        (
                            "price",
                            FieldDefinition::decimal()
                                .with_default(Decimal::new(0, 1))
                                .with_precision(10, 2)
                                .build()
                                .unwrap(),
                        ),
                        ("brand", FieldDefinition::text().required().build().unwrap()),
                    ],
                )
                .unwrap();
                let evolved = MetadataAccessRegistry::with_default_hydrator(
                    registry.storage().clone(),
                    Schema::builder("catalog").add_type(product).build().unwrap(),
                );

                let err = evolved.alter_schema().await.unwrap_err();
                assert!(matches!(
                    err,
                    MetadataError::Storage(MetadataStoreError::InvalidValue { .. })
                ));
                assert!(registry.alter_schema().await.unwrap().is_empty());
            }

            #[tokio::test]
            $(#[$attr])*
            async fn delete_removes_record() {
                let registry = fresh_registry($storage().await, shop(vec![])).await;
                let products = registry.get_mao("product").unwrap();
                let record = Metadata::generate("product").with("sku", "X");

                products.save(&record).await.unwrap();
                assert!(products.has(record.id()).await.unwrap());

                products.delete(record.id()).await.unwrap();
                assert!(!products.has(record.id()).await.unwrap());
            }

            #[tokio::test]
            $(#[$attr])*
            async fn dropped_schema_reports_missing_structures() {
                let registry = fresh_registry($storage().await, catalog()).await;
                registry.drop_schema().await.unwrap();

                let err = registry
                    .get_mao("product")
                    .unwrap()
                    .find_by(&Criteria::new())
                    .await
                    .unwrap_err();
                assert!(matches!(
                    err,
                    MetadataError::Storage(MetadataStoreError::StructureNotFound { .. })
                ));
            }
        }
    };
}

metadata_suite!(in_memory, memory_storage);
metadata_suite!(
    postgres,
    postgres_storage,
    #[ignore = "requires Docker"],
    #[serial_test::serial]
);
