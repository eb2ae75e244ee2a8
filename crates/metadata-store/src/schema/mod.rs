//! Runtime-declared record shapes.
//!
//! A [`Schema`] groups [`TypeSchema`]s that are migrated together; each type
//! schema is an ordered set of [`FieldDefinition`]s.

mod field;
mod type_schema;

pub use field::{
    FieldDefinition, FieldDefinitionBuilder, FieldKind, MAX_LENGTH, MAX_PRECISION, OPTION_LENGTH,
    OPTION_PRECISION, OPTION_SCALE,
};
pub use type_schema::TypeSchema;

use crate::error::{MetadataStoreError, Result};

/// A named group of type schemas, the unit of migration.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    name: String,
    types: Vec<TypeSchema>,
}

impl Schema {
    /// Creates a schema, rejecting duplicate type names and associations
    /// pointing outside the schema.
    ///
    /// Schema names may not contain underscores so that every structure name
    /// maps back to exactly one schema and type.
    pub fn new(name: impl Into<String>, types: Vec<TypeSchema>) -> Result<Self> {
        let name = name.into();
        validate_identifier("schema", &name)?;
        // the first underscore after the prefix separates schema and type in structure names
        if name.contains('_') {
            return Err(MetadataStoreError::invalid(format!(
                "schema name \"{name}\" must not contain underscores"
            )));
        }

        for (index, ty) in types.iter().enumerate() {
            if types[..index]
                .iter()
                .any(|other| other.name().eq_ignore_ascii_case(ty.name()))
            {
                return Err(MetadataStoreError::invalid(format!(
                    "schema \"{name}\" declares type \"{}\" twice",
                    ty.name()
                )));
            }
        }

        for ty in &types {
            for (field, definition) in ty.definitions() {
                if let FieldKind::Association { target } = definition.kind()
                    && !types.iter().any(|t| t.name() == target)
                {
                    return Err(MetadataStoreError::invalid(format!(
                        "field \"{}.{field}\" in schema \"{name}\" references unknown type \"{target}\"",
                        ty.name()
                    )));
                }
            }
        }

        Ok(Self { name, types })
    }

    /// Creates a builder for a schema named `name`.
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type schemas in declaration order.
    pub fn types(&self) -> &[TypeSchema] {
        &self.types
    }

    /// Looks up a type by its exact name.
    pub fn get_type(&self, type_name: &str) -> Option<&TypeSchema> {
        self.types.iter().find(|t| t.name() == type_name)
    }
}

/// Collects type schemas and produces a validated [`Schema`].
///
/// The builder can be kept around and built repeatedly, e.g. once for
/// `create_schema` and again later for `drop_schema`.
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    name: String,
    types: Vec<TypeSchema>,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            types: Vec::new(),
        }
    }

    pub fn add_type(mut self, type_schema: TypeSchema) -> Self {
        self.types.push(type_schema);
        self
    }

    pub fn build(&self) -> Result<Schema> {
        Schema::new(self.name.clone(), self.types.clone())
    }
}

/// Checks that `name` can be used verbatim in a structure or column name.
pub(crate) fn validate_identifier(what: &str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(MetadataStoreError::invalid(format!(
            "{what} name \"{name}\" must start with a letter or underscore and contain only letters, digits and underscores"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product() -> TypeSchema {
        TypeSchema::new(
            "product",
            [("sku", FieldDefinition::text().required().build().unwrap())],
        )
        .unwrap()
    }

    #[test]
    fn builds_schema_with_types() {
        let schema = Schema::builder("catalog").add_type(product()).build().unwrap();
        assert_eq!(schema.name(), "catalog");
        assert_eq!(schema.types().len(), 1);
        assert!(schema.get_type("product").is_some());
        assert!(schema.get_type("category").is_none());
    }

    #[test]
    fn duplicate_type_names_are_rejected() {
        let result = Schema::builder("catalog")
            .add_type(product())
            .add_type(product())
            .build();
        assert!(matches!(
            result,
            Err(MetadataStoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn association_must_target_declared_type() {
        let item = TypeSchema::new(
            "item",
            [(
                "product",
                FieldDefinition::association("product").build().unwrap(),
            )],
        )
        .unwrap();

        let err = Schema::builder("catalog").add_type(item.clone()).build().unwrap_err();
        assert!(err.to_string().contains("product"));

        let schema = Schema::builder("catalog")
            .add_type(item)
            .add_type(product())
            .build();
        assert!(schema.is_ok());
    }

    #[test]
    fn schema_names_cannot_contain_underscores() {
        let result = Schema::builder("shop_eu").add_type(product()).build();
        assert!(matches!(
            result,
            Err(MetadataStoreError::InvalidArgument(_))
        ));
        assert!(Schema::builder("_shop").add_type(product()).build().is_err());
        assert!(Schema::builder("shopEu2").add_type(product()).build().is_ok());
    }

    #[test]
    fn builder_can_build_repeatedly() {
        let builder = Schema::builder("catalog").add_type(product());
        assert_eq!(builder.build().unwrap(), builder.build().unwrap());
    }

    #[test]
    fn identifier_validation() {
        assert!(validate_identifier("field", "unit_price").is_ok());
        assert!(validate_identifier("field", "_hidden").is_ok());
        assert!(validate_identifier("field", "").is_err());
        assert!(validate_identifier("field", "price-eur").is_err());
        assert!(validate_identifier("field", "9lives").is_err());
    }
}
