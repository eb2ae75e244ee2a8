//! Typed access to runtime-declared metadata.
//!
//! This crate sits on top of `metadata-store` and provides:
//! - `Metadata` records holding typed `Value`s
//! - the `Hydrator` trait and `DefaultHydrator` mapping rows to records
//! - `MetadataAccessObject` for reading and writing one type
//! - `MetadataAccessRegistry` handing out access objects for a schema

pub mod access;
pub mod error;
pub mod hydrator;
pub mod record;
pub mod registry;

pub use access::MetadataAccessObject;
pub use error::{MetadataError, Result};
pub use hydrator::{DefaultHydrator, Hydrator};
pub use record::{Metadata, Value};
pub use registry::MetadataAccessRegistry;
