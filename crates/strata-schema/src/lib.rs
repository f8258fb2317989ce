//! Resource type registry for the Strata object store.
//!
//! A resource type is an ordered list of fields. Each field is a plain
//! value, a single owned sub-object, an owned sub-object set, or a stream
//! handle. The registry turns a [`ResourceTypeSchema`] into a
//! [`ResourceType`] with a packed byte layout the repository allocates
//! snapshots from.
//!
//! Value fields are described by a [`ValueType`] handler supplied by the
//! embedding application. The repository never interprets a value beyond the
//! handler's size, alignment, copy, move, and destruct operations.
//!
//! # Modules
//!
//! - [`error`] -- [`SchemaError`] for registration failures
//! - [`tag`] -- [`TypeTag`] numeric type identifiers
//! - [`value`] -- the [`ValueType`] handler contract and [`PodType`]
//! - [`resource_type`] -- schemas, field descriptors, and layout
//! - [`registry`] -- the [`TypeRegistry`]

pub mod error;
pub mod registry;
pub mod resource_type;
pub mod tag;
pub mod value;

pub use error::{SchemaError, SchemaResult};
pub use registry::TypeRegistry;
pub use resource_type::{FieldSchema, ResourceField, ResourceType, ResourceTypeSchema};
pub use tag::TypeTag;
pub use value::{PodType, ValueType, MAX_ALIGNMENT};
