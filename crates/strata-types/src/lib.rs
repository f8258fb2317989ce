//! Foundation types for the Strata object store.
//!
//! This crate provides the identifier and field-shape types shared by every
//! other Strata crate.
//!
//! # Key Types
//!
//! - [`Rid`] -- Dense `(page, offset)` resource identifier into the slot arena
//! - [`ExternalId`] -- UUID naming a resource from outside the process
//! - [`FieldKind`] -- Shape of a resource field (value, sub-object, set, stream)
//! - [`StreamHandle`] -- Opaque handle to an externally owned blob
//! - [`SetControl`] -- Inline control block of a sub-object-set field

pub mod error;
pub mod external;
pub mod field;
pub mod rid;

pub use error::TypeError;
pub use external::ExternalId;
pub use field::{FieldKind, SetControl, StreamHandle};
pub use rid::{Rid, PAGE_SIZE};
