//! Versioned, prototype-based in-memory object store.
//!
//! A [`Repository`] hands out [`Rid`]s for resources laid out by registered
//! resource types. Each resource holds an immutable published snapshot of
//! its fields; readers pin a snapshot with one atomic load, writers build a
//! private copy and publish it with one compare-and-swap.
//!
//! # Key Types
//!
//! - [`Repository`] -- The store: creation, transactions, ids, reclamation
//! - [`ReadHandle`] -- Snapshot-isolated read view of one resource
//! - [`WriteHandle`] -- Copy-on-write transaction on one resource
//! - [`FieldReader`] -- Field accessors shared by both handles
//! - [`RepositoryConfig`] -- Capacity and chain limits
//! - [`CollectReport`] -- What a garbage-collection pass reclaimed
//!
//! # Example
//!
//! ```
//! use strata_repo::{FieldReader, Repository, RepositoryConfig};
//! use strata_schema::ResourceTypeSchema;
//!
//! let repo = Repository::new(RepositoryConfig::compact()).unwrap();
//! let entity = repo
//!     .create_resource_type(&ResourceTypeSchema::new("Entity").value("Health", 0, "u32"))
//!     .unwrap();
//!
//! let rid = repo.create_resource(entity).unwrap();
//! let mut write = repo.write(rid).unwrap();
//! write.set(0, &100u32).unwrap();
//! assert_eq!(write.commit().unwrap(), 1);
//!
//! let read = repo.read(rid).unwrap();
//! assert_eq!(read.get::<u32>(0).unwrap(), Some(100));
//! ```

pub mod config;
pub mod error;
pub mod field;
mod page;
pub mod read;
pub mod reclaim;
pub mod repository;
pub mod set;
pub mod snapshot;
pub mod storage;
pub mod write;

pub use config::RepositoryConfig;
pub use error::{RepoError, RepoResult};
pub use field::FieldValue;
pub use read::{FieldReader, ReadHandle};
pub use reclaim::CollectReport;
pub use repository::Repository;
pub use set::SubObjectSetData;
pub use snapshot::ResourceData;
pub use storage::{Owner, ResourceState};
pub use write::WriteHandle;

pub use strata_types::{ExternalId, FieldKind, Rid, StreamHandle};
