//! Read access to a resource's fields.
//!
//! [`FieldReader`] carries every field accessor. It is implemented by
//! [`ReadHandle`], pinned to one published snapshot, and by
//! [`WriteHandle`](crate::WriteHandle), which reads its own pending state.
//! Absent fields resolve through the prototype chain.

use std::sync::Arc;

use bytemuck::Pod;
use strata_schema::{ResourceType, ValueType};
use strata_types::{FieldKind, Rid, StreamHandle};

use crate::error::{RepoError, RepoResult};
use crate::field::{lookup, mismatch, FieldValue};
use crate::repository::Repository;
use crate::set::visible_members;
use crate::snapshot::ResourceData;

/// Field accessors shared by read and write handles.
pub trait FieldReader {
    fn repository(&self) -> &Repository;

    fn rid(&self) -> Rid;

    fn resource_type(&self) -> &Arc<ResourceType>;

    /// The snapshot local reads come from; `None` before the first commit.
    fn snapshot(&self) -> Option<&ResourceData>;

    // ---------------------------------------------------------------
    // Field metadata
    // ---------------------------------------------------------------

    /// Number of fields of the resource type.
    fn value_count(&self) -> usize {
        self.resource_type().field_count()
    }

    fn field_index(&self, name: &str) -> Option<u32> {
        self.resource_type().field_index(name)
    }

    fn field_name(&self, index: u32) -> Option<&str> {
        self.resource_type().field(index).map(|f| f.name.as_str())
    }

    fn field_kind(&self, index: u32) -> Option<FieldKind> {
        self.resource_type().field(index).map(|f| f.kind)
    }

    fn field_value_type(&self, index: u32) -> Option<&Arc<dyn ValueType>> {
        self.resource_type().field(index).map(|f| &f.value_type)
    }

    // ---------------------------------------------------------------
    // Values
    // ---------------------------------------------------------------

    /// The bytes of field `index`, local or inherited.
    ///
    /// Returns `Ok(None)` when neither the resource nor any prototype
    /// holds the field. Set fields have no single value and are rejected.
    fn get_value(&self, index: u32) -> RepoResult<Option<FieldValue<'_>>> {
        let rid = self.rid();
        let field = lookup(rid, self.resource_type(), index, None)?;
        if field.kind == FieldKind::SubObjectSet {
            return Err(mismatch(rid, self.resource_type(), field, FieldKind::Value));
        }
        if let Some(bytes) = self.snapshot().and_then(|s| s.field_bytes(field)) {
            return Ok(Some(FieldValue::Local(bytes)));
        }
        let range = field.range();
        let inherited = self.repository().find_in_prototypes(rid, |snapshot| {
            snapshot
                .is_present(index)
                .then(|| Arc::clone(snapshot))
        })?;
        Ok(inherited.map(|snapshot| FieldValue::Inherited { snapshot, range }))
    }

    /// Returns `true` if field `index` resolves to a value, locally or
    /// through a prototype.
    fn has(&self, index: u32) -> RepoResult<bool> {
        Ok(self.get_value(index)?.is_some())
    }

    /// Field `index` read as a plain-old-data value.
    fn get<T: Pod>(&self, index: u32) -> RepoResult<Option<T>> {
        let Some(value) = self.get_value(index)? else {
            return Ok(None);
        };
        if value.len() != std::mem::size_of::<T>() {
            return Err(RepoError::ValueSizeMismatch {
                rid: self.rid(),
                index,
                expected: value.len(),
                actual: std::mem::size_of::<T>(),
            });
        }
        Ok(Some(bytemuck::pod_read_unaligned(&value)))
    }

    /// The child held by sub-object field `index`.
    fn sub_object(&self, index: u32) -> RepoResult<Option<Rid>> {
        lookup(self.rid(), self.resource_type(), index, Some(FieldKind::SubObject))?;
        Ok(self
            .get_value(index)?
            .map(|value| bytemuck::pod_read_unaligned::<Rid>(&value))
            .filter(|child| !child.is_null()))
    }

    /// The blob handle held by stream field `index`.
    fn stream(&self, index: u32) -> RepoResult<Option<StreamHandle>> {
        lookup(self.rid(), self.resource_type(), index, Some(FieldKind::Stream))?;
        Ok(self
            .get_value(index)?
            .map(|value| bytemuck::pod_read_unaligned::<StreamHandle>(&value)))
    }

    // ---------------------------------------------------------------
    // Sub-object sets
    // ---------------------------------------------------------------

    /// Visible members of set field `index`: inherited members first,
    /// root-most prototype first, minus removals, then local members.
    fn sub_object_set(&self, index: u32) -> RepoResult<Vec<Rid>> {
        lookup(self.rid(), self.resource_type(), index, Some(FieldKind::SubObjectSet))?;
        let chain = self.repository().prototype_snapshots(self.rid())?;
        let mut levels = Vec::with_capacity(chain.len() + 1);
        levels.push(self.snapshot().and_then(|s| s.set(index)));
        levels.extend(chain.iter().map(|s| s.set(index)));
        Ok(visible_members(&levels))
    }

    fn sub_object_set_count(&self, index: u32) -> RepoResult<usize> {
        Ok(self.sub_object_set(index)?.len())
    }

    /// Inherited members hidden by this resource's own level.
    fn prototype_removed(&self, index: u32) -> RepoResult<Vec<Rid>> {
        lookup(self.rid(), self.resource_type(), index, Some(FieldKind::SubObjectSet))?;
        Ok(self
            .snapshot()
            .and_then(|s| s.set(index))
            .map(|set| set.prototype_removed().collect())
            .unwrap_or_default())
    }

    fn prototype_removed_count(&self, index: u32) -> RepoResult<usize> {
        lookup(self.rid(), self.resource_type(), index, Some(FieldKind::SubObjectSet))?;
        Ok(self
            .snapshot()
            .and_then(|s| s.set(index))
            .map_or(0, |set| set.prototype_removed_count()))
    }
}

/// A read-only view pinned to the snapshot current when it was opened.
///
/// Commits made after the handle was opened are not visible through it.
/// Values inherited from prototypes are resolved at access time.
pub struct ReadHandle<'r> {
    repo: &'r Repository,
    rid: Rid,
    resource_type: Arc<ResourceType>,
    data: Option<Arc<ResourceData>>,
}

impl<'r> ReadHandle<'r> {
    pub(crate) fn new(
        repo: &'r Repository,
        rid: Rid,
        resource_type: Arc<ResourceType>,
        data: Option<Arc<ResourceData>>,
    ) -> Self {
        Self {
            repo,
            rid,
            resource_type,
            data,
        }
    }

    /// Returns `true` if the handle sees a committed snapshot.
    pub fn is_populated(&self) -> bool {
        self.data.is_some()
    }

    /// The pinned snapshot.
    pub fn data(&self) -> Option<&Arc<ResourceData>> {
        self.data.as_ref()
    }
}

impl FieldReader for ReadHandle<'_> {
    fn repository(&self) -> &Repository {
        self.repo
    }

    fn rid(&self) -> Rid {
        self.rid
    }

    fn resource_type(&self) -> &Arc<ResourceType> {
        &self.resource_type
    }

    fn snapshot(&self) -> Option<&ResourceData> {
        self.data.as_deref()
    }
}

impl std::fmt::Debug for ReadHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadHandle")
            .field("rid", &self.rid)
            .field("type", &self.resource_type.name())
            .field("data", &self.data)
            .finish()
    }
}
