//! Copy-on-write transactions.
//!
//! A [`WriteHandle`] owns a private snapshot copied forward from the one
//! that was current when the handle was opened. Nothing it does is visible
//! until [`commit`](WriteHandle::commit) publishes the snapshot with a
//! single compare-and-swap. Parent-link changes made by the transaction are
//! recorded and applied only when the commit succeeds.

use std::sync::Arc;

use bytemuck::Pod;
use strata_schema::{ResourceField, ResourceType};
use strata_types::{FieldKind, Rid, StreamHandle};
use tracing::{debug, warn};

use crate::error::{RepoError, RepoResult};
use crate::field::{lookup, mismatch};
use crate::read::FieldReader;
use crate::repository::Repository;
use crate::snapshot::ResourceData;
use crate::storage::Owner;

/// A parent-link change applied to a child on commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LinkChange {
    Attach { child: Rid, owner: Owner },
    /// Clears the child's owner only if it is still `owner`.
    Detach { child: Rid, owner: Owner },
}

/// A pending write transaction on one resource.
///
/// Dropping the handle without committing discards the pending snapshot.
pub struct WriteHandle<'r> {
    repo: &'r Repository,
    rid: Rid,
    resource_type: Arc<ResourceType>,
    data: ResourceData,
    replaces: Option<Arc<ResourceData>>,
    links: Vec<LinkChange>,
}

impl<'r> WriteHandle<'r> {
    pub(crate) fn new(
        repo: &'r Repository,
        rid: Rid,
        resource_type: Arc<ResourceType>,
        replaces: Option<Arc<ResourceData>>,
    ) -> Self {
        let data = match &replaces {
            Some(current) => current.copy_forward(),
            None => ResourceData::blank(rid, Arc::clone(&resource_type)),
        };
        Self {
            repo,
            rid,
            resource_type,
            data,
            replaces,
            links: Vec::new(),
        }
    }

    /// The snapshot this transaction will replace.
    pub fn base(&self) -> Option<&Arc<ResourceData>> {
        self.replaces.as_ref()
    }

    fn field(&self, index: u32, kind: FieldKind) -> RepoResult<ResourceField> {
        lookup(self.rid, &self.resource_type, index, Some(kind)).cloned()
    }

    fn owner(&self, field: u32) -> Owner {
        Owner {
            rid: self.rid,
            field,
        }
    }

    // ---------------------------------------------------------------
    // Values
    // ---------------------------------------------------------------

    /// Copy `bytes` into value field `index` through its handler.
    pub fn set_value(&mut self, index: u32, bytes: &[u8]) -> RepoResult<()> {
        let field = self.field(index, FieldKind::Value)?;
        let expected = field.value_type.size();
        if bytes.len() != expected {
            return Err(RepoError::ValueSizeMismatch {
                rid: self.rid,
                index,
                expected,
                actual: bytes.len(),
            });
        }
        self.data.set_bytes(&field, bytes);
        Ok(())
    }

    pub fn set<T: Pod>(&mut self, index: u32, value: &T) -> RepoResult<()> {
        self.set_value(index, bytemuck::bytes_of(value))
    }

    /// Drop the local value of field `index` so reads fall back to the
    /// prototype. A cleared sub-object field releases its child.
    pub fn clear_value(&mut self, index: u32) -> RepoResult<()> {
        let field = lookup(self.rid, &self.resource_type, index, None)?.clone();
        match field.kind {
            FieldKind::SubObjectSet => {
                return Err(mismatch(self.rid, &self.resource_type, &field, FieldKind::Value))
            }
            FieldKind::SubObject => self.release_sub_object(&field),
            FieldKind::Value | FieldKind::Stream => {}
        }
        self.data.clear_field(&field);
        Ok(())
    }

    pub fn set_stream(&mut self, index: u32, handle: StreamHandle) -> RepoResult<()> {
        let field = self.field(index, FieldKind::Stream)?;
        self.data.set_bytes(&field, bytemuck::bytes_of(&handle));
        Ok(())
    }

    /// Drop every local field, releasing owned children.
    pub fn clear_fields(&mut self) {
        let fields = self.resource_type.fields().to_vec();
        for field in &fields {
            match field.kind {
                FieldKind::SubObject => self.release_sub_object(field),
                FieldKind::SubObjectSet => {
                    if let Some(mut set) = self.data.take_set(field) {
                        for child in set.drain_members() {
                            let owner = self.owner(field.index);
                            self.links.push(LinkChange::Detach { child, owner });
                        }
                    }
                }
                FieldKind::Value | FieldKind::Stream => {}
            }
            self.data.clear_field(field);
        }
    }

    // ---------------------------------------------------------------
    // Sub-objects
    // ---------------------------------------------------------------

    /// Make `child` the sub-object held by field `index`.
    ///
    /// The child's parent link moves to this resource on commit. A null
    /// `child` stores an explicit "no sub-object" that masks the prototype.
    pub fn set_sub_object(&mut self, index: u32, child: Rid) -> RepoResult<()> {
        let field = self.field(index, FieldKind::SubObject)?;
        if !child.is_null() {
            self.repo.check_adoptable(self.rid, child)?;
        }
        let previous = self.local_sub_object(&field);
        if previous == Some(child) {
            return Ok(());
        }
        self.release_sub_object(&field);
        self.data.set_bytes(&field, bytemuck::bytes_of(&child));
        if !child.is_null() {
            let owner = self.owner(index);
            self.links.push(LinkChange::Attach { child, owner });
        }
        Ok(())
    }

    fn local_sub_object(&self, field: &ResourceField) -> Option<Rid> {
        self.data
            .field_bytes(field)
            .map(bytemuck::pod_read_unaligned::<Rid>)
    }

    fn release_sub_object(&mut self, field: &ResourceField) {
        if let Some(child) = self.local_sub_object(field).filter(|c| !c.is_null()) {
            let owner = self.owner(field.index);
            self.links.push(LinkChange::Detach { child, owner });
        }
    }

    // ---------------------------------------------------------------
    // Sub-object sets
    // ---------------------------------------------------------------

    /// Add owned members to set field `index`. Existing members are kept
    /// in place; the whole call fails before any change if one child is
    /// invalid.
    pub fn add_to_sub_object_set(&mut self, index: u32, children: &[Rid]) -> RepoResult<()> {
        let field = self.field(index, FieldKind::SubObjectSet)?;
        for &child in children {
            self.repo.check_adoptable(self.rid, child)?;
        }
        let owner = self.owner(index);
        let set = self.data.set_mut(&field);
        let mut attached = Vec::new();
        for &child in children {
            if set.insert(child) {
                attached.push(LinkChange::Attach { child, owner });
            }
        }
        self.data.sync_set(&field);
        self.links.extend(attached);
        Ok(())
    }

    /// Remove local members from set field `index`.
    pub fn remove_from_sub_object_set(&mut self, index: u32, children: &[Rid]) -> RepoResult<()> {
        let field = self.field(index, FieldKind::SubObjectSet)?;
        let owner = self.owner(index);
        let set = self.data.set_mut(&field);
        let mut detached = Vec::new();
        for &child in children {
            if set.remove(child) {
                detached.push(LinkChange::Detach { child, owner });
            }
        }
        self.data.sync_set(&field);
        self.links.extend(detached);
        Ok(())
    }

    /// Remove every local member of set field `index`. Prototype removals
    /// are kept.
    pub fn clear_sub_object_set(&mut self, index: u32) -> RepoResult<()> {
        let field = self.field(index, FieldKind::SubObjectSet)?;
        let owner = self.owner(index);
        let drained = self.data.set_mut(&field).drain_members();
        self.data.sync_set(&field);
        self.links
            .extend(drained.into_iter().map(|child| LinkChange::Detach { child, owner }));
        Ok(())
    }

    /// Hide inherited members of set field `index` from this resource.
    pub fn remove_from_prototype_sub_object_set(
        &mut self,
        index: u32,
        members: &[Rid],
    ) -> RepoResult<()> {
        let field = self.field(index, FieldKind::SubObjectSet)?;
        let set = self.data.set_mut(&field);
        for &rid in members {
            set.hide(rid);
        }
        self.data.sync_set(&field);
        Ok(())
    }

    /// Undo [`remove_from_prototype_sub_object_set`](Self::remove_from_prototype_sub_object_set).
    pub fn cancel_remove_from_prototype_sub_object_set(
        &mut self,
        index: u32,
        members: &[Rid],
    ) -> RepoResult<()> {
        let field = self.field(index, FieldKind::SubObjectSet)?;
        let set = self.data.set_mut(&field);
        for &rid in members {
            set.unhide(rid);
        }
        self.data.sync_set(&field);
        Ok(())
    }

    // ---------------------------------------------------------------
    // Commit
    // ---------------------------------------------------------------

    /// Publish the pending snapshot, returning the new version.
    ///
    /// Fails with [`RepoError::CommitConflict`] if another commit replaced
    /// the base snapshot since this handle was opened; the pending snapshot
    /// is discarded and nothing is published.
    pub fn commit(self) -> RepoResult<u32> {
        let Self {
            repo,
            rid,
            mut data,
            replaces,
            links,
            ..
        } = self;

        let storage = repo.live_storage(rid)?;

        // Attach links are re-checked and applied under the ownership lock.
        let _ownership = (!links.is_empty()).then(|| repo.ownership.lock());
        for (position, link) in links.iter().enumerate() {
            let LinkChange::Attach { child, .. } = *link else {
                continue;
            };
            let released = links[position + 1..]
                .iter()
                .any(|later| matches!(*later, LinkChange::Detach { child: c, .. } if c == child));
            if !released {
                if let Err(error) = repo.check_adoptable(rid, child) {
                    warn!(rid = %rid, child = %child, %error, "commit rejected, link no longer valid");
                    return Err(error);
                }
            }
        }

        data.seal();
        if let Err(found) = storage.compare_and_swap(&replaces, Arc::new(data)) {
            let version = storage.version();
            warn!(
                rid = %rid,
                version,
                found = found.is_some(),
                "commit conflict, snapshot replaced concurrently"
            );
            return Err(RepoError::CommitConflict { rid, version });
        }

        for link in &links {
            match *link {
                LinkChange::Attach { child, owner } => repo.attach(child, owner),
                LinkChange::Detach { child, owner } => repo.detach(child, owner),
            }
        }
        let version = repo.bump_versions(rid);
        if let Some(old) = replaces {
            repo.retire_snapshot(old);
        }
        debug!(rid = %rid, version, links = links.len(), "committed");
        Ok(version)
    }
}

impl FieldReader for WriteHandle<'_> {
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
        Some(&self.data)
    }
}

impl std::fmt::Debug for WriteHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteHandle")
            .field("rid", &self.rid)
            .field("type", &self.resource_type.name())
            .field("pending_links", &self.links.len())
            .finish()
    }
}
