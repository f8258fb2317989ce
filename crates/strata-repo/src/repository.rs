//! The [`Repository`] service.

use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::Pod;
use parking_lot::Mutex;
use strata_schema::{ResourceType, ResourceTypeSchema, TypeRegistry, TypeTag, ValueType};
use strata_types::{ExternalId, Rid};
use tracing::{debug, info, warn};

use crate::config::RepositoryConfig;
use crate::error::{RepoError, RepoResult};
use crate::page::PageTable;
use crate::read::ReadHandle;
use crate::reclaim::{CollectReport, Reclaim, Reclaimer};
use crate::snapshot::ResourceData;
use crate::storage::{Owner, ResourceState, ResourceStorage};
use crate::write::WriteHandle;

/// A versioned, prototype-based in-memory object store.
///
/// All methods take `&self` and may be called from any number of threads.
/// Reads never block. Writes build private snapshots and publish them with
/// one compare-and-swap per commit.
pub struct Repository {
    pub(crate) config: RepositoryConfig,
    pub(crate) types: TypeRegistry,
    pub(crate) pages: PageTable,
    pub(crate) by_external_id: Mutex<HashMap<ExternalId, Rid>>,
    pub(crate) by_path: Mutex<HashMap<String, Rid>>,
    /// Held while a commit re-checks and applies parent-link changes.
    pub(crate) ownership: Mutex<()>,
    pub(crate) reclaimer: Reclaimer,
}

impl Repository {
    pub fn new(config: RepositoryConfig) -> RepoResult<Self> {
        config.validate()?;
        info!(
            max_pages = config.max_pages,
            max_chain_depth = config.max_chain_depth,
            "repository created"
        );
        Ok(Self {
            types: TypeRegistry::new(),
            pages: PageTable::new(config.max_pages),
            by_external_id: Mutex::new(HashMap::new()),
            by_path: Mutex::new(HashMap::new()),
            ownership: Mutex::new(()),
            reclaimer: Reclaimer::new(),
            config,
        })
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    // ---------------------------------------------------------------
    // Types
    // ---------------------------------------------------------------

    pub fn register_value_type(&self, handler: Arc<dyn ValueType>) -> RepoResult<TypeTag> {
        Ok(self.types.register_value_type(handler)?)
    }

    /// Lay out and register a field-based resource type.
    pub fn create_resource_type(&self, schema: &ResourceTypeSchema) -> RepoResult<TypeTag> {
        Ok(self.types.create_type(schema)?.tag())
    }

    /// Register a typed resource type holding one value of `value_type`.
    pub fn create_typed_resource_type(&self, value_type: &str) -> RepoResult<TypeTag> {
        Ok(self.types.create_typed_type(value_type)?.tag())
    }

    pub fn resource_type_tag(&self, name: &str) -> Option<TypeTag> {
        self.types.tag_of(name)
    }

    fn resource_type(&self, tag: TypeTag) -> RepoResult<Arc<ResourceType>> {
        self.types.get(tag).ok_or(RepoError::UnknownType(tag))
    }

    // ---------------------------------------------------------------
    // Creation
    // ---------------------------------------------------------------

    /// Allocate an empty resource of the given type.
    pub fn create_resource(&self, tag: TypeTag) -> RepoResult<Rid> {
        let resource_type = self.resource_type(tag)?;
        self.allocate(Some(resource_type), ExternalId::nil(), Rid::null())
    }

    /// Allocate a resource of the given type named by `id`.
    pub fn create_resource_with_id(&self, tag: TypeTag, id: ExternalId) -> RepoResult<Rid> {
        let resource_type = self.resource_type(tag)?;
        let mut index = self.by_external_id.lock();
        if let Some(&rid) = index.get(&id) {
            return Err(RepoError::ExternalIdInUse { id, rid });
        }
        let rid = self.allocate(Some(resource_type), id, Rid::null())?;
        if !id.is_nil() {
            index.insert(id, rid);
        }
        Ok(rid)
    }

    /// Allocate a resource inheriting every absent field from `prototype`.
    pub fn create_from_prototype(&self, prototype: Rid) -> RepoResult<Rid> {
        self.create_from_prototype_with_id(prototype, ExternalId::nil())
    }

    pub fn create_from_prototype_with_id(&self, prototype: Rid, id: ExternalId) -> RepoResult<Rid> {
        let base = self.live_storage(prototype)?;
        let resource_type = base.resource_type().ok_or(RepoError::Untyped(prototype))?;
        // The new resource adds one link on top of the prototype's chain.
        if self.prototype_depth(prototype) + 1 > self.config.max_chain_depth {
            return Err(RepoError::ChainTooDeep {
                rid: prototype,
                limit: self.config.max_chain_depth,
            });
        }

        let mut index = self.by_external_id.lock();
        if !id.is_nil() {
            if let Some(&rid) = index.get(&id) {
                return Err(RepoError::ExternalIdInUse { id, rid });
            }
        }
        let rid = self.allocate(Some(Arc::clone(&resource_type)), id, prototype)?;
        let mut blank = ResourceData::blank(rid, resource_type);
        blank.seal();
        self.pages.slot(rid)?.swap(Some(Arc::new(blank)));
        if !id.is_nil() {
            index.insert(id, rid);
        }
        Ok(rid)
    }

    /// Find the resource named by `id`, creating it if absent.
    ///
    /// Without a type the new slot is a placeholder that a later call with
    /// a type completes. Concurrent callers for one id all get the same
    /// `Rid`.
    pub fn get_or_create_by_external_id(
        &self,
        id: ExternalId,
        tag: Option<TypeTag>,
    ) -> RepoResult<Rid> {
        if id.is_nil() {
            return Err(RepoError::NilExternalId);
        }
        let resource_type = tag.map(|t| self.resource_type(t)).transpose()?;
        let mut index = self.by_external_id.lock();
        if let Some(&rid) = index.get(&id) {
            let storage = self.storage(rid)?;
            match (storage.resource_type(), resource_type) {
                (None, Some(resource_type)) => storage.set_resource_type(resource_type),
                (Some(current), Some(wanted)) if current.tag() != wanted.tag() => {
                    return Err(RepoError::ExternalIdInUse { id, rid });
                }
                _ => {}
            }
            return Ok(rid);
        }
        let rid = self.allocate(resource_type, id, Rid::null())?;
        index.insert(id, rid);
        Ok(rid)
    }

    fn allocate(
        &self,
        resource_type: Option<Arc<ResourceType>>,
        id: ExternalId,
        prototype: Rid,
    ) -> RepoResult<Rid> {
        let rid = self.pages.new_id()?;
        let type_name = resource_type.as_ref().map(|t| t.name().to_string());
        self.pages.slot(rid)?.init(rid, resource_type, id, prototype);
        debug!(
            rid = %rid,
            resource_type = type_name.as_deref().unwrap_or("-"),
            prototype = %prototype,
            "resource created"
        );
        Ok(rid)
    }

    // ---------------------------------------------------------------
    // Access
    // ---------------------------------------------------------------

    /// Open a read handle pinned to the current snapshot.
    pub fn read(&self, rid: Rid) -> RepoResult<ReadHandle<'_>> {
        let storage = self.storage(rid)?;
        let resource_type = storage.resource_type().ok_or(RepoError::Untyped(rid))?;
        Ok(ReadHandle::new(self, rid, resource_type, storage.load()))
    }

    /// Open a write transaction based on the current snapshot.
    pub fn write(&self, rid: Rid) -> RepoResult<WriteHandle<'_>> {
        let storage = self.live_storage(rid)?;
        let resource_type = storage.resource_type().ok_or(RepoError::Untyped(rid))?;
        Ok(WriteHandle::new(self, rid, resource_type, storage.load()))
    }

    /// Apply `edit` in a write transaction, rebasing and retrying on
    /// commit conflicts up to `max_commit_retries` times.
    ///
    /// `edit` may run more than once and must only describe the change.
    pub fn update<F>(&self, rid: Rid, mut edit: F) -> RepoResult<u32>
    where
        F: FnMut(&mut WriteHandle<'_>) -> RepoResult<()>,
    {
        let mut attempt = 0;
        loop {
            let mut handle = self.write(rid)?;
            edit(&mut handle)?;
            match handle.commit() {
                Err(RepoError::CommitConflict { .. }) if attempt < self.config.max_commit_retries => {
                    attempt += 1;
                    debug!(rid = %rid, attempt, "rebasing after commit conflict");
                }
                Err(error @ RepoError::CommitConflict { .. }) => {
                    warn!(rid = %rid, attempts = attempt + 1, "commit retries exhausted");
                    return Err(error);
                }
                result => return result,
            }
        }
    }

    /// Replace the whole value of a typed resource.
    ///
    /// The write does not depend on the previous value, so it is installed
    /// unconditionally.
    pub fn commit_typed<T: Pod>(&self, rid: Rid, value: &T) -> RepoResult<u32> {
        let storage = self.live_storage(rid)?;
        let resource_type = self.typed_resource_type(rid, storage)?;
        let bytes = bytemuck::bytes_of(value);
        if bytes.len() != resource_type.size() {
            return Err(RepoError::ValueSizeMismatch {
                rid,
                index: 0,
                expected: resource_type.size(),
                actual: bytes.len(),
            });
        }
        let data = ResourceData::typed(rid, resource_type, bytes);
        if let Some(old) = storage.swap(Some(Arc::new(data))) {
            self.retire_snapshot(old);
        }
        let version = self.bump_versions(rid);
        debug!(rid = %rid, version, "committed typed value");
        Ok(version)
    }

    /// The whole value of a typed resource.
    pub fn read_typed<T: Pod>(&self, rid: Rid) -> RepoResult<Option<T>> {
        let storage = self.storage(rid)?;
        let resource_type = self.typed_resource_type(rid, storage)?;
        if std::mem::size_of::<T>() != resource_type.size() {
            return Err(RepoError::ValueSizeMismatch {
                rid,
                index: 0,
                expected: resource_type.size(),
                actual: std::mem::size_of::<T>(),
            });
        }
        Ok(storage
            .load()
            .and_then(|data| data.typed_bytes().map(bytemuck::pod_read_unaligned)))
    }

    fn typed_resource_type(
        &self,
        rid: Rid,
        storage: &ResourceStorage,
    ) -> RepoResult<Arc<ResourceType>> {
        let resource_type = storage.resource_type().ok_or(RepoError::Untyped(rid))?;
        if resource_type.typed_value().is_none() {
            return Err(RepoError::NotTyped {
                rid,
                type_name: resource_type.name().to_string(),
            });
        }
        Ok(resource_type)
    }

    /// Commit a snapshot with every local field dropped.
    pub fn clear_values(&self, rid: Rid) -> RepoResult<u32> {
        self.update(rid, |handle| {
            handle.clear_fields();
            Ok(())
        })
    }

    // ---------------------------------------------------------------
    // Introspection
    // ---------------------------------------------------------------

    /// Number of commits to the resource and its descendants.
    pub fn version(&self, rid: Rid) -> RepoResult<u32> {
        Ok(self.storage(rid)?.version())
    }

    pub fn state(&self, rid: Rid) -> RepoResult<ResourceState> {
        let storage = self.pages.slot(rid)?;
        if storage.rid() != rid {
            return Ok(ResourceState::Destroyed);
        }
        Ok(storage.state())
    }

    /// Returns `true` if `rid` names a resource not marked for destruction.
    pub fn is_alive(&self, rid: Rid) -> bool {
        self.live_storage(rid).is_ok()
    }

    pub fn is_active(&self, rid: Rid) -> RepoResult<bool> {
        Ok(self.storage(rid)?.is_active())
    }

    /// Flag the resource inactive and reset its version to zero.
    pub fn deactivate(&self, rid: Rid) -> RepoResult<()> {
        self.storage(rid)?.deactivate();
        Ok(())
    }

    /// Returns `true` if the current snapshot stores no field locally.
    pub fn is_empty(&self, rid: Rid) -> RepoResult<bool> {
        Ok(self
            .storage(rid)?
            .load()
            .map_or(true, |data| data.is_blank()))
    }

    pub fn prototype_of(&self, rid: Rid) -> RepoResult<Option<Rid>> {
        let prototype = self.storage(rid)?.prototype();
        Ok((!prototype.is_null()).then_some(prototype))
    }

    /// The resource and field currently owning `rid`.
    pub fn owner_of(&self, rid: Rid) -> RepoResult<Option<Owner>> {
        Ok(self.storage(rid)?.owner())
    }

    pub fn resource_type_of(&self, rid: Rid) -> RepoResult<Option<TypeTag>> {
        Ok(self.storage(rid)?.resource_type().map(|t| t.tag()))
    }

    // ---------------------------------------------------------------
    // External ids and paths
    // ---------------------------------------------------------------

    pub fn external_id(&self, rid: Rid) -> RepoResult<ExternalId> {
        Ok(self.storage(rid)?.external_id())
    }

    /// Rename `rid`. The nil id removes its external name.
    pub fn set_external_id(&self, rid: Rid, id: ExternalId) -> RepoResult<()> {
        let storage = self.live_storage(rid)?;
        let mut index = self.by_external_id.lock();
        if let Some(&other) = index.get(&id) {
            if other != rid {
                return Err(RepoError::ExternalIdInUse { id, rid: other });
            }
        }
        let previous = storage.replace_external_id(id);
        if !previous.is_nil() {
            index.remove(&previous);
        }
        if !id.is_nil() {
            index.insert(id, rid);
        }
        Ok(())
    }

    pub fn get_by_external_id(&self, id: ExternalId) -> Option<Rid> {
        self.by_external_id.lock().get(&id).copied()
    }

    /// Map `path` to `rid`, replacing any previous mapping of the path.
    pub fn set_path(&self, path: impl Into<String>, rid: Rid) -> RepoResult<()> {
        self.live_storage(rid)?;
        self.by_path.lock().insert(path.into(), rid);
        Ok(())
    }

    pub fn remove_path(&self, path: &str) -> Option<Rid> {
        self.by_path.lock().remove(path)
    }

    pub fn get_by_path(&self, path: &str) -> Option<Rid> {
        self.by_path.lock().get(path).copied()
    }

    // ---------------------------------------------------------------
    // Statistics and teardown
    // ---------------------------------------------------------------

    /// Number of slots holding a resource, marked ones included.
    pub fn resource_count(&self) -> usize {
        self.pages.slots().filter(|s| !s.rid().is_null()).count()
    }

    pub fn page_count(&self) -> usize {
        self.pages.page_count()
    }

    /// Drain reclamation and drop every resource, type, and index.
    ///
    /// The repository is empty and reusable afterwards; ids restart at 1.
    pub fn shutdown(&mut self) -> CollectReport {
        let report = self.garbage_collect();
        let resources = self.resource_count();
        self.pages = PageTable::new(self.config.max_pages);
        self.by_external_id.get_mut().clear();
        self.by_path.get_mut().clear();
        self.types.clear();
        info!(
            resources,
            collected = report.resources_destroyed,
            "repository shut down"
        );
        report
    }

    // ---------------------------------------------------------------
    // Internals shared with handles and reclamation
    // ---------------------------------------------------------------

    /// The slot of `rid`, which must not be destroyed.
    pub(crate) fn storage(&self, rid: Rid) -> RepoResult<&ResourceStorage> {
        let storage = self.pages.slot(rid)?;
        if storage.rid() != rid {
            return Err(RepoError::NotAlive(rid));
        }
        Ok(storage)
    }

    /// The slot of `rid`, which must be neither destroyed nor marked.
    pub(crate) fn live_storage(&self, rid: Rid) -> RepoResult<&ResourceStorage> {
        let storage = self.pages.slot(rid)?;
        if !storage.is_alive_as(rid) {
            return Err(RepoError::NotAlive(rid));
        }
        Ok(storage)
    }

    /// Visit the current snapshots of `rid`'s prototypes, nearest first,
    /// until `visit` returns a value.
    pub(crate) fn find_in_prototypes<R>(
        &self,
        rid: Rid,
        mut visit: impl FnMut(&Arc<ResourceData>) -> Option<R>,
    ) -> RepoResult<Option<R>> {
        let mut next = self.pages.slot(rid)?.prototype();
        let mut depth = 0;
        while !next.is_null() {
            depth += 1;
            if depth > self.config.max_chain_depth {
                return Err(RepoError::ChainTooDeep {
                    rid,
                    limit: self.config.max_chain_depth,
                });
            }
            let Ok(storage) = self.pages.slot(next) else {
                break;
            };
            if storage.rid() != next {
                break;
            }
            if let Some(found) = storage.load().as_ref().and_then(&mut visit) {
                return Ok(Some(found));
            }
            next = storage.prototype();
        }
        Ok(None)
    }

    /// Current snapshots of `rid`'s prototypes, nearest first.
    pub(crate) fn prototype_snapshots(&self, rid: Rid) -> RepoResult<Vec<Arc<ResourceData>>> {
        let mut chain = Vec::new();
        self.find_in_prototypes(rid, |snapshot| {
            chain.push(Arc::clone(snapshot));
            None::<()>
        })?;
        Ok(chain)
    }

    /// Number of prototype links above `rid`, counted up to one past the
    /// configured limit.
    fn prototype_depth(&self, rid: Rid) -> usize {
        let mut depth = 0;
        let mut next = self.pages.slot(rid).map_or(Rid::null(), |s| s.prototype());
        while !next.is_null() && depth <= self.config.max_chain_depth {
            depth += 1;
            next = self.pages.slot(next).map_or(Rid::null(), |s| s.prototype());
        }
        depth
    }

    /// Check that `child` may become a sub-object of `owner`: it must be
    /// alive, must not be `owner` or one of `owner`'s ancestors, and the
    /// longest ownership chain through the new link must stay within
    /// `max_chain_depth` links.
    pub(crate) fn check_adoptable(&self, owner: Rid, child: Rid) -> RepoResult<()> {
        self.live_storage(child)?;
        let limit = self.config.max_chain_depth;
        let too_deep = || RepoError::ChainTooDeep { rid: owner, limit };

        // Links between `owner` and its root.
        let mut depth = 0;
        let mut current = owner;
        loop {
            if current == child {
                return Err(RepoError::OwnershipCycle { owner, child });
            }
            match self.storage(current)?.owner() {
                Some(parent) => {
                    depth += 1;
                    if depth >= limit {
                        return Err(too_deep());
                    }
                    current = parent.rid;
                }
                None => break,
            }
        }

        // The new link itself takes one more.
        let budget = limit - depth - 1;
        if self.subtree_height(child, budget) > budget {
            return Err(too_deep());
        }
        Ok(())
    }

    /// Longest chain of owner links below `root`, counted up to one past
    /// `budget`.
    fn subtree_height(&self, root: Rid, budget: usize) -> usize {
        let mut height = 0;
        let mut pending = vec![(root, 0usize)];
        while let Some((rid, level)) = pending.pop() {
            height = height.max(level);
            if height > budget {
                break;
            }
            let Ok(storage) = self.storage(rid) else {
                continue;
            };
            if let Some(data) = storage.load() {
                let children = self.owned_children(rid, &data);
                pending.extend(children.into_iter().map(|child| (child, level + 1)));
            }
        }
        height
    }

    pub(crate) fn attach(&self, child: Rid, owner: Owner) {
        if let Ok(storage) = self.storage(child) {
            storage.set_owner(owner);
        }
    }

    pub(crate) fn detach(&self, child: Rid, owner: Owner) {
        if let Ok(storage) = self.storage(child) {
            storage.release_owner(owner);
        }
    }

    /// Bump the version of `rid` and every ancestor, returning the new
    /// version of `rid`. Adoption keeps every chain within
    /// `max_chain_depth` links, so the walk reaches the root.
    pub(crate) fn bump_versions(&self, rid: Rid) -> u32 {
        let Ok(storage) = self.storage(rid) else {
            return 0;
        };
        let version = storage.bump_version();
        let mut next = storage.owner();
        for _ in 0..self.config.max_chain_depth {
            let Some(owner) = next else { break };
            let Ok(parent) = self.storage(owner.rid) else {
                break;
            };
            parent.bump_version();
            next = parent.owner();
        }
        version
    }

    pub(crate) fn retire_snapshot(&self, snapshot: Arc<ResourceData>) {
        self.reclaimer.push(Reclaim::Snapshot(snapshot));
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("config", &self.config)
            .field("types", &self.types)
            .field("pages", &self.pages.page_count())
            .field("max_pages", &self.pages.max_pages())
            .field("pending_reclamation", &self.reclaimer.len())
            .finish()
    }
}
