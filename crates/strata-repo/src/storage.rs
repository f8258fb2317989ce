//! Storage slots: the permanent per-`Rid` record of a resource.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strata_schema::ResourceType;
use strata_types::{ExternalId, Rid};

use crate::snapshot::ResourceData;

/// Lifecycle of a storage slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceState {
    /// Allocated, nothing committed yet.
    Empty,
    /// At least one snapshot is installed.
    Populated,
    /// Queued for destruction by the next collection.
    MarkedToDestroy,
    /// Reclaimed; the slot is zeroed.
    Destroyed,
}

impl std::fmt::Display for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::Populated => write!(f, "populated"),
            Self::MarkedToDestroy => write!(f, "marked-to-destroy"),
            Self::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// The owning side of a parent link: which resource, through which field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Owner {
    pub rid: Rid,
    pub field: u32,
}

/// One slot of the page arena. Its address never changes.
pub(crate) struct ResourceStorage {
    rid: AtomicU64,
    external_id: Mutex<ExternalId>,
    resource_type: ArcSwapOption<ResourceType>,
    data: ArcSwapOption<ResourceData>,
    prototype: AtomicU64,
    owner: Mutex<Option<Owner>>,
    version: AtomicU32,
    active: AtomicBool,
    marked_to_destroy: AtomicBool,
}

impl ResourceStorage {
    pub(crate) fn vacant() -> Self {
        Self {
            rid: AtomicU64::new(0),
            external_id: Mutex::new(ExternalId::nil()),
            resource_type: ArcSwapOption::empty(),
            data: ArcSwapOption::empty(),
            prototype: AtomicU64::new(0),
            owner: Mutex::new(None),
            version: AtomicU32::new(0),
            active: AtomicBool::new(false),
            marked_to_destroy: AtomicBool::new(false),
        }
    }

    /// Claim the slot for a freshly allocated id.
    pub(crate) fn init(
        &self,
        rid: Rid,
        resource_type: Option<Arc<ResourceType>>,
        external_id: ExternalId,
        prototype: Rid,
    ) {
        self.resource_type.store(resource_type);
        *self.external_id.lock() = external_id;
        self.prototype.store(prototype.as_u64(), Ordering::Release);
        *self.owner.lock() = None;
        self.version.store(0, Ordering::Release);
        self.marked_to_destroy.store(false, Ordering::Release);
        self.active.store(true, Ordering::Release);
        self.rid.store(rid.as_u64(), Ordering::Release);
    }

    /// Zero the slot after destruction.
    pub(crate) fn reset(&self) {
        self.rid.store(0, Ordering::Release);
        self.data.store(None);
        self.resource_type.store(None);
        *self.external_id.lock() = ExternalId::nil();
        self.prototype.store(0, Ordering::Release);
        *self.owner.lock() = None;
        self.version.store(0, Ordering::Release);
        self.active.store(false, Ordering::Release);
        self.marked_to_destroy.store(false, Ordering::Release);
    }

    pub(crate) fn rid(&self) -> Rid {
        Rid::from_raw(self.rid.load(Ordering::Acquire))
    }

    /// Returns `true` if the slot holds `rid` and it is not marked.
    pub(crate) fn is_alive_as(&self, rid: Rid) -> bool {
        self.rid() == rid && !self.is_marked()
    }

    pub(crate) fn state(&self) -> ResourceState {
        if self.rid().is_null() {
            ResourceState::Destroyed
        } else if self.is_marked() {
            ResourceState::MarkedToDestroy
        } else if self.data.load().is_some() {
            ResourceState::Populated
        } else {
            ResourceState::Empty
        }
    }

    // ---------------------------------------------------------------
    // Snapshot pointer
    // ---------------------------------------------------------------

    /// The current snapshot, pinned.
    pub(crate) fn load(&self) -> Option<Arc<ResourceData>> {
        self.data.load_full()
    }

    /// Install `new` if the current snapshot is still `current`.
    ///
    /// Returns the snapshot found in the slot when the swap did not happen.
    pub(crate) fn compare_and_swap(
        &self,
        current: &Option<Arc<ResourceData>>,
        new: Arc<ResourceData>,
    ) -> Result<(), Option<Arc<ResourceData>>> {
        let previous = self.data.compare_and_swap(current, Some(new));
        if same_snapshot(&previous, current) {
            Ok(())
        } else {
            Err((*previous).clone())
        }
    }

    /// Install `new` unconditionally, returning the replaced snapshot.
    pub(crate) fn swap(&self, new: Option<Arc<ResourceData>>) -> Option<Arc<ResourceData>> {
        self.data.swap(new)
    }

    // ---------------------------------------------------------------
    // Metadata
    // ---------------------------------------------------------------

    pub(crate) fn resource_type(&self) -> Option<Arc<ResourceType>> {
        self.resource_type.load_full()
    }

    pub(crate) fn set_resource_type(&self, resource_type: Arc<ResourceType>) {
        self.resource_type.store(Some(resource_type));
    }

    pub(crate) fn external_id(&self) -> ExternalId {
        *self.external_id.lock()
    }

    pub(crate) fn replace_external_id(&self, id: ExternalId) -> ExternalId {
        std::mem::replace(&mut *self.external_id.lock(), id)
    }

    pub(crate) fn prototype(&self) -> Rid {
        Rid::from_raw(self.prototype.load(Ordering::Acquire))
    }

    pub(crate) fn owner(&self) -> Option<Owner> {
        *self.owner.lock()
    }

    pub(crate) fn set_owner(&self, owner: Owner) {
        *self.owner.lock() = Some(owner);
    }

    /// Clear the parent link if it still points at `owner`.
    pub(crate) fn release_owner(&self, owner: Owner) -> bool {
        let mut slot = self.owner.lock();
        if *slot == Some(owner) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub(crate) fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    /// Increment the version, returning the new value.
    pub(crate) fn bump_version(&self) -> u32 {
        self.version.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        self.version.store(0, Ordering::Release);
    }

    pub(crate) fn is_marked(&self) -> bool {
        self.marked_to_destroy.load(Ordering::Acquire)
    }

    /// Mark for destruction. Returns `false` if already marked.
    pub(crate) fn mark(&self) -> bool {
        !self.marked_to_destroy.swap(true, Ordering::AcqRel)
    }
}

fn same_snapshot(a: &Option<Arc<ResourceData>>, b: &Option<Arc<ResourceData>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}
