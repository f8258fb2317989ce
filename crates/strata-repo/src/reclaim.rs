//! Deferred reclamation of superseded snapshots and destroyed resources.
//!
//! Commits and `destroy_resource` only enqueue work. A single consumer in
//! [`Repository::garbage_collect`] drains the queue. Snapshot memory is
//! reference counted, so a handle still pinning a snapshot keeps it alive
//! past its collection; the queue only drops the repository's reference.

use std::sync::Arc;

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strata_types::{FieldKind, Rid};
use tracing::{debug, warn};

use crate::error::{RepoError, RepoResult};
use crate::read::FieldReader;
use crate::repository::Repository;
use crate::snapshot::{is_owning, ResourceData};
use crate::storage::Owner;

pub(crate) enum Reclaim {
    /// A snapshot replaced by a commit.
    Snapshot(Arc<ResourceData>),
    /// A resource marked for destruction, with everything it owns.
    Resource(Rid),
}

pub(crate) struct Reclaimer {
    queue: SegQueue<Reclaim>,
    drain: Mutex<()>,
}

impl Reclaimer {
    pub(crate) fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            drain: Mutex::new(()),
        }
    }

    pub(crate) fn push(&self, item: Reclaim) {
        self.queue.push(item);
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Outcome of one [`Repository::garbage_collect`] pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectReport {
    /// Resources destroyed, cascaded sub-objects included.
    pub resources_destroyed: usize,
    /// Superseded snapshots whose repository reference was dropped.
    pub snapshots_released: usize,
}

impl CollectReport {
    pub fn is_empty(&self) -> bool {
        self.resources_destroyed == 0 && self.snapshots_released == 0
    }
}

impl std::ops::AddAssign for CollectReport {
    fn add_assign(&mut self, other: Self) {
        self.resources_destroyed += other.resources_destroyed;
        self.snapshots_released += other.snapshots_released;
    }
}

impl Repository {
    /// Mark `rid` for destruction and queue it for the next collection.
    ///
    /// Writes to a marked resource fail with [`RepoError::NotAlive`]. Its
    /// owned sub-objects and set members are destroyed with it.
    pub fn destroy_resource(&self, rid: Rid) -> RepoResult<()> {
        let storage = self.live_storage(rid)?;
        if !storage.mark() {
            return Err(RepoError::NotAlive(rid));
        }
        self.reclaimer.push(Reclaim::Resource(rid));
        debug!(rid = %rid, "resource marked to destroy");
        Ok(())
    }

    /// Drain the reclamation queue until it is empty.
    ///
    /// Work enqueued while draining, such as the owner commits made when
    /// destroyed children detach, is processed in the same pass. Concurrent
    /// callers are serialized.
    pub fn garbage_collect(&self) -> CollectReport {
        let _drain = self.reclaimer.drain.lock();
        let mut report = CollectReport::default();
        while let Some(item) = self.reclaimer.queue.pop() {
            match item {
                Reclaim::Snapshot(snapshot) => {
                    drop(snapshot);
                    report.snapshots_released += 1;
                }
                Reclaim::Resource(rid) => {
                    report.resources_destroyed += self.destroy_tree(rid);
                }
            }
        }
        if !report.is_empty() {
            debug!(
                resources = report.resources_destroyed,
                snapshots = report.snapshots_released,
                "garbage collected"
            );
        }
        report
    }

    /// Number of queued reclamation requests.
    pub fn pending_reclamation(&self) -> usize {
        self.reclaimer.len()
    }

    /// Destroy `root` and every resource it owns. Returns how many slots
    /// were reset.
    fn destroy_tree(&self, root: Rid) -> usize {
        let mut pending = vec![root];
        let mut destroyed = 0;
        while let Some(rid) = pending.pop() {
            let Ok(storage) = self.pages.slot(rid) else {
                continue;
            };
            if storage.rid() != rid {
                continue;
            }
            storage.mark();

            if let Some(data) = storage.swap(None) {
                pending.extend(self.owned_children(rid, &data));
            }

            if let Some(owner) = storage.owner() {
                if root == rid {
                    self.detach_from_owner(rid, owner);
                }
            }

            let external_id = storage.external_id();
            if !external_id.is_nil() {
                let mut index = self.by_external_id.lock();
                if index.get(&external_id) == Some(&rid) {
                    index.remove(&external_id);
                }
            }
            self.by_path.lock().retain(|_, mapped| *mapped != rid);

            storage.reset();
            destroyed += 1;
            debug!(rid = %rid, "resource destroyed");
        }
        destroyed
    }

    /// Children referenced by `data` whose parent link still names `rid`.
    pub(crate) fn owned_children(&self, rid: Rid, data: &ResourceData) -> Vec<Rid> {
        let mut children = Vec::new();
        for field in data.resource_type().fields().iter().filter(|f| is_owning(f)) {
            let owner = Owner {
                rid,
                field: field.index,
            };
            match field.kind {
                FieldKind::SubObject => {
                    if let Some(bytes) = data.field_bytes(field) {
                        let child: Rid = bytemuck::pod_read_unaligned(bytes);
                        if self.is_owned_by(child, owner) {
                            children.push(child);
                        }
                    }
                }
                FieldKind::SubObjectSet => {
                    if let Some(set) = data.set(field.index) {
                        children.extend(set.members().filter(|&c| self.is_owned_by(c, owner)));
                    }
                }
                FieldKind::Value | FieldKind::Stream => {}
            }
        }
        children
    }

    fn is_owned_by(&self, child: Rid, owner: Owner) -> bool {
        self.pages
            .slot(child)
            .map(|s| s.rid() == child && s.owner() == Some(owner))
            .unwrap_or(false)
    }

    /// Remove a destroyed resource from the field of its live owner.
    fn detach_from_owner(&self, rid: Rid, owner: Owner) {
        if !self.is_alive(owner.rid) {
            return;
        }
        let result = self.update(owner.rid, |parent| {
            match parent.field_kind(owner.field) {
                Some(FieldKind::SubObjectSet) => {
                    parent.remove_from_sub_object_set(owner.field, &[rid])
                }
                Some(FieldKind::SubObject) if parent.sub_object(owner.field)? == Some(rid) => {
                    parent.clear_value(owner.field)
                }
                _ => Ok(()),
            }
        });
        if let Err(error) = result {
            warn!(rid = %rid, owner = %owner.rid, %error, "failed to detach destroyed resource");
        }
    }
}
