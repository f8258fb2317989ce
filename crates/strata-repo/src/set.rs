//! Sub-object-set membership and prototype-relative visibility.

use indexmap::IndexSet;
use strata_types::{Rid, SetControl};

/// Membership of one sub-object-set field at one level of a prototype chain.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubObjectSetData {
    members: IndexSet<Rid>,
    prototype_removed: IndexSet<Rid>,
}

impl SubObjectSetData {
    /// Locally added members, in insertion order.
    pub fn members(&self) -> impl Iterator<Item = Rid> + '_ {
        self.members.iter().copied()
    }

    /// Inherited members hidden at this level.
    pub fn prototype_removed(&self) -> impl Iterator<Item = Rid> + '_ {
        self.prototype_removed.iter().copied()
    }

    pub fn contains(&self, rid: Rid) -> bool {
        self.members.contains(&rid)
    }

    pub fn hides(&self, rid: Rid) -> bool {
        self.prototype_removed.contains(&rid)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn prototype_removed_count(&self) -> usize {
        self.prototype_removed.len()
    }

    /// Returns `true` if nothing is recorded at this level.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty() && self.prototype_removed.is_empty()
    }

    pub(crate) fn insert(&mut self, rid: Rid) -> bool {
        self.members.insert(rid)
    }

    pub(crate) fn remove(&mut self, rid: Rid) -> bool {
        self.members.shift_remove(&rid)
    }

    /// Remove every local member, returning them in insertion order.
    pub(crate) fn drain_members(&mut self) -> Vec<Rid> {
        self.members.drain(..).collect()
    }

    pub(crate) fn hide(&mut self, rid: Rid) {
        self.prototype_removed.insert(rid);
    }

    pub(crate) fn unhide(&mut self, rid: Rid) {
        self.prototype_removed.shift_remove(&rid);
    }

    /// Inline control block mirroring this level's counts.
    pub(crate) fn control(&self) -> SetControl {
        SetControl {
            members: self.members.len() as u64,
            prototype_removed: self.prototype_removed.len() as u64,
        }
    }
}

/// Resolve the visible membership of a set field across a prototype chain.
///
/// `levels[0]` is the level being read and `levels[n]` its root-most
/// prototype. Members are emitted root-most level first, each level in
/// insertion order. A member is hidden if any level closer to `levels[0]`
/// lists it as removed from the prototype.
pub(crate) fn visible_members(levels: &[Option<&SubObjectSetData>]) -> Vec<Rid> {
    let mut visible = IndexSet::new();
    for (depth, level) in levels.iter().enumerate().rev() {
        let Some(level) = level else { continue };
        for rid in level.members() {
            let hidden = levels[..depth]
                .iter()
                .flatten()
                .any(|closer| closer.hides(rid));
            if !hidden {
                visible.insert(rid);
            }
        }
    }
    visible.into_iter().collect()
}
