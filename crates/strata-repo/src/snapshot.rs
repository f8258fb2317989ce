//! Resource snapshots: one version of a resource's field values.
//!
//! A snapshot is private and mutable while a [`WriteHandle`] owns it. Once
//! committed it is wrapped in an `Arc`, published through the storage slot,
//! and never mutated again. Field values are destructed through their
//! handlers when the last reference to the snapshot is dropped.
//!
//! [`WriteHandle`]: crate::WriteHandle

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use strata_schema::{ResourceField, ResourceType, MAX_ALIGNMENT};
use strata_types::{FieldKind, Rid};

use crate::set::SubObjectSetData;

/// Allocation unit of a snapshot buffer.
#[derive(Clone, Copy)]
#[repr(C, align(64))]
struct Block([u8; MAX_ALIGNMENT]);

// SAFETY: a byte array whose size equals its alignment has no padding, and
// every bit pattern, including all zeros, is valid.
unsafe impl Zeroable for Block {}
unsafe impl Pod for Block {}

const _: () = assert!(std::mem::align_of::<Block>() == MAX_ALIGNMENT);

/// Zeroed bytes starting on a [`MAX_ALIGNMENT`] boundary, so a field at an
/// offset aligned for its handler is aligned in memory too.
struct AlignedBuffer {
    blocks: Box<[Block]>,
    len: usize,
}

impl AlignedBuffer {
    fn zeroed(len: usize) -> Self {
        let blocks = vec![Block::zeroed(); len.div_ceil(MAX_ALIGNMENT)].into_boxed_slice();
        Self { blocks, len }
    }
}

impl Deref for AlignedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &bytemuck::cast_slice::<Block, u8>(&self.blocks)[..self.len]
    }
}

impl DerefMut for AlignedBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<Block, u8>(&mut self.blocks)[..self.len]
    }
}

/// Field values of one version of a resource.
pub struct ResourceData {
    rid: Rid,
    resource_type: Arc<ResourceType>,
    buffer: AlignedBuffer,
    /// Per-field presence; an absent field falls back to the prototype.
    present: Vec<bool>,
    /// Membership of sub-object-set fields, indexed like `present`.
    sets: Vec<Option<SubObjectSetData>>,
    /// Whether the whole buffer holds a value of a typed resource type.
    whole: bool,
    read_only: bool,
}

impl ResourceData {
    /// A writable snapshot with every field absent.
    pub(crate) fn blank(rid: Rid, resource_type: Arc<ResourceType>) -> Self {
        let count = resource_type.field_count();
        Self {
            rid,
            buffer: AlignedBuffer::zeroed(resource_type.size()),
            present: vec![false; count],
            sets: (0..count).map(|_| None).collect(),
            whole: false,
            read_only: false,
            resource_type,
        }
    }

    /// A writable snapshot holding copies of this snapshot's present fields.
    ///
    /// Absent fields stay absent so prototype fallback keeps applying.
    pub(crate) fn copy_forward(&self) -> Self {
        let mut data = Self::blank(self.rid, Arc::clone(&self.resource_type));
        for field in self.resource_type.fields() {
            let index = field.index as usize;
            if !self.present[index] {
                continue;
            }
            let range = field.range();
            field
                .value_type
                .copy(&self.buffer[range.clone()], &mut data.buffer[range]);
            data.present[index] = true;
            data.sets[index] = self.sets[index].clone();
        }
        if self.whole {
            if let Some(handler) = self.resource_type.typed_value() {
                handler.copy(&self.buffer, &mut data.buffer);
                data.whole = true;
            }
        }
        data
    }

    /// A published snapshot of a typed resource holding one whole value.
    pub(crate) fn typed(rid: Rid, resource_type: Arc<ResourceType>, value: &[u8]) -> Self {
        let mut data = Self::blank(rid, resource_type);
        if let Some(handler) = data.resource_type.typed_value().cloned() {
            handler.copy(value, &mut data.buffer);
            data.whole = true;
        }
        data.read_only = true;
        data
    }

    pub fn rid(&self) -> Rid {
        self.rid
    }

    pub fn resource_type(&self) -> &Arc<ResourceType> {
        &self.resource_type
    }

    /// `false` only while a write transaction owns the snapshot.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_present(&self, index: u32) -> bool {
        self.present.get(index as usize).copied().unwrap_or(false)
    }

    /// Returns `true` if no field (and no whole value) is stored locally.
    pub fn is_blank(&self) -> bool {
        !self.whole && !self.present.iter().any(|&p| p)
    }

    /// Local bytes of a field, `None` when absent.
    pub fn field_bytes(&self, field: &ResourceField) -> Option<&[u8]> {
        if self.is_present(field.index) {
            Some(&self.buffer[field.range()])
        } else {
            None
        }
    }

    /// Local membership of a set field, `None` when absent.
    pub fn set(&self, index: u32) -> Option<&SubObjectSetData> {
        self.sets.get(index as usize).and_then(Option::as_ref)
    }

    /// The raw snapshot buffer.
    pub(crate) fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// The whole value of a typed resource.
    pub fn typed_bytes(&self) -> Option<&[u8]> {
        self.whole.then_some(&self.buffer[..])
    }

    pub(crate) fn seal(&mut self) {
        self.read_only = true;
    }

    /// Replace a field's local value with a handler copy of `src`.
    pub(crate) fn set_bytes(&mut self, field: &ResourceField, src: &[u8]) {
        let index = field.index as usize;
        let range = field.range();
        if self.present[index] {
            field.value_type.destruct(&mut self.buffer[range.clone()]);
        }
        field.value_type.copy(src, &mut self.buffer[range]);
        self.present[index] = true;
    }

    /// Drop a field's local value so reads fall back to the prototype.
    pub(crate) fn clear_field(&mut self, field: &ResourceField) {
        let index = field.index as usize;
        if self.present[index] {
            field.value_type.destruct(&mut self.buffer[field.range()]);
            self.present[index] = false;
        }
        self.sets[index] = None;
    }

    /// Local set data of a set field, created empty when absent.
    pub(crate) fn set_mut(&mut self, field: &ResourceField) -> &mut SubObjectSetData {
        let index = field.index as usize;
        self.present[index] = true;
        self.sets[index].get_or_insert_with(SubObjectSetData::default)
    }

    /// Mirror a set field's counts into its inline control block, dropping
    /// the field back to absent once nothing is recorded locally.
    pub(crate) fn sync_set(&mut self, field: &ResourceField) {
        let index = field.index as usize;
        let control = match &self.sets[index] {
            Some(set) if !set.is_empty() => set.control(),
            _ => {
                self.clear_field(field);
                return;
            }
        };
        self.buffer[field.range()].copy_from_slice(bytemuck::bytes_of(&control));
        self.present[index] = true;
    }

    /// Remove a set field's local state entirely.
    pub(crate) fn take_set(&mut self, field: &ResourceField) -> Option<SubObjectSetData> {
        let set = self.sets[field.index as usize].take();
        self.clear_field(field);
        set
    }
}

impl Drop for ResourceData {
    fn drop(&mut self) {
        for field in self.resource_type.fields() {
            if self.present[field.index as usize] {
                field.value_type.destruct(&mut self.buffer[field.range()]);
            }
        }
        if self.whole {
            if let Some(handler) = self.resource_type.typed_value() {
                handler.destruct(&mut self.buffer);
            }
        }
    }
}

impl std::fmt::Debug for ResourceData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let present = self.present.iter().filter(|&&p| p).count();
        f.debug_struct("ResourceData")
            .field("rid", &self.rid)
            .field("type", &self.resource_type.name())
            .field("present", &present)
            .field("read_only", &self.read_only)
            .finish()
    }
}

/// Returns `true` if `field` stores a child resource id.
pub(crate) fn is_owning(field: &ResourceField) -> bool {
    matches!(field.kind, FieldKind::SubObject | FieldKind::SubObjectSet)
}
