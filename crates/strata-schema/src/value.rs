//! The value-type handler contract.
//!
//! The repository stores field values as raw bytes inside a snapshot buffer
//! and relies on a [`ValueType`] handler for everything else. Handlers are
//! supplied by the embedding application's reflection layer; [`PodType`]
//! covers plain-old-data values.

use std::fmt;
use std::marker::PhantomData;

use bytemuck::Pod;

use crate::tag::TypeTag;

/// Largest value alignment a handler may declare. Snapshot buffers start on
/// this boundary, so every field offset laid out by the registry is aligned
/// in memory as well as relative to the buffer.
pub const MAX_ALIGNMENT: usize = 64;

/// Handler describing how to lay out and manage one kind of field value.
///
/// `src` and `dst` slices passed to the handler are always exactly
/// [`size`](ValueType::size) bytes long, and `dst` starts at an address
/// that is a multiple of [`alignment`](ValueType::alignment).
pub trait ValueType: Send + Sync + 'static {
    /// Human-readable type name.
    fn name(&self) -> &str;

    /// Numeric tag the registry files this handler under.
    fn tag(&self) -> TypeTag {
        TypeTag::of_name(self.name())
    }

    /// Size of one value in bytes.
    fn size(&self) -> usize;

    /// Required alignment of a value, a power of two no larger than
    /// [`MAX_ALIGNMENT`].
    fn alignment(&self) -> usize;

    /// Copy-construct the value in `src` into the uninitialized `dst`.
    fn copy(&self, src: &[u8], dst: &mut [u8]);

    /// Move the value in `src` into the uninitialized `dst`, leaving `src`
    /// destructed.
    fn move_value(&self, src: &mut [u8], dst: &mut [u8]) {
        self.copy(src, dst);
        self.destruct(src);
    }

    /// Destruct the value in place.
    fn destruct(&self, value: &mut [u8]);
}

impl fmt::Debug for dyn ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueType")
            .field("name", &self.name())
            .field("size", &self.size())
            .field("alignment", &self.alignment())
            .finish()
    }
}

/// Handler for any [`bytemuck::Pod`] value.
///
/// Copies are bitwise and destruction zeroes the bytes.
pub struct PodType<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Pod> PodType<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }
}

impl<T: Pod> ValueType for PodType<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> usize {
        std::mem::size_of::<T>()
    }

    fn alignment(&self) -> usize {
        std::mem::align_of::<T>()
    }

    fn copy(&self, src: &[u8], dst: &mut [u8]) {
        dst.copy_from_slice(src);
    }

    fn move_value(&self, src: &mut [u8], dst: &mut [u8]) {
        dst.copy_from_slice(src);
        src.fill(0);
    }

    fn destruct(&self, value: &mut [u8]) {
        value.fill(0);
    }
}
