use std::fmt;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Shape of a resource field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    /// Plain value described by an external value-type handler.
    Value,
    /// A single owned child resource.
    SubObject,
    /// An owned, prototype-inheritable collection of child resources.
    SubObjectSet,
    /// Handle to an externally stored blob.
    Stream,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Value => "Value",
            Self::SubObject => "SubObject",
            Self::SubObjectSet => "SubObjectSet",
            Self::Stream => "Stream",
        };
        f.write_str(s)
    }
}

/// Handle to a blob owned by an external stream provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct StreamHandle {
    /// Provider-assigned stream id.
    pub stream_id: u64,
    /// Provider-specific file or buffer handle.
    pub blob: u64,
}

impl StreamHandle {
    pub const fn new(stream_id: u64, blob: u64) -> Self {
        Self { stream_id, blob }
    }
}

/// Inline control block of a sub-object-set field.
///
/// Membership lives outside the snapshot's byte buffer; the inline block
/// mirrors the local counts so serializers can size a set without walking it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct SetControl {
    /// Number of locally added members.
    pub members: u64,
    /// Number of inherited members hidden at this level.
    pub prototype_removed: u64,
}
