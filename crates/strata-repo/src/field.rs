//! Resolved field values and field lookup with kind checks.

use std::ops::{Deref, Range};
use std::sync::Arc;

use strata_schema::{ResourceField, ResourceType};
use strata_types::{FieldKind, Rid};

use crate::error::{RepoError, RepoResult};
use crate::snapshot::ResourceData;

/// The bytes of a field, either local to the handle's snapshot or
/// inherited from a prototype.
///
/// An inherited value pins the prototype snapshot it came from, so the
/// bytes stay valid even if the prototype is committed to meanwhile.
#[derive(Debug, Clone)]
pub enum FieldValue<'a> {
    Local(&'a [u8]),
    Inherited {
        snapshot: Arc<ResourceData>,
        range: Range<usize>,
    },
}

impl FieldValue<'_> {
    pub fn is_inherited(&self) -> bool {
        matches!(self, Self::Inherited { .. })
    }

    /// The prototype the value was inherited from.
    pub fn inherited_from(&self) -> Option<Rid> {
        match self {
            Self::Local(_) => None,
            Self::Inherited { snapshot, .. } => Some(snapshot.rid()),
        }
    }
}

impl Deref for FieldValue<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Local(bytes) => bytes,
            Self::Inherited { snapshot, range } => &snapshot.buffer()[range.clone()],
        }
    }
}

impl AsRef<[u8]> for FieldValue<'_> {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

/// Look up field `index` of `resource_type`, requiring `kind` when given.
pub(crate) fn lookup(
    rid: Rid,
    resource_type: &ResourceType,
    index: u32,
    kind: Option<FieldKind>,
) -> RepoResult<&ResourceField> {
    let field = resource_type
        .field(index)
        .ok_or_else(|| RepoError::FieldOutOfRange {
            rid,
            type_name: resource_type.name().to_string(),
            index,
            count: resource_type.field_count(),
        })?;
    match kind {
        Some(expected) if field.kind != expected => Err(mismatch(rid, resource_type, field, expected)),
        _ => Ok(field),
    }
}

pub(crate) fn mismatch(
    rid: Rid,
    resource_type: &ResourceType,
    field: &ResourceField,
    expected: FieldKind,
) -> RepoError {
    RepoError::FieldKindMismatch {
        rid,
        type_name: resource_type.name().to_string(),
        index: field.index,
        expected,
        found: field.kind,
    }
}
