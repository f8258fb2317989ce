//! Resource type schemas, field descriptors, and packed layout.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_types::FieldKind;

use crate::tag::TypeTag;
use crate::value::ValueType;

/// Declaration of one field in a [`ResourceTypeSchema`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    /// Position of the field; indices of one type are unique and contiguous.
    pub index: u32,
    pub kind: FieldKind,
    /// Registered value-type name; required for [`FieldKind::Value`] only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
}

/// Declaration of a resource type: a name and an ordered field list.
///
/// Field offsets are assigned in declaration order, not index order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTypeSchema {
    pub name: String,
    /// Explicit tag; derived from `name` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<TypeTag>,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

impl ResourceTypeSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: None,
            fields: Vec::new(),
        }
    }

    pub fn with_tag(mut self, tag: TypeTag) -> Self {
        self.tag = Some(tag);
        self
    }

    /// The tag this schema registers under.
    pub fn effective_tag(&self) -> TypeTag {
        self.tag.unwrap_or_else(|| TypeTag::of_name(&self.name))
    }

    pub fn value(mut self, name: impl Into<String>, index: u32, value_type: impl Into<String>) -> Self {
        self.fields.push(FieldSchema {
            name: name.into(),
            index,
            kind: FieldKind::Value,
            value_type: Some(value_type.into()),
        });
        self
    }

    pub fn sub_object(self, name: impl Into<String>, index: u32) -> Self {
        self.field(name, index, FieldKind::SubObject)
    }

    pub fn sub_object_set(self, name: impl Into<String>, index: u32) -> Self {
        self.field(name, index, FieldKind::SubObjectSet)
    }

    pub fn stream(self, name: impl Into<String>, index: u32) -> Self {
        self.field(name, index, FieldKind::Stream)
    }

    fn field(mut self, name: impl Into<String>, index: u32, kind: FieldKind) -> Self {
        self.fields.push(FieldSchema {
            name: name.into(),
            index,
            kind,
            value_type: None,
        });
        self
    }
}

/// A laid-out field of a registered [`ResourceType`].
#[derive(Clone, Debug)]
pub struct ResourceField {
    pub name: String,
    pub index: u32,
    pub kind: FieldKind,
    /// Byte offset of the field inside a snapshot buffer.
    pub offset: usize,
    /// Handler for the bytes at `offset`: the value's handler for value
    /// fields, the built-in `Rid`, set-control, or stream-handle handler
    /// otherwise.
    pub value_type: Arc<dyn ValueType>,
}

impl ResourceField {
    /// Byte range of the field inside a snapshot buffer.
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.value_type.size()
    }
}

/// A registered resource type.
#[derive(Debug)]
pub struct ResourceType {
    name: String,
    tag: TypeTag,
    size: usize,
    alignment: usize,
    fields: Vec<ResourceField>,
    by_name: HashMap<String, u32>,
    typed: Option<Arc<dyn ValueType>>,
}

impl ResourceType {
    /// Assemble a field-based type. `fields` must already be sorted by index.
    pub(crate) fn with_fields(
        name: String,
        tag: TypeTag,
        size: usize,
        alignment: usize,
        fields: Vec<ResourceField>,
    ) -> Self {
        let by_name = fields.iter().map(|f| (f.name.clone(), f.index)).collect();
        Self {
            name,
            tag,
            size,
            alignment,
            fields,
            by_name,
            typed: None,
        }
    }

    /// Assemble a typed resource type whose whole buffer is one value.
    pub(crate) fn typed(value_type: Arc<dyn ValueType>) -> Self {
        Self {
            name: value_type.name().to_string(),
            tag: value_type.tag(),
            size: value_type.size(),
            alignment: value_type.alignment(),
            fields: Vec::new(),
            by_name: HashMap::new(),
            typed: Some(value_type),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    /// Snapshot buffer size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Fields ordered by index.
    pub fn fields(&self) -> &[ResourceField] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, index: u32) -> Option<&ResourceField> {
        self.fields.get(index as usize)
    }

    pub fn field_index(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    /// The whole-value handler of a typed resource type.
    pub fn typed_value(&self) -> Option<&Arc<dyn ValueType>> {
        self.typed.as_ref()
    }
}

/// Round `offset` up to the next multiple of `alignment` (a power of two).
pub(crate) fn align_up(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) & !(alignment - 1)
}
