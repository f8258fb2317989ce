//! The [`TypeRegistry`]: value-type handlers and resource types.
//!
//! Registration is part of startup and is not expected to race with
//! repository traffic, so both tables sit behind whole-table locks.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use strata_types::{FieldKind, Rid, SetControl, StreamHandle};
use tracing::debug;

use crate::error::{SchemaError, SchemaResult};
use crate::resource_type::{align_up, ResourceField, ResourceType, ResourceTypeSchema};
use crate::tag::TypeTag;
use crate::value::{PodType, ValueType, MAX_ALIGNMENT};

/// Name of the built-in handler backing sub-object fields.
pub const RID_TYPE: &str = "Rid";
/// Name of the built-in handler backing sub-object-set control blocks.
pub const SET_CONTROL_TYPE: &str = "SubObjectSet";
/// Name of the built-in handler backing stream fields.
pub const STREAM_TYPE: &str = "StreamHandle";

#[derive(Default)]
struct ValueTypes {
    by_tag: HashMap<TypeTag, Arc<dyn ValueType>>,
    by_name: HashMap<String, Arc<dyn ValueType>>,
}

#[derive(Default)]
struct ResourceTypes {
    by_tag: HashMap<TypeTag, Arc<ResourceType>>,
    by_name: HashMap<String, Arc<ResourceType>>,
}

/// Registry of value-type handlers and resource types.
pub struct TypeRegistry {
    values: RwLock<ValueTypes>,
    resources: RwLock<ResourceTypes>,
}

impl TypeRegistry {
    /// Create a registry pre-loaded with the built-in handlers and the
    /// primitive numeric value types (`u8` … `u64`, `i8` … `i64`, `f32`, `f64`).
    pub fn new() -> Self {
        let registry = Self {
            values: RwLock::new(ValueTypes::default()),
            resources: RwLock::new(ResourceTypes::default()),
        };
        let builtins: [Arc<dyn ValueType>; 13] = [
            Arc::new(PodType::<Rid>::new(RID_TYPE)),
            Arc::new(PodType::<SetControl>::new(SET_CONTROL_TYPE)),
            Arc::new(PodType::<StreamHandle>::new(STREAM_TYPE)),
            Arc::new(PodType::<u8>::new("u8")),
            Arc::new(PodType::<u16>::new("u16")),
            Arc::new(PodType::<u32>::new("u32")),
            Arc::new(PodType::<u64>::new("u64")),
            Arc::new(PodType::<i8>::new("i8")),
            Arc::new(PodType::<i16>::new("i16")),
            Arc::new(PodType::<i32>::new("i32")),
            Arc::new(PodType::<i64>::new("i64")),
            Arc::new(PodType::<f32>::new("f32")),
            Arc::new(PodType::<f64>::new("f64")),
        ];
        {
            let mut values = registry.values.write();
            for handler in builtins {
                values.by_tag.insert(handler.tag(), Arc::clone(&handler));
                values.by_name.insert(handler.name().to_string(), handler);
            }
        }
        registry
    }

    // ---------------------------------------------------------------
    // Value types
    // ---------------------------------------------------------------

    /// Register a value-type handler under its tag and name.
    pub fn register_value_type(&self, handler: Arc<dyn ValueType>) -> SchemaResult<TypeTag> {
        let (size, alignment) = (handler.size(), handler.alignment());
        if size == 0 || !alignment.is_power_of_two() || alignment > MAX_ALIGNMENT {
            return Err(SchemaError::InvalidLayout {
                name: handler.name().to_string(),
                size,
                alignment,
            });
        }

        let tag = handler.tag();
        let mut values = self.values.write();
        if values.by_tag.contains_key(&tag) || values.by_name.contains_key(handler.name()) {
            return Err(SchemaError::DuplicateType {
                name: handler.name().to_string(),
                tag,
            });
        }
        debug!(name = handler.name(), %tag, size, alignment, "value type registered");
        values.by_tag.insert(tag, Arc::clone(&handler));
        values.by_name.insert(handler.name().to_string(), handler);
        Ok(tag)
    }

    pub fn value_type(&self, tag: TypeTag) -> Option<Arc<dyn ValueType>> {
        self.values.read().by_tag.get(&tag).cloned()
    }

    pub fn value_type_by_name(&self, name: &str) -> Option<Arc<dyn ValueType>> {
        self.values.read().by_name.get(name).cloned()
    }

    // ---------------------------------------------------------------
    // Resource types
    // ---------------------------------------------------------------

    /// Lay out and register a field-based resource type.
    ///
    /// Offsets are packed in declaration order, each aligned to its
    /// handler's alignment. Duplicate or out-of-range indices, duplicate
    /// names, and unknown value types are rejected.
    pub fn create_type(&self, schema: &ResourceTypeSchema) -> SchemaResult<Arc<ResourceType>> {
        let count = schema.fields.len();
        let mut slots: Vec<Option<ResourceField>> = (0..count).map(|_| None).collect();
        let mut names = HashMap::with_capacity(count);
        let mut size = 0usize;
        let mut alignment = 1usize;

        for field in &schema.fields {
            let index = field.index as usize;
            if index >= count {
                return Err(SchemaError::FieldIndexOutOfRange {
                    type_name: schema.name.clone(),
                    index: field.index,
                    count,
                });
            }
            if slots[index].is_some() {
                return Err(SchemaError::DuplicateFieldIndex {
                    type_name: schema.name.clone(),
                    index: field.index,
                });
            }
            if names.insert(field.name.as_str(), field.index).is_some() {
                return Err(SchemaError::DuplicateFieldName {
                    type_name: schema.name.clone(),
                    field: field.name.clone(),
                });
            }

            let handler = self.field_handler(schema, field.kind, field.value_type.as_deref(), &field.name)?;
            let offset = align_up(size, handler.alignment());
            size = offset + handler.size();
            alignment = alignment.max(handler.alignment());

            slots[index] = Some(ResourceField {
                name: field.name.clone(),
                index: field.index,
                kind: field.kind,
                offset,
                value_type: handler,
            });
        }

        // Every index below `count` was claimed exactly once above.
        let fields: Vec<ResourceField> = slots.into_iter().flatten().collect();
        let size = align_up(size, alignment);
        let resource_type = ResourceType::with_fields(
            schema.name.clone(),
            schema.effective_tag(),
            size,
            alignment,
            fields,
        );
        self.insert(resource_type)
    }

    /// Register a typed resource type whose whole snapshot is one value of
    /// the named value type.
    pub fn create_typed_type(&self, value_type: &str) -> SchemaResult<Arc<ResourceType>> {
        let handler = self
            .value_type_by_name(value_type)
            .ok_or_else(|| SchemaError::UnknownValueType {
                type_name: value_type.to_string(),
                field: String::new(),
                value_type: value_type.to_string(),
            })?;
        self.insert(ResourceType::typed(handler))
    }

    pub fn get(&self, tag: TypeTag) -> Option<Arc<ResourceType>> {
        self.resources.read().by_tag.get(&tag).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<ResourceType>> {
        self.resources.read().by_name.get(name).cloned()
    }

    /// Tag of the resource type registered under `name`.
    pub fn tag_of(&self, name: &str) -> Option<TypeTag> {
        self.resources.read().by_name.get(name).map(|t| t.tag())
    }

    /// Number of registered resource types.
    pub fn len(&self) -> usize {
        self.resources.read().by_tag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every resource type. Value-type handlers stay registered.
    pub fn clear(&self) {
        let mut resources = self.resources.write();
        resources.by_tag.clear();
        resources.by_name.clear();
    }

    fn field_handler(
        &self,
        schema: &ResourceTypeSchema,
        kind: FieldKind,
        value_type: Option<&str>,
        field: &str,
    ) -> SchemaResult<Arc<dyn ValueType>> {
        let name = match kind {
            FieldKind::Value => value_type.ok_or_else(|| SchemaError::MissingValueType {
                type_name: schema.name.clone(),
                field: field.to_string(),
            })?,
            FieldKind::SubObject => RID_TYPE,
            FieldKind::SubObjectSet => SET_CONTROL_TYPE,
            FieldKind::Stream => STREAM_TYPE,
        };
        self.value_type_by_name(name)
            .ok_or_else(|| SchemaError::UnknownValueType {
                type_name: schema.name.clone(),
                field: field.to_string(),
                value_type: name.to_string(),
            })
    }

    fn insert(&self, resource_type: ResourceType) -> SchemaResult<Arc<ResourceType>> {
        let mut resources = self.resources.write();
        let (tag, name) = (resource_type.tag(), resource_type.name().to_string());
        if resources.by_tag.contains_key(&tag) || resources.by_name.contains_key(&name) {
            return Err(SchemaError::DuplicateType { name, tag });
        }

        debug!(
            name = %name,
            %tag,
            size = resource_type.size(),
            fields = resource_type.field_count(),
            "resource type created"
        );
        let resource_type = Arc::new(resource_type);
        resources.by_tag.insert(tag, Arc::clone(&resource_type));
        resources.by_name.insert(name, Arc::clone(&resource_type));
        Ok(resource_type)
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("value_types", &self.values.read().by_tag.len())
            .field("resource_types", &self.len())
            .finish()
    }
}
