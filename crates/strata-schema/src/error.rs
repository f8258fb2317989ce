use crate::tag::TypeTag;

/// Errors raised while registering value types and resource types.
///
/// Registration happens during startup; callers treat any of these as fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// Two fields of one type declared the same index.
    #[error("type {type_name}: field index {index} declared twice")]
    DuplicateFieldIndex { type_name: String, index: u32 },

    /// Two fields of one type declared the same name.
    #[error("type {type_name}: field name {field} declared twice")]
    DuplicateFieldName { type_name: String, field: String },

    /// Field indices must be contiguous from zero.
    #[error("type {type_name}: field index {index} out of range for {count} fields")]
    FieldIndexOutOfRange {
        type_name: String,
        index: u32,
        count: usize,
    },

    /// A value field names a value type that was never registered.
    #[error("type {type_name}: field {field} uses unknown value type {value_type}")]
    UnknownValueType {
        type_name: String,
        field: String,
        value_type: String,
    },

    /// A value field did not name its value type.
    #[error("type {type_name}: value field {field} has no value type")]
    MissingValueType { type_name: String, field: String },

    /// A resource type or value type with this tag or name already exists.
    #[error("type {name} ({tag}) is already registered")]
    DuplicateType { name: String, tag: TypeTag },

    /// A value-type handler reported an unusable layout.
    #[error("value type {name}: invalid layout (size {size}, alignment {alignment})")]
    InvalidLayout {
        name: String,
        size: usize,
        alignment: usize,
    },
}

/// Result alias for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;
