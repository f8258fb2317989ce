use strata_schema::{SchemaError, TypeTag};
use strata_types::{ExternalId, FieldKind, Rid};

/// Errors from repository operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepoError {
    /// The id is null or was never allocated.
    #[error("invalid resource id: {0}")]
    InvalidRid(Rid),

    /// The resource is marked for destruction or already destroyed.
    #[error("resource {0} is not alive")]
    NotAlive(Rid),

    /// No resource type is registered under the tag.
    #[error("unknown resource type: {0}")]
    UnknownType(TypeTag),

    /// The slot was reserved by external id but never given a type.
    #[error("resource {0} has no resource type")]
    Untyped(Rid),

    #[error("resource {rid} ({type_name}): field {index} out of range for {count} fields")]
    FieldOutOfRange {
        rid: Rid,
        type_name: String,
        index: u32,
        count: usize,
    },

    /// An accessor was used on a field of a different kind.
    #[error("resource {rid} ({type_name}): field {index} is {found}, not {expected}")]
    FieldKindMismatch {
        rid: Rid,
        type_name: String,
        index: u32,
        expected: FieldKind,
        found: FieldKind,
    },

    /// Bytes handed to or requested from a field have the wrong length.
    #[error("resource {rid}: field {index} holds {expected} bytes, got {actual}")]
    ValueSizeMismatch {
        rid: Rid,
        index: u32,
        expected: usize,
        actual: usize,
    },

    /// The typed accessors were used on a field-based type, or vice versa.
    #[error("resource {rid} ({type_name}) is not a typed resource")]
    NotTyped { rid: Rid, type_name: String },

    /// Another commit replaced the snapshot this transaction was based on.
    #[error("commit conflict on {rid}: snapshot replaced concurrently (now at version {version})")]
    CommitConflict { rid: Rid, version: u32 },

    /// Assigning the child would make a resource its own ancestor.
    #[error("assigning {child} to {owner} would create an ownership cycle")]
    OwnershipCycle { owner: Rid, child: Rid },

    /// A prototype or ownership chain is longer than the configured limit.
    #[error("chain from {rid} exceeds {limit} links")]
    ChainTooDeep { rid: Rid, limit: usize },

    /// Every page of the slot arena is in use.
    #[error("identifier space exhausted ({max_pages} pages)")]
    CapacityExhausted { max_pages: usize },

    /// The external id already names a resource of a different type.
    #[error("external id {id} already names {rid}")]
    ExternalIdInUse { id: ExternalId, rid: Rid },

    /// The nil external id cannot name a resource.
    #[error("the nil external id cannot name a resource")]
    NilExternalId,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
}

/// Result alias for repository operations.
pub type RepoResult<T> = Result<T, RepoError>;
