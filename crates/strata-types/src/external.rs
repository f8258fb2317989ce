use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Identifier naming a resource from outside the process.
///
/// Serializers and asset files refer to resources by `ExternalId`; the
/// repository maps each one to at most one [`Rid`](crate::Rid). The nil UUID
/// means "no external id".
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExternalId(uuid::Uuid);

impl ExternalId {
    /// Generate a new time-ordered id (UUID v7).
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// Generate a random id (UUID v4).
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// The nil id.
    pub const fn nil() -> Self {
        Self(uuid::Uuid::nil())
    }

    /// Returns `true` for the nil id.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// Short representation (first 8 characters of the UUID).
    pub fn short_id(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl fmt::Debug for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExternalId({})", self.short_id())
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExternalId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| TypeError::InvalidExternalId(e.to_string()))
    }
}

impl From<uuid::Uuid> for ExternalId {
    fn from(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }
}
