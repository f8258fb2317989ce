use std::fmt;
use std::str::FromStr;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Number of storage slots in one page of the slot arena.
///
/// Must stay a power of two: [`Rid::offset`] masks instead of dividing.
pub const PAGE_SIZE: u64 = 4096;

/// Opaque resource identifier.
///
/// A `Rid` is a dense counter value that decomposes into a `(page, offset)`
/// pair addressing a permanently allocated storage slot. The zero value is
/// the null identifier and never names a resource.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Pod, Zeroable,
)]
#[repr(transparent)]
pub struct Rid(u64);

impl Rid {
    /// The null identifier. Represents "no resource".
    pub const fn null() -> Self {
        Self(0)
    }

    /// Returns `true` if this is the null identifier.
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Create from a raw counter value.
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Compose an identifier from its page and offset.
    pub const fn from_parts(page: u32, offset: u32) -> Self {
        Self(page as u64 * PAGE_SIZE + (offset as u64 & (PAGE_SIZE - 1)))
    }

    /// The raw counter value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Page index in the slot arena.
    pub const fn page(&self) -> u32 {
        (self.0 / PAGE_SIZE) as u32
    }

    /// Slot offset within the page.
    pub const fn offset(&self) -> u32 {
        (self.0 & (PAGE_SIZE - 1)) as u32
    }
}

impl fmt::Debug for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rid({}:{})", self.page(), self.offset())
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rid:{}:{}", self.page(), self.offset())
    }
}

impl FromStr for Rid {
    type Err = TypeError;

    /// Parse the `rid:<page>:<offset>` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("rid:")
            .ok_or_else(|| TypeError::InvalidRid(s.to_string()))?;
        let (page, offset) = rest
            .split_once(':')
            .ok_or_else(|| TypeError::InvalidRid(s.to_string()))?;
        let page: u32 = page
            .parse()
            .map_err(|_| TypeError::InvalidRid(s.to_string()))?;
        let offset: u32 = offset
            .parse()
            .map_err(|_| TypeError::InvalidRid(s.to_string()))?;
        if u64::from(offset) >= PAGE_SIZE {
            return Err(TypeError::InvalidRid(s.to_string()));
        }
        Ok(Self::from_parts(page, offset))
    }
}

impl From<Rid> for u64 {
    fn from(rid: Rid) -> Self {
        rid.0
    }
}
