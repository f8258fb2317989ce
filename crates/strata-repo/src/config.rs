use serde::{Deserialize, Serialize};
use strata_types::PAGE_SIZE;

use crate::error::{RepoError, RepoResult};

/// Configuration for a [`Repository`](crate::Repository).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Maximum number of slot pages; capacity is `max_pages * PAGE_SIZE`.
    pub max_pages: usize,
    /// Maximum length of a prototype or ownership chain.
    pub max_chain_depth: usize,
    /// How many times [`Repository::update`](crate::Repository::update)
    /// rebases and retries after a commit conflict.
    pub max_commit_retries: u32,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            max_pages: 4096,
            max_chain_depth: 64,
            max_commit_retries: 8,
        }
    }
}

impl RepositoryConfig {
    /// A small configuration for tests and tools.
    pub fn compact() -> Self {
        Self {
            max_pages: 16,
            ..Default::default()
        }
    }

    /// Total number of addressable resources, including the reserved null id.
    pub fn capacity(&self) -> u64 {
        self.max_pages as u64 * PAGE_SIZE
    }

    pub fn validate(&self) -> RepoResult<()> {
        if self.max_pages == 0 {
            return Err(RepoError::InvalidConfig("max_pages must be non-zero".into()));
        }
        if self.max_pages > u32::MAX as usize {
            return Err(RepoError::InvalidConfig(format!(
                "max_pages {} exceeds the page index range",
                self.max_pages
            )));
        }
        if self.max_chain_depth == 0 {
            return Err(RepoError::InvalidConfig(
                "max_chain_depth must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
