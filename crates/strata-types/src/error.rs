use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid resource id: {0}")]
    InvalidRid(String),

    #[error("invalid external id: {0}")]
    InvalidExternalId(String),
}
