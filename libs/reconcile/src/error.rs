use thiserror::Error;

/// Errors returned by caches and writers.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object does not exist (yet).
    #[error("not found: {0}")]
    NotFound(String),

    /// Create of an object that already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Write based on a stale resource version.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Store or cache temporarily unavailable.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns true for the not-found case, which callers treat as a state
    /// rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
