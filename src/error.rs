//! Error taxonomy shared by every public operation.
//!
//! Each variant maps to one propagation rule: validation failures are surfaced
//! immediately, connectivity failures are retried before they surface, and
//! rejection/storage failures are never retried.

/// Classified failure returned by the store, cache and orchestrator APIs
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Remote store unreachable: {0}")]
    Connectivity(String),

    #[error("Remote store rejected the request: {0}")]
    RemoteRejection(String),

    #[error("Local storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Stable tag for the error class, used on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Validation(_) => "validation",
            StoreError::Connectivity(_) => "connectivity",
            StoreError::RemoteRejection(_) => "remote_rejection",
            StoreError::Storage(_) => "storage",
            StoreError::NotFound(_) => "not_found",
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Storage(format!("corrupt record: {}", err))
    }
}
