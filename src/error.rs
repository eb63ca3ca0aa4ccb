//! Error types for SoulSnaps

use thiserror::Error;

use crate::types::MemoryId;

/// Result type alias for SoulSnaps operations
pub type Result<T> = std::result::Result<T, SoulSnapsError>;

/// Main error type for SoulSnaps
#[derive(Error, Debug)]
pub enum SoulSnapsError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Memory not found: {0}")]
    NotFound(MemoryId),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("Object storage error: {0}")]
    ObjectStorage(String),

    #[error("Remote backend error: {0}")]
    Remote(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    #[cfg(feature = "remote")]
    Http(#[from] reqwest::Error),

    #[error("HTTP request error: {0}")]
    #[cfg(not(feature = "remote"))]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SoulSnapsError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SoulSnapsError::Sync(_)
                | SoulSnapsError::ObjectStorage(_)
                | SoulSnapsError::Remote(_)
                | SoulSnapsError::Http(_)
                | SoulSnapsError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SoulSnapsError::Remote("timeout".into()).is_retryable());
        assert!(SoulSnapsError::ObjectStorage("503".into()).is_retryable());
        assert!(!SoulSnapsError::NotFound(7).is_retryable());
        assert!(!SoulSnapsError::InvalidInput("bad".into()).is_retryable());
    }

    #[test]
    fn test_display() {
        let err = SoulSnapsError::NotFound(42);
        assert_eq!(err.to_string(), "Memory not found: 42");
    }
}
