//! Error types for fieldsync

use thiserror::Error;

/// Result type alias for fieldsync operations
pub type Result<T> = std::result::Result<T, FieldSyncError>;

/// Main error type for fieldsync
#[derive(Error, Debug)]
pub enum FieldSyncError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Remote call timed out after {0} ms")]
    Timeout(u64),

    #[error("Device is offline")]
    Offline,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FieldSyncError {
    /// Check if error is retryable (transient remote failure)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FieldSyncError::Remote(_) | FieldSyncError::Timeout(_) | FieldSyncError::Offline
        )
    }

    /// Check if the local store itself failed; there is no lower fallback tier
    pub fn is_local_failure(&self) -> bool {
        matches!(
            self,
            FieldSyncError::Database(_) | FieldSyncError::Storage(_) | FieldSyncError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(FieldSyncError::Remote("503".into()).is_retryable());
        assert!(FieldSyncError::Timeout(100).is_retryable());
        assert!(FieldSyncError::Offline.is_retryable());
        assert!(!FieldSyncError::InvalidInput("missing user_id".into()).is_retryable());
        assert!(!FieldSyncError::Storage("disk full".into()).is_retryable());
    }

    #[test]
    fn test_local_failure_classification() {
        assert!(FieldSyncError::Storage("disk full".into()).is_local_failure());
        assert!(FieldSyncError::Database(rusqlite::Error::QueryReturnedNoRows).is_local_failure());
        assert!(!FieldSyncError::Remote("boom".into()).is_local_failure());
    }
}
