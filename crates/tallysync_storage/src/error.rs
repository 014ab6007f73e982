//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// "Key not found" is deliberately absent: a missing key is `Ok(None)`.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The backend medium cannot be reached right now.
    #[error("backend unavailable: {message}")]
    Unavailable {
        /// Description of the outage.
        message: String,
    },

    /// The backend requires an authentication step before any call succeeds.
    #[error("authentication required")]
    AuthRequired,

    /// A tenant or key segment is not a valid path component.
    #[error("invalid storage path segment: {segment:?}")]
    InvalidPath {
        /// The rejected segment.
        segment: String,
    },

    /// Another process owns the storage directory.
    #[error("storage locked: another process has exclusive access")]
    Locked,

    /// The stored bytes are damaged.
    #[error("storage corrupted: {0}")]
    Corrupted(String),
}

impl StorageError {
    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Returns true if the failure is transient and the call may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Unavailable { .. })
    }

    /// Returns true if the caller must log in before retrying.
    pub fn is_auth_required(&self) -> bool {
        matches!(self, StorageError::AuthRequired)
    }
}
