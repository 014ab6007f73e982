//! Error types for the sync engine.

use tallysync_core::{CoreError, ValidationError};
use tallysync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Local backend failure.
    #[error("local storage error: {0}")]
    Local(#[from] StorageError),

    /// Data model, codec, validation or corruption error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The remote backend needs a login before it can be used.
    #[error("remote requires authentication")]
    AuthRequired,

    /// The remote backend cannot be reached. Transient.
    #[error("remote unavailable: {message}")]
    RemoteUnavailable {
        /// Description of the outage.
        message: String,
    },

    /// The remote backend failed for another reason.
    #[error("remote error: {message}")]
    Remote {
        /// Error message.
        message: String,
    },

    /// A remote payload failed validation and was not applied.
    #[error("payload for key {key} quarantined: {error}")]
    Quarantined {
        /// The affected key.
        key: String,
        /// Why the payload was refused.
        error: ValidationError,
    },

    /// A key kept being overwritten locally while it was being reconciled.
    #[error("reconciliation of {key} superseded {rounds} times in a row")]
    Superseded {
        /// The affected key.
        key: String,
        /// How many rounds were discarded.
        rounds: u32,
    },

    /// The tenant context has been torn down.
    #[error("tenant context is shut down")]
    Shutdown,
}

impl SyncError {
    /// Maps a remote backend error onto the sync taxonomy.
    pub fn from_remote(error: StorageError) -> Self {
        match error {
            StorageError::AuthRequired => Self::AuthRequired,
            StorageError::Unavailable { message } => Self::RemoteUnavailable { message },
            other => Self::Remote {
                message: other.to_string(),
            },
        }
    }

    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::RemoteUnavailable {
            message: message.into(),
        }
    }

    /// Returns true if this error can be retried later without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::RemoteUnavailable { .. } | SyncError::Superseded { .. }
        )
    }
}

impl From<ValidationError> for SyncError {
    fn from(error: ValidationError) -> Self {
        Self::Core(CoreError::Validation(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_mapping() {
        assert!(matches!(
            SyncError::from_remote(StorageError::AuthRequired),
            SyncError::AuthRequired
        ));
        let offline = SyncError::from_remote(StorageError::unavailable("dns"));
        assert!(offline.is_retryable());
        assert_eq!(offline.to_string(), "remote unavailable: dns");

        let other = SyncError::from_remote(StorageError::Corrupted("bad blob".into()));
        assert!(matches!(other, SyncError::Remote { .. }));
        assert!(!other.is_retryable());
    }

    #[test]
    fn auth_is_not_retryable() {
        assert!(!SyncError::AuthRequired.is_retryable());
        assert!(!SyncError::Shutdown.is_retryable());
    }
}
